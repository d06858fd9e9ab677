//! YAML playbook loading (§4.E PLAYBOOK PARSER).

use thiserror::Error;

use super::types::Playbook;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid playbook YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("playbook has no workflow steps")]
    EmptyWorkflow,

    #[error("duplicate step name: {0}")]
    DuplicateStep(String),

    #[error("duplicate workbook task name: {0}")]
    DuplicateWorkbookTask(String),
}

/// Parse and validate a playbook document.
pub fn parse(source: &str) -> Result<Playbook, ParseError> {
    let playbook: Playbook = serde_yaml::from_str(source)?;
    validate(&playbook)?;
    Ok(playbook)
}

fn validate(playbook: &Playbook) -> Result<(), ParseError> {
    if playbook.workflow.is_empty() {
        return Err(ParseError::EmptyWorkflow);
    }

    let mut seen = std::collections::HashSet::new();
    for step in &playbook.workflow {
        if !seen.insert(step.name.as_str()) {
            return Err(ParseError::DuplicateStep(step.name.clone()));
        }
    }

    let mut seen_tasks = std::collections::HashSet::new();
    for task in &playbook.workbook {
        if !seen_tasks.insert(task.name.as_str()) {
            return Err(ParseError::DuplicateWorkbookTask(task.name.clone()));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_linear_two_step_playbook() {
        let yaml = r#"
name: linear
workload:
  n: 2
workflow:
  - step: start
    type: start
    next:
      - then: [{step: a}]
  - step: a
    call: python
    with:
      body: "result = n * 3"
    next:
      - then: [{step: b}]
  - step: b
    call: python
    with:
      body: "result = results.a + 1"
    next:
      - then: [{step: end}]
  - step: end
    type: end
"#;
        let playbook = parse(yaml).expect("parses");
        assert_eq!(playbook.workflow.len(), 4);
        assert_eq!(playbook.step("a").unwrap().call.as_deref(), Some("python"));
        assert!(playbook.workflow[0].is_terminal_control());
    }

    #[test]
    fn parses_conditional_next_with_else() {
        let yaml = r#"
workflow:
  - step: check
    next:
      - when: "{{ x > 5 }}"
        then: [{step: big}]
      - else: [{step: small}]
  - step: big
    call: noop
  - step: small
    call: noop
"#;
        let playbook = parse(yaml).expect("parses");
        let check = playbook.step("check").unwrap();
        assert_eq!(check.next.len(), 2);
        assert!(!check.next[0].is_else);
        assert!(check.next[1].is_else);
        assert_eq!(check.next[1].then[0].step, "small");
    }

    #[test]
    fn parses_loop_and_end_loop() {
        let yaml = r#"
workflow:
  - step: loop_step
    loop:
      iterator: i
      in: "{{ items }}"
      filter: "{{ i > 1 }}"
    next:
      - then: [{step: body}]
  - step: body
    call: python
  - step: aggregate
    end_loop:
      loop_step: loop_step
      result:
        squares: "{{ loop_results }}"
"#;
        let playbook = parse(yaml).expect("parses");
        let loop_step = playbook.step("loop_step").unwrap();
        assert!(loop_step.is_loop_entry());
        let agg = playbook.step("aggregate").unwrap();
        assert!(agg.is_end_loop());
    }

    #[test]
    fn rejects_empty_workflow() {
        let yaml = "workload: {}\nworkflow: []\n";
        assert!(matches!(parse(yaml), Err(ParseError::EmptyWorkflow)));
    }

    #[test]
    fn rejects_duplicate_step_names() {
        let yaml = r#"
workflow:
  - step: a
    call: noop
  - step: a
    call: noop
"#;
        assert!(matches!(parse(yaml), Err(ParseError::DuplicateStep(_))));
    }
}
