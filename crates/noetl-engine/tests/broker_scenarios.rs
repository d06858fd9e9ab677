//! End-to-end broker scenarios against the in-memory store (§8 scenarios
//! 1, 2, 6).

use chrono::Utc;
use noetl_core::{new_event_id, Event, EventType, LoopFields, Status, Value};
use noetl_engine::broker::{evaluate, Outcome};
use noetl_engine::persistence::{EventStore, InMemoryStore, QueueStore};
use noetl_engine::playbook::parse;

fn start_event(execution_id: &str, workload: Value) -> Event {
    let mut input = Value::map();
    input.insert("workload", workload);
    Event {
        event_id: new_event_id(),
        parent_event_id: None,
        execution_id: execution_id.to_string(),
        parent_execution_id: None,
        timestamp: Utc::now(),
        insertion_rank: 0,
        event_type: EventType::new(EventType::EXECUTION_START),
        status: Status::Completed,
        node_id: None,
        node_name: Some("start".to_string()),
        node_type: Some("start".to_string()),
        input_context: Some(input),
        output_result: None,
        metadata: None,
        loop_fields: LoopFields::default(),
        error: None,
    }
}

fn action_completed(execution_id: &str, node_id: &str, node_name: &str, result: Value) -> Event {
    Event {
        event_id: new_event_id(),
        parent_event_id: None,
        execution_id: execution_id.to_string(),
        parent_execution_id: None,
        timestamp: Utc::now(),
        insertion_rank: 0,
        event_type: EventType::new(EventType::ACTION_COMPLETED),
        status: Status::Completed,
        node_id: Some(node_id.to_string()),
        node_name: Some(node_name.to_string()),
        node_type: None,
        input_context: None,
        output_result: Some(result),
        metadata: None,
        loop_fields: LoopFields::default(),
        error: None,
    }
}

#[tokio::test]
async fn conditional_branch_only_enqueues_the_matching_target() {
    let yaml = r#"
workflow:
  - step: start
    type: start
    next:
      - then: [{step: check}]
  - step: check
    call: noop
    next:
      - when: "{{ x > 5 }}"
        then: [{step: big}]
      - else: [{step: small}]
  - step: big
    call: noop
  - step: small
    call: noop
"#;
    let playbook = parse(yaml).unwrap();
    let store = InMemoryStore::default();
    let execution_id = "exec-branch";

    store
        .emit(start_event(execution_id, {
            let mut w = Value::map();
            w.insert("x", Value::Int(10));
            w
        }))
        .await
        .unwrap();
    store
        .emit(action_completed(execution_id, "ignored", "start", {
            let mut r = Value::map();
            r.insert("skipped", Value::Bool(true));
            r
        }))
        .await
        .unwrap();
    store
        .emit(action_completed(execution_id, "ignored-2", "check", Value::Null))
        .await
        .unwrap();

    let outcome = evaluate(execution_id, &playbook, &store, &store, &store, 50).await;

    match outcome {
        Outcome::Scheduled(node_id) => {
            let job = store.find_active(execution_id, &node_id).await.unwrap();
            assert!(job.is_some());
        }
        other => panic!("expected Scheduled outcome, got {other:?}"),
    }

    let jobs = store.list(None).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert!(jobs[0].node_id.ends_with(&format!(
        "-step-{}",
        playbook.step_index("big").unwrap()
    )));
}

#[tokio::test]
async fn skip_by_when_false_advances_to_the_next_step() {
    let yaml = r#"
workflow:
  - step: start
    type: start
    next:
      - then: [{step: maybe}]
  - step: maybe
    call: noop
    when: "{{ false }}"
    next:
      - then: [{step: after}]
  - step: after
    call: noop
"#;
    let playbook = parse(yaml).unwrap();
    let store = InMemoryStore::default();
    let execution_id = "exec-skip";

    store
        .emit(start_event(execution_id, Value::map()))
        .await
        .unwrap();
    store
        .emit(action_completed(execution_id, "ignored", "start", Value::Null))
        .await
        .unwrap();

    let outcome = evaluate(execution_id, &playbook, &store, &store, &store, 50).await;
    match outcome {
        Outcome::Scheduled(node_id) => {
            assert!(node_id.ends_with(&format!(
                "-step-{}",
                playbook.step_index("after").unwrap()
            )));
        }
        other => panic!("expected Scheduled(after), got {other:?}"),
    }

    let events = store.get_events(execution_id).await.unwrap();
    let skip_event = events
        .iter()
        .find(|e| e.node_name.as_deref() == Some("maybe"))
        .expect("synthetic skip event recorded");
    assert_eq!(
        skip_event.output_result.as_ref().unwrap().get_path("skipped"),
        Some(&Value::Bool(true))
    );
}

#[tokio::test]
async fn linear_playbook_enqueues_first_action_step() {
    let yaml = r#"
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
      - then: [{step: end}]
  - step: end
    type: end
"#;
    let playbook = parse(yaml).unwrap();
    let store = InMemoryStore::default();
    let execution_id = "exec-linear";

    store
        .emit(start_event(execution_id, {
            let mut w = Value::map();
            w.insert("n", Value::Int(2));
            w
        }))
        .await
        .unwrap();
    store
        .emit(action_completed(execution_id, "ignored", "start", Value::Null))
        .await
        .unwrap();

    let outcome = evaluate(execution_id, &playbook, &store, &store, &store, 50).await;
    assert!(matches!(outcome, Outcome::Scheduled(_)));

    let jobs = store.list(None).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].input_context.get_path("body"), Some(&Value::String("result = n * 3".to_string())));
}
