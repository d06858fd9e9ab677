//! Reconstructs the execution context from the event log prefix (§4.C).
//! `build_context` itself is a pure function: the same event list always
//! yields the same context, so callers may cache by
//! `(execution_id, max_event_id)`. `build_context_with_lineage` is the
//! store-backed wrapper used by nested sub-playbook executions to fold in
//! their parent's context (`original_source/plugin/playbook/context.py`).

use std::collections::BTreeMap;

use noetl_core::{Event, EventType, Value};
use thiserror::Error;

use crate::persistence::EventStore;
use crate::playbook::{Playbook, Step};

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("no execution_start event found")]
    MissingExecutionStart,

    #[error("event store error: {0}")]
    Store(String),
}

/// Reserved context keys that a workload/results key must not shadow when
/// promoted to the context root.
const RESERVED_KEYS: &[&str] = &["workload", "work", "results", "context", "env", "job"];

/// Build the context map for an execution from its ordered event list.
///
/// `playbook` resolves workbook-aliasing (§4.C): a `workbook`-typed step
/// whose own result is absent inherits the result of the workbook task it
/// delegates to.
pub fn build_context(
    events: &[Event],
    playbook: Option<&Playbook>,
    extra_context: Option<Value>,
) -> Result<Value, ContextError> {
    let mut workload = Value::map();
    let mut found_start = false;

    for event in events {
        if event.event_type.as_str() == EventType::EXECUTION_START {
            found_start = true;
            if let Some(input) = &event.input_context {
                if let Some(w) = input.get_path("workload") {
                    merge_into(&mut workload, w);
                } else {
                    merge_into(&mut workload, input);
                }
            }
        }
        if event.event_type.as_str() == EventType::CONTEXT_UPDATE {
            if let Some(update) = &event.output_result {
                merge_into(&mut workload, update);
            }
        }
    }

    if !found_start {
        return Err(ContextError::MissingExecutionStart);
    }

    let mut results: BTreeMap<String, Value> = BTreeMap::new();
    for event in events {
        if let (Some(node_name), Some(output)) = (&event.node_name, &event.output_result) {
            results.insert(node_name.clone(), output.clone());
        }
    }

    if let Some(playbook) = playbook {
        apply_workbook_aliasing(playbook, &mut results);
    }

    let mut context = Value::map();
    context.insert("workload", workload.clone());
    context.insert("work", workload.clone());
    context.insert("context", workload.clone());

    let results_value = Value::Map(results.clone());
    context.insert("results", results_value);

    if let Some(map) = workload.as_map() {
        for (k, v) in map {
            if !RESERVED_KEYS.contains(&k.as_str()) {
                context.insert(k.clone(), v.clone());
            }
        }
    }
    for (k, v) in &results {
        if !RESERVED_KEYS.contains(&k.as_str()) {
            context.insert(k.clone(), v.clone());
        }
    }

    if let Some(extra) = extra_context {
        if let Some(map) = extra.as_map() {
            for (k, v) in map {
                if context.get_path(k).is_none() {
                    context.insert(k.clone(), v.clone());
                }
            }
        }
    }

    Ok(context)
}

/// `build_context`, plus one level of ancestor lineage: if `event_log`'s
/// `execution_start` carries a `parent_execution_id`, the parent's own
/// context is folded in underneath the child's (the child's workload and
/// results always win on key collision). Only one level up is walked —
/// a nested sub-playbook's own nested calls see their immediate caller,
/// not the whole ancestor chain.
pub async fn build_context_with_lineage(
    event_log: &[Event],
    playbook: Option<&Playbook>,
    extra_context: Option<Value>,
    events: &dyn EventStore,
) -> Result<Value, ContextError> {
    let mut context = build_context(event_log, playbook, extra_context)?;

    if let Some(parent_execution_id) = find_parent_execution_id(event_log) {
        let parent_events = events
            .get_events(&parent_execution_id)
            .await
            .map_err(|e| ContextError::Store(e.to_string()))?;
        if let Ok(parent_context) = build_context(&parent_events, None, None) {
            merge_under(&mut context, &parent_context);
        }
    }

    Ok(context)
}

fn find_parent_execution_id(events: &[Event]) -> Option<String> {
    events
        .iter()
        .find(|e| e.event_type.as_str() == EventType::EXECUTION_START)
        .and_then(|e| e.parent_execution_id.clone())
}

/// Layer `child` over `parent`: `parent`'s keys fill in anything `child`
/// doesn't already define, `child` wins on collision.
fn merge_under(child: &mut Value, parent: &Value) {
    let mut merged = parent.clone();
    if let (Some(merged_map), Some(child_map)) = (merged.as_map_mut(), child.as_map()) {
        for (k, v) in child_map {
            merged_map.insert(k.clone(), v.clone());
        }
    }
    *child = merged;
}

fn merge_into(base: &mut Value, update: &Value) {
    match (base.as_map_mut(), update.as_map()) {
        (Some(base_map), Some(update_map)) => {
            for (k, v) in update_map {
                base_map.insert(k.clone(), v.clone());
            }
        }
        _ => {
            *base = update.clone();
        }
    }
}

fn apply_workbook_aliasing(playbook: &Playbook, results: &mut BTreeMap<String, Value>) {
    for step in &playbook.workflow {
        if is_workbook_step(step) {
            if let Some(task) = &step.task {
                if !results.contains_key(&step.name) {
                    if let Some(task_result) = results.get(task).cloned() {
                        results.insert(step.name.clone(), task_result);
                    }
                }
            }
        }
    }
}

fn is_workbook_step(step: &Step) -> bool {
    step.step_type.as_deref() == Some("workbook")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use noetl_core::Status;

    fn ev(event_type: &str, node_name: Option<&str>, output: Option<Value>) -> Event {
        Event {
            event_id: uuid::Uuid::now_v7().to_string(),
            parent_event_id: None,
            execution_id: "exec-1".to_string(),
            parent_execution_id: None,
            timestamp: Utc::now(),
            insertion_rank: 0,
            event_type: EventType::new(event_type),
            status: Status::Completed,
            node_id: None,
            node_name: node_name.map(str::to_string),
            node_type: None,
            input_context: None,
            output_result: output,
            metadata: None,
            loop_fields: Default::default(),
            error: None,
        }
    }

    #[test]
    fn builds_workload_and_results_with_top_level_aliases() {
        let mut start = ev(EventType::EXECUTION_START, None, None);
        start.input_context = Some(Value::from_json(serde_json::json!({"workload": {"n": 2}})));
        let a_done = ev(
            EventType::ACTION_COMPLETED,
            Some("a"),
            Some(Value::Int(6)),
        );
        let events = vec![start, a_done];

        let context = build_context(&events, None, None).unwrap();
        assert_eq!(context.get_path("n"), Some(&Value::Int(2)));
        assert_eq!(context.get_path("workload.n"), Some(&Value::Int(2)));
        assert_eq!(context.get_path("results.a"), Some(&Value::Int(6)));
        assert_eq!(context.get_path("a"), Some(&Value::Int(6)));
    }

    #[test]
    fn errors_without_execution_start() {
        let events = vec![ev(EventType::ACTION_COMPLETED, Some("a"), Some(Value::Int(1)))];
        assert!(matches!(
            build_context(&events, None, None),
            Err(ContextError::MissingExecutionStart)
        ));
    }
}
