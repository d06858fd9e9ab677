//! `end_loop` aggregation (§4.G "end_loop aggregation").

use noetl_core::{Event, EventType, Status, Value};

use crate::template::{render_value, Mode, RenderError};

/// Collect per-iteration results for `body_step`, ordered by
/// `current_index` where available (falling back to event order).
pub fn collect_iteration_results(events: &[Event], body_step: &str) -> Vec<Value> {
    let mut indexed: Vec<(i64, usize, Value)> = Vec::new();
    let mut fallback_rank = 0usize;

    for event in events {
        let is_result_like = matches!(
            event.event_type.as_str(),
            t if t == EventType::RESULT || t == EventType::ACTION_COMPLETED
        );
        if !is_result_like || event.status != Status::Completed {
            continue;
        }
        let Some(node_id) = &event.node_id else {
            continue;
        };
        if !node_id.contains("-iter-") {
            continue;
        }
        if event.node_name.as_deref() != Some(body_step) {
            continue;
        }
        let index = event.loop_fields.current_index.unwrap_or(i64::MAX);
        let value = event.output_result.clone().unwrap_or(Value::Null);
        indexed.push((index, fallback_rank, value));
        fallback_rank += 1;
    }

    indexed.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
    indexed.into_iter().map(|(_, _, v)| v).collect()
}

/// Inline aggregation path: below `INLINE_AGGREGATION_MAX` kept items, the
/// broker aggregates directly instead of enqueueing a dedicated reduction
/// job (§9 Open Question, resolved in `SPEC_FULL.md` Part III item 8).
pub const INLINE_AGGREGATION_MAX: usize = 50;

/// Build the aggregated `end_loop` payload: `{step_name}_results` and
/// `loop_results` aliases, plus the rendered `result` template if present.
pub fn aggregate(
    step_name: &str,
    results: &[Value],
    result_template: Option<&Value>,
    context: &Value,
) -> Result<Value, RenderError> {
    let results_list = Value::List(results.to_vec());

    let mut augmented = context.clone();
    augmented.insert(format!("{step_name}_results"), results_list.clone());
    augmented.insert("loop_results", results_list.clone());

    match result_template {
        Some(template) => render_value(template, &augmented, Mode::Lenient),
        None => Ok(results_list),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn iter_event(node_id: &str, node_name: &str, index: i64, result: i64) -> Event {
        Event {
            event_id: uuid::Uuid::now_v7().to_string(),
            parent_event_id: None,
            execution_id: "exec-1".to_string(),
            parent_execution_id: None,
            timestamp: Utc::now(),
            insertion_rank: index,
            event_type: EventType::new(EventType::ACTION_COMPLETED),
            status: Status::Completed,
            node_id: Some(node_id.to_string()),
            node_name: Some(node_name.to_string()),
            node_type: None,
            input_context: None,
            output_result: Some(Value::Int(result)),
            metadata: None,
            loop_fields: noetl_core::LoopFields {
                current_index: Some(index),
                ..Default::default()
            },
            error: None,
        }
    }

    #[test]
    fn orders_by_current_index() {
        let events = vec![
            iter_event("exec-1-step-0-iter-1", "body", 1, 9),
            iter_event("exec-1-step-0-iter-0", "body", 0, 4),
            iter_event("exec-1-step-0-iter-2", "body", 2, 16),
        ];
        let results = collect_iteration_results(&events, "body");
        assert_eq!(results, vec![Value::Int(4), Value::Int(9), Value::Int(16)]);
    }

    #[test]
    fn aggregate_renders_result_template_with_loop_results_alias() {
        let results = vec![Value::Int(4), Value::Int(9), Value::Int(16)];
        let mut template = std::collections::BTreeMap::new();
        template.insert("squares".to_string(), Value::String("{{ loop_results }}".to_string()));
        let rendered = aggregate(
            "loop_step",
            &results,
            Some(&Value::Map(template)),
            &Value::map(),
        )
        .unwrap();
        assert_eq!(
            rendered.get_path("squares"),
            Some(&Value::List(results))
        );
    }
}
