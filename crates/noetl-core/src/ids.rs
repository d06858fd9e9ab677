//! Identifier and timestamp helpers shared by the event log, the queue, and
//! the loop engine.

use uuid::Uuid;

/// Generate a new opaque, time-ordered execution id.
///
/// An opaque string is all callers may assume (e.g. a Snowflake ID in other
/// deployments); a UUIDv7 gives the same sortable-by-creation-time property
/// without depending on a coordinated node/sequence allocator.
pub fn new_execution_id() -> String {
    Uuid::now_v7().to_string()
}

/// Generate a new event id.
pub fn new_event_id() -> String {
    Uuid::now_v7().to_string()
}

/// Build the canonical node id for a plain (non-loop) step.
pub fn step_node_id(execution_id: &str, step_index: usize) -> String {
    format!("{execution_id}-step-{step_index}")
}

/// Build the canonical node id for a loop iteration: `{execution_id}-step-{N}-iter-{K}`.
pub fn loop_iter_node_id(execution_id: &str, step_index: usize, iteration_index: usize) -> String {
    format!("{execution_id}-step-{step_index}-iter-{iteration_index}")
}

/// Parse a loop iteration node id back into `(step_index, iteration_index)`.
pub fn parse_loop_iter_node_id(node_id: &str) -> Option<(usize, usize)> {
    let rest = node_id.split("-step-").nth(1)?;
    let (step_part, iter_part) = rest.split_once("-iter-")?;
    let step_index = step_part.parse().ok()?;
    let iteration_index = iter_part.parse().ok()?;
    Some((step_index, iteration_index))
}

/// Current timestamp as RFC3339, used by the `now()` template global and by
/// event emission timestamps.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loop_iter_node_id_round_trips() {
        let id = loop_iter_node_id("exec-1", 3, 7);
        assert_eq!(id, "exec-1-step-3-iter-7");
        assert_eq!(parse_loop_iter_node_id(&id), Some((3, 7)));
    }

    #[test]
    fn parse_rejects_non_iteration_ids() {
        assert_eq!(parse_loop_iter_node_id("exec-1-step-3"), None);
    }
}
