//! The append-only event record (§3 DATA MODEL) and the canonical status
//! normalization every other component relies on.

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// The canonical, normalized status set. Every raw status string observed
/// anywhere in the system (event rows, queue rows, executor responses) is
/// mapped into this set exactly once, at the boundary where it is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    Running,
    Completed,
    Failed,
}

impl Status {
    /// Normalize a raw status string (as seen in original event payloads,
    /// e.g. "success", "ok", "error", "STARTED") to the canonical set.
    pub fn normalize(raw: &str) -> Status {
        match raw.to_lowercase().as_str() {
            "completed" | "success" | "succeeded" | "ok" | "done" => Status::Completed,
            "failed" | "failure" | "error" => Status::Failed,
            "running" | "started" | "in_progress" => Status::Running,
            _ => Status::Pending,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Completed | Status::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Running => "running",
            Status::Completed => "completed",
            Status::Failed => "failed",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The `event_type` enumeration from §3. Kept as an open string newtype
/// rather than a closed enum: new synthetic event types (e.g. skip
/// markers) are expected to be added by broker logic without a schema
/// migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventType(pub String);

impl EventType {
    pub const EXECUTION_START: &'static str = "execution_start";
    pub const EXECUTION_COMPLETED: &'static str = "execution_completed";
    pub const ACTION_STARTED: &'static str = "action_started";
    pub const ACTION_COMPLETED: &'static str = "action_completed";
    pub const ACTION_ERROR: &'static str = "action_error";
    pub const RESULT: &'static str = "result";
    pub const LOOP_ITERATION: &'static str = "loop_iteration";
    pub const LOOP_COMPLETED: &'static str = "loop_completed";
    pub const END_LOOP: &'static str = "end_loop";
    pub const TRANSITION: &'static str = "transition";
    pub const CONTEXT_UPDATE: &'static str = "context_update";

    pub fn new(s: impl Into<String>) -> Self {
        EventType(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is(&self, candidate: &str) -> bool {
        self.0 == candidate
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Metadata describing a loop iteration carried on events belonging to it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoopFields {
    pub loop_id: Option<String>,
    pub loop_name: Option<String>,
    pub iterator: Option<String>,
    pub current_index: Option<i64>,
    /// Always a typed [`Value`] at the storage boundary (§9 Open Question,
    /// resolved): any JSON-string-encoded `current_item` is parsed once on
    /// ingestion rather than carried as a double-encoded string.
    pub current_item: Option<Value>,
}

/// An immutable record in the append-only event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub parent_event_id: Option<String>,
    pub execution_id: String,

    /// Lineage to a different execution's event, used for nested
    /// sub-playbook/workbook calls (`original_source/plugin/playbook/context.py`).
    /// Additive to the core spec's Event shape, not a replacement.
    #[serde(default)]
    pub parent_execution_id: Option<String>,

    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Monotonically increasing insertion rank, used to break timestamp
    /// ties in strict ordering (§3 invariant, §5 ordering guarantee).
    #[serde(default)]
    pub insertion_rank: i64,

    pub event_type: EventType,
    pub status: Status,

    pub node_id: Option<String>,
    pub node_name: Option<String>,
    pub node_type: Option<String>,

    #[serde(default)]
    pub input_context: Option<Value>,
    #[serde(default)]
    pub output_result: Option<Value>,
    #[serde(default)]
    pub metadata: Option<Value>,

    #[serde(default, flatten)]
    pub loop_fields: LoopFields,

    #[serde(default)]
    pub error: Option<String>,
}

impl Event {
    pub fn is_completed(&self) -> bool {
        self.status == Status::Completed
    }

    pub fn is_failed(&self) -> bool {
        self.status == Status::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_common_raw_statuses() {
        assert_eq!(Status::normalize("SUCCESS"), Status::Completed);
        assert_eq!(Status::normalize("error"), Status::Failed);
        assert_eq!(Status::normalize("started"), Status::Running);
        assert_eq!(Status::normalize("weird"), Status::Pending);
    }

    #[test]
    fn terminal_statuses() {
        assert!(Status::Completed.is_terminal());
        assert!(Status::Failed.is_terminal());
        assert!(!Status::Running.is_terminal());
    }
}
