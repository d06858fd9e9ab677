//! Work queue job shape (§3 DATA MODEL, §4.B WORK QUEUE).

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Lifecycle status of a queue row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Queued,
    Leased,
    Done,
    Dead,
}

impl QueueStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            QueueStatus::Queued => "queued",
            QueueStatus::Leased => "leased",
            QueueStatus::Done => "done",
            QueueStatus::Dead => "dead",
        }
    }

    /// Whether a job in this status counts as "already scheduled" for the
    /// idempotent-enqueue dedup guard in §4.B and §4.F step 6.
    pub fn is_active(self) -> bool {
        matches!(self, QueueStatus::Queued | QueueStatus::Leased)
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One row of the durable work queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueJob {
    pub queue_id: i64,
    pub execution_id: String,
    pub node_id: String,

    /// The action specification (tool/task), carried as a typed [`Value`].
    /// Opaque payloads (inline code, raw SQL) are base64-wrapped by the
    /// producer per §3; this field stores whatever shape the broker built.
    pub action: Value,
    pub input_context: Value,

    pub status: QueueStatus,
    pub priority: i32,
    pub attempts: i32,
    pub max_attempts: i32,

    pub available_at: chrono::DateTime<chrono::Utc>,
    pub lease_until: Option<chrono::DateTime<chrono::Utc>>,
    pub worker_id: Option<String>,
    pub heartbeat_at: Option<chrono::DateTime<chrono::Utc>>,

    pub last_error: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Action type used for the dedicated loop-aggregation job (§9 Open
/// Question, resolved in `SPEC_FULL.md` Part III item 8).
pub const LOOP_AGGREGATION_ACTION_TYPE: &str = "__loop_aggregation__";
