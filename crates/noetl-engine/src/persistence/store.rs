//! Store traits: the durable interfaces the rest of the kernel is written
//! against. §4.A EVENT LOG and §4.B WORK QUEUE describe the operations;
//! this module turns them into `async_trait` interfaces with two
//! implementations (`memory`, `postgres`).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use noetl_core::{Event, QueueJob, QueueStatus, Value};
use thiserror::Error;

/// Errors raised by either store implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("execution not found: {0}")]
    ExecutionNotFound(String),

    #[error("queue job not found: {0}")]
    QueueJobNotFound(i64),

    #[error("lease no longer held by worker {worker_id} for job {queue_id}")]
    LeaseNotHeld { queue_id: i64, worker_id: String },
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// A record in the `error_log` side table (§4.A `emit`: "If the event is an
/// error, additionally record in a side-table `error_log`").
#[derive(Debug, Clone)]
pub struct ErrorLogEntry {
    pub execution_id: String,
    pub event_id: String,
    pub node_name: Option<String>,
    pub message: String,
    pub severity: String,
    pub created_at: DateTime<Utc>,
}

/// The event log: the sole source of durable execution truth.
#[async_trait]
pub trait EventStore: Send + Sync + 'static {
    /// Upsert by `(execution_id, event_id)`. Idempotent: re-emitting the
    /// same event is a no-op on the second call. If `event.event_type` is
    /// `execution_start`, the initial workload is upserted atomically with
    /// the event write. If the event's normalized status is `failed`, a
    /// companion row is written to the error log.
    async fn emit(&self, event: Event) -> Result<(), StoreError>;

    /// All events for an execution, ordered by `(timestamp, insertion_rank)`.
    async fn get_events(&self, execution_id: &str) -> Result<Vec<Event>, StoreError>;

    /// The latest-by-timestamp event recorded for `node_name`, if any.
    async fn get_latest_by_step(
        &self,
        execution_id: &str,
        node_name: &str,
    ) -> Result<Option<Event>, StoreError>;

    /// The earliest event with normalized status `failed`, if any.
    async fn find_error(&self, execution_id: &str) -> Result<Option<Event>, StoreError>;

    /// The initial workload recorded at `execution_start`, if the
    /// execution exists.
    async fn get_workload(&self, execution_id: &str) -> Result<Option<Value>, StoreError>;

    /// List known executions with their originating playbook reference.
    async fn list_executions(&self) -> Result<Vec<ExecutionSummary>, StoreError>;
}

/// Minimal execution header, independent of the full event replay.
#[derive(Debug, Clone)]
pub struct ExecutionSummary {
    pub execution_id: String,
    pub path: Option<String>,
    pub version: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The durable, lease-based work queue.
#[async_trait]
pub trait QueueStore: Send + Sync + 'static {
    /// Idempotent keyed by `(execution_id, node_id)`: if an active
    /// (`queued`/`leased`) row already exists for that key, its id is
    /// returned and no new row is inserted.
    #[allow(clippy::too_many_arguments)]
    async fn enqueue(
        &self,
        execution_id: &str,
        node_id: &str,
        action: Value,
        input_context: Value,
        priority: i32,
        max_attempts: i32,
        available_at: DateTime<Utc>,
    ) -> Result<i64, StoreError>;

    /// Atomically claim the highest-priority `queued` row whose
    /// `available_at <= now`, ties broken by `queue_id` (FIFO).
    async fn lease(&self, worker_id: &str, lease_seconds: i64) -> Result<Option<QueueJob>, StoreError>;

    /// Mark a job done. Idempotent on already-terminal rows.
    async fn complete(&self, queue_id: i64) -> Result<(), StoreError>;

    /// Fail a job. Retries (with `available_at = now + retry_delay`) while
    /// `attempts < max_attempts`, otherwise marks the row `dead`.
    async fn fail(
        &self,
        queue_id: i64,
        retry: bool,
        retry_delay: std::time::Duration,
    ) -> Result<(), StoreError>;

    /// Extend a lease. Fails if `worker_id` is not the current lease holder.
    async fn heartbeat(
        &self,
        queue_id: i64,
        worker_id: &str,
        extend_seconds: i64,
    ) -> Result<(), StoreError>;

    /// Reset all expired leases back to `queued`, preserving `attempts`.
    /// Returns the number of rows reclaimed.
    async fn reap_expired(&self) -> Result<u64, StoreError>;

    /// Look up the active (queued/leased) job for `(execution_id, node_id)`,
    /// used by the broker's enqueue dedup guard.
    async fn find_active(&self, execution_id: &str, node_id: &str) -> Result<Option<QueueJob>, StoreError>;

    /// Introspection: list jobs, optionally filtered by status.
    async fn list(&self, status: Option<QueueStatus>) -> Result<Vec<QueueJob>, StoreError>;

    async fn get(&self, queue_id: i64) -> Result<Option<QueueJob>, StoreError>;
}

/// A denormalized row of the materialized `workflow` table (§3).
#[derive(Debug, Clone)]
pub struct WorkflowRow {
    pub execution_id: String,
    pub step_id: i64,
    pub step_name: String,
    pub step_type: Option<String>,
    pub description: Option<String>,
    pub raw_config: Value,
}

/// A denormalized row of the materialized `transition` table (§3, §4.F step 7).
#[derive(Debug, Clone)]
pub struct TransitionRow {
    pub execution_id: String,
    pub from_step: String,
    pub to_step: String,
    pub condition: Option<String>,
    pub with_params: Option<Value>,
}

/// A denormalized row of the materialized `workbook` table (§3).
#[derive(Debug, Clone)]
pub struct WorkbookRow {
    pub execution_id: String,
    pub task_id: i64,
    pub task_name: String,
    pub task_type: Option<String>,
    pub raw_config: Value,
}

/// Read-mostly projections of a playbook, materialized once at
/// `execution_start` (§3, §4.E). Writes are best-effort upserts; failures
/// never block scheduling (§4.F step 3: "best-effort").
#[async_trait]
pub trait WorkflowTableStore: Send + Sync + 'static {
    async fn upsert_workflow_rows(&self, rows: Vec<WorkflowRow>) -> Result<(), StoreError>;
    async fn upsert_transition_rows(&self, rows: Vec<TransitionRow>) -> Result<(), StoreError>;
    async fn upsert_workbook_rows(&self, rows: Vec<WorkbookRow>) -> Result<(), StoreError>;
    async fn upsert_transition(&self, row: TransitionRow) -> Result<(), StoreError>;
}
