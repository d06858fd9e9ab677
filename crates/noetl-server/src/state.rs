//! Shared application state: the store trait objects every route handler
//! reads and writes through (§3 Ownership: "the event log owns truth; the
//! broker reads it").

use std::sync::Arc;

use noetl_engine::persistence::{EventStore, QueueStore, StoreError, WorkflowTableStore};
use noetl_engine::playbook::PlaybookCatalog;

use crate::scheduler::Scheduler;

/// Shared across every route handler, cloned cheaply (every field is an
/// `Arc`).
#[derive(Clone)]
pub struct AppState {
    pub events: Arc<dyn EventStore>,
    pub queue: Arc<dyn QueueStore>,
    pub tables: Arc<dyn WorkflowTableStore>,
    pub catalog: Arc<dyn PlaybookCatalog>,
    pub scheduler: Arc<dyn Scheduler>,
    pub inline_aggregation_max: usize,
}

impl AppState {
    /// The `(path, version)` an execution was started against, looked up
    /// via `list_executions` since the event log exposes no single-row
    /// execution header fetch (§3: executions are a derived view over the
    /// event log, not a first-class row with its own getter).
    pub async fn execution_playbook_ref(
        &self,
        execution_id: &str,
    ) -> Result<Option<(String, String)>, StoreError> {
        let summaries = self.events.list_executions().await?;
        Ok(summaries.into_iter().find(|s| s.execution_id == execution_id).and_then(|s| {
            let path = s.path?;
            let version = s.version.unwrap_or_else(|| "latest".to_string());
            Some((path, version))
        }))
    }
}
