//! Breaks the cyclic reference between the broker and the event emitter
//! (§9 Design Notes: "Cyclic references between broker and event service
//! -> break via a `Scheduler` interface with two methods
//! `schedule_evaluation(execution_id)` and `evaluate_now(execution_id)`,
//! implemented by the broker, consumed by the event emitter").
//!
//! `POST /events` (the emitter) depends on this trait, not directly on
//! `noetl_engine::broker::evaluate`, so the emit path can fire evaluation
//! off without the HTTP caller waiting on a full broker pass.

use std::sync::Arc;

use async_trait::async_trait;
use noetl_engine::broker::{evaluate, Outcome};
use noetl_engine::persistence::{EventStore, QueueStore, WorkflowTableStore};
use noetl_engine::playbook::PlaybookCatalog;
use tracing::{error, instrument, warn};

#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Fire-and-forget: advance `execution_id` without making the caller
    /// (the event emitter) wait on the result.
    fn schedule_evaluation(&self, execution_id: String);

    /// Synchronous: advance `execution_id` and return what happened.
    async fn evaluate_now(&self, execution_id: &str) -> Outcome;
}

/// The only `Scheduler` implementation: resolves the execution's playbook
/// reference, fetches it from the catalog, and runs one broker pass.
pub struct BrokerScheduler {
    events: Arc<dyn EventStore>,
    queue: Arc<dyn QueueStore>,
    tables: Arc<dyn WorkflowTableStore>,
    catalog: Arc<dyn PlaybookCatalog>,
    inline_aggregation_max: usize,
}

impl BrokerScheduler {
    pub fn new(
        events: Arc<dyn EventStore>,
        queue: Arc<dyn QueueStore>,
        tables: Arc<dyn WorkflowTableStore>,
        catalog: Arc<dyn PlaybookCatalog>,
        inline_aggregation_max: usize,
    ) -> Self {
        Self { events, queue, tables, catalog, inline_aggregation_max }
    }

    async fn playbook_ref(&self, execution_id: &str) -> Result<Option<(String, String)>, String> {
        let summaries = self.events.list_executions().await.map_err(|e| e.to_string())?;
        Ok(summaries
            .into_iter()
            .find(|s| s.execution_id == execution_id)
            .and_then(|s| {
                let path = s.path?;
                let version = s.version.unwrap_or_else(|| "latest".to_string());
                Some((path, version))
            }))
    }
}

#[async_trait]
impl Scheduler for BrokerScheduler {
    fn schedule_evaluation(&self, execution_id: String) {
        let events = self.events.clone();
        let queue = self.queue.clone();
        let tables = self.tables.clone();
        let catalog = self.catalog.clone();
        let inline_aggregation_max = self.inline_aggregation_max;
        tokio::spawn(async move {
            let scheduler = BrokerScheduler::new(events, queue, tables, catalog, inline_aggregation_max);
            scheduler.evaluate_now(&execution_id).await;
        });
    }

    #[instrument(skip(self), fields(execution_id = %execution_id))]
    async fn evaluate_now(&self, execution_id: &str) -> Outcome {
        let playbook_ref = match self.playbook_ref(execution_id).await {
            Ok(Some(r)) => r,
            Ok(None) => {
                warn!("no playbook reference recorded for execution; skipping evaluation");
                return Outcome::Stalled("no playbook reference".to_string());
            }
            Err(e) => {
                error!(error = %e, "failed to resolve playbook reference");
                return Outcome::InternalError(e);
            }
        };
        let (path, version) = playbook_ref;
        let playbook = match self.catalog.fetch(&path, &version).await {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, "failed to fetch playbook from catalog");
                return Outcome::InternalError(e.to_string());
            }
        };

        let outcome = evaluate(
            execution_id,
            &playbook,
            self.events.as_ref(),
            self.queue.as_ref(),
            self.tables.as_ref(),
            self.inline_aggregation_max,
        )
        .await;

        // A sub-playbook call's newly started child, or the parent of one
        // that just reached a terminal state, needs its own evaluation
        // pass; the engine has no `Scheduler` of its own, so it reports
        // the peer back here (`noetl_engine::broker::Outcome::NotifyPeer`).
        if let Outcome::NotifyPeer { outcome, peer_execution_id } = outcome {
            self.schedule_evaluation(peer_execution_id);
            return *outcome;
        }

        outcome
    }
}
