//! In-memory event log and work queue, for tests and local development
//! without a live Postgres instance. Internal locking serializes per
//! `execution_id` (events) and globally (queue), mirroring the guarantees
//! the Postgres implementation gets from row locking.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use noetl_core::event::Status;
use noetl_core::{Event, EventType, QueueJob, QueueStatus, Value};
use parking_lot::Mutex;

use super::store::{
    ErrorLogEntry, EventStore, ExecutionSummary, QueueStore, StoreError, TransitionRow,
    WorkbookRow, WorkflowRow, WorkflowTableStore,
};

#[derive(Default)]
struct ExecutionLog {
    events: Vec<Event>,
    workload: Option<Value>,
    path: Option<String>,
    version: Option<String>,
    created_at: Option<chrono::DateTime<Utc>>,
}

/// An in-memory event log, work queue, and workflow-table projection.
///
/// All four traits (`EventStore`, `QueueStore`, `WorkflowTableStore`) are
/// implemented on one struct because, unlike Postgres, there is no
/// separate connection pool to share — everything lives behind one set of
/// locks.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    executions: Arc<DashMap<String, Mutex<ExecutionLog>>>,
    error_log: Arc<Mutex<Vec<ErrorLogEntry>>>,
    queue: Arc<DashMap<i64, QueueJob>>,
    queue_seq: Arc<AtomicI64>,
    workflow_rows: Arc<Mutex<Vec<WorkflowRow>>>,
    transition_rows: Arc<Mutex<Vec<TransitionRow>>>,
    workbook_rows: Arc<Mutex<Vec<WorkbookRow>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for InMemoryStore {
    async fn emit(&self, event: Event) -> Result<(), StoreError> {
        let entry = self
            .executions
            .entry(event.execution_id.clone())
            .or_insert_with(|| Mutex::new(ExecutionLog::default()));
        let mut log = entry.lock();

        if let Some(existing) = log
            .events
            .iter_mut()
            .find(|e| e.event_id == event.event_id)
        {
            *existing = event.clone();
        } else {
            log.events.push(event.clone());
        }

        if event.event_type.is(EventType::EXECUTION_START) {
            if log.created_at.is_none() {
                log.created_at = Some(event.timestamp);
            }
            if let Some(ctx) = &event.input_context {
                if let Some(workload) = ctx.get_path("workload") {
                    log.workload = Some(workload.clone());
                }
                if let Some(path) = ctx.get_path("path").and_then(|v| v.as_str()) {
                    log.path = Some(path.to_string());
                }
                if let Some(version) = ctx.get_path("version").and_then(|v| v.as_str()) {
                    log.version = Some(version.to_string());
                }
            }
        }

        if event.status == Status::Failed {
            self.error_log.lock().push(ErrorLogEntry {
                execution_id: event.execution_id.clone(),
                event_id: event.event_id.clone(),
                node_name: event.node_name.clone(),
                message: event.error.clone().unwrap_or_else(|| "unknown error".to_string()),
                severity: "error".to_string(),
                created_at: event.timestamp,
            });
        }

        Ok(())
    }

    async fn get_events(&self, execution_id: &str) -> Result<Vec<Event>, StoreError> {
        let Some(entry) = self.executions.get(execution_id) else {
            return Ok(vec![]);
        };
        let mut events = entry.lock().events.clone();
        events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.insertion_rank.cmp(&b.insertion_rank)));
        Ok(events)
    }

    async fn get_latest_by_step(
        &self,
        execution_id: &str,
        node_name: &str,
    ) -> Result<Option<Event>, StoreError> {
        let events = self.get_events(execution_id).await?;
        Ok(events
            .into_iter()
            .filter(|e| e.node_name.as_deref() == Some(node_name))
            .max_by_key(|e| (e.timestamp, e.insertion_rank)))
    }

    async fn find_error(&self, execution_id: &str) -> Result<Option<Event>, StoreError> {
        let events = self.get_events(execution_id).await?;
        Ok(events.into_iter().find(|e| e.status == Status::Failed))
    }

    async fn get_workload(&self, execution_id: &str) -> Result<Option<Value>, StoreError> {
        Ok(self
            .executions
            .get(execution_id)
            .and_then(|e| e.lock().workload.clone()))
    }

    async fn list_executions(&self) -> Result<Vec<ExecutionSummary>, StoreError> {
        Ok(self
            .executions
            .iter()
            .map(|entry| {
                let log = entry.value().lock();
                ExecutionSummary {
                    execution_id: entry.key().clone(),
                    path: log.path.clone(),
                    version: log.version.clone(),
                    created_at: log.created_at.unwrap_or_else(Utc::now),
                }
            })
            .collect())
    }
}

#[async_trait]
impl QueueStore for InMemoryStore {
    async fn enqueue(
        &self,
        execution_id: &str,
        node_id: &str,
        action: Value,
        input_context: Value,
        priority: i32,
        max_attempts: i32,
        available_at: chrono::DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        if let Some(existing) = self.find_active(execution_id, node_id).await? {
            return Ok(existing.queue_id);
        }

        let queue_id = self.queue_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let now = Utc::now();
        let job = QueueJob {
            queue_id,
            execution_id: execution_id.to_string(),
            node_id: node_id.to_string(),
            action,
            input_context,
            status: QueueStatus::Queued,
            priority,
            attempts: 0,
            max_attempts,
            available_at,
            lease_until: None,
            worker_id: None,
            heartbeat_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        self.queue.insert(queue_id, job);
        Ok(queue_id)
    }

    async fn lease(&self, worker_id: &str, lease_seconds: i64) -> Result<Option<QueueJob>, StoreError> {
        let now = Utc::now();
        let mut candidates: Vec<QueueJob> = self
            .queue
            .iter()
            .filter(|e| e.status == QueueStatus::Queued && e.available_at <= now)
            .map(|e| e.value().clone())
            .collect();

        // Highest priority first, then lowest queue_id (FIFO within a priority tier).
        candidates.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.queue_id.cmp(&b.queue_id)));

        let Some(mut chosen) = candidates.into_iter().next() else {
            return Ok(None);
        };

        chosen.status = QueueStatus::Leased;
        chosen.worker_id = Some(worker_id.to_string());
        chosen.lease_until = Some(now + chrono::Duration::seconds(lease_seconds));
        chosen.heartbeat_at = Some(now);
        chosen.attempts += 1;
        chosen.updated_at = now;

        self.queue.insert(chosen.queue_id, chosen.clone());
        Ok(Some(chosen))
    }

    async fn complete(&self, queue_id: i64) -> Result<(), StoreError> {
        let mut job = self
            .queue
            .get_mut(&queue_id)
            .ok_or(StoreError::QueueJobNotFound(queue_id))?;
        if job.status != QueueStatus::Done {
            job.status = QueueStatus::Done;
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn fail(
        &self,
        queue_id: i64,
        retry: bool,
        retry_delay: std::time::Duration,
    ) -> Result<(), StoreError> {
        let mut job = self
            .queue
            .get_mut(&queue_id)
            .ok_or(StoreError::QueueJobNotFound(queue_id))?;

        if retry && job.attempts < job.max_attempts {
            job.status = QueueStatus::Queued;
            job.available_at = Utc::now() + chrono::Duration::from_std(retry_delay).unwrap_or_default();
            job.worker_id = None;
            job.lease_until = None;
        } else {
            job.status = QueueStatus::Dead;
        }
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn heartbeat(
        &self,
        queue_id: i64,
        worker_id: &str,
        extend_seconds: i64,
    ) -> Result<(), StoreError> {
        let mut job = self
            .queue
            .get_mut(&queue_id)
            .ok_or(StoreError::QueueJobNotFound(queue_id))?;

        if job.worker_id.as_deref() != Some(worker_id) {
            return Err(StoreError::LeaseNotHeld {
                queue_id,
                worker_id: worker_id.to_string(),
            });
        }

        let now = Utc::now();
        job.heartbeat_at = Some(now);
        job.lease_until = Some(now + chrono::Duration::seconds(extend_seconds));
        job.updated_at = now;
        Ok(())
    }

    async fn reap_expired(&self) -> Result<u64, StoreError> {
        let now = Utc::now();
        let mut reclaimed = 0u64;
        for mut entry in self.queue.iter_mut() {
            if entry.status == QueueStatus::Leased {
                if let Some(lease_until) = entry.lease_until {
                    if lease_until < now {
                        entry.status = QueueStatus::Queued;
                        entry.worker_id = None;
                        entry.lease_until = None;
                        entry.updated_at = now;
                        reclaimed += 1;
                    }
                }
            }
        }
        Ok(reclaimed)
    }

    async fn find_active(&self, execution_id: &str, node_id: &str) -> Result<Option<QueueJob>, StoreError> {
        Ok(self
            .queue
            .iter()
            .find(|e| e.execution_id == execution_id && e.node_id == node_id && e.status.is_active())
            .map(|e| e.value().clone()))
    }

    async fn list(&self, status: Option<QueueStatus>) -> Result<Vec<QueueJob>, StoreError> {
        let mut jobs: Vec<QueueJob> = self
            .queue
            .iter()
            .filter(|e| status.map(|s| e.status == s).unwrap_or(true))
            .map(|e| e.value().clone())
            .collect();
        jobs.sort_by_key(|j| j.queue_id);
        Ok(jobs)
    }

    async fn get(&self, queue_id: i64) -> Result<Option<QueueJob>, StoreError> {
        Ok(self.queue.get(&queue_id).map(|e| e.value().clone()))
    }
}

#[async_trait]
impl WorkflowTableStore for InMemoryStore {
    async fn upsert_workflow_rows(&self, rows: Vec<WorkflowRow>) -> Result<(), StoreError> {
        let mut existing = self.workflow_rows.lock();
        for row in rows {
            if let Some(slot) = existing
                .iter_mut()
                .find(|r| r.execution_id == row.execution_id && r.step_name == row.step_name)
            {
                *slot = row;
            } else {
                existing.push(row);
            }
        }
        Ok(())
    }

    async fn upsert_transition_rows(&self, rows: Vec<TransitionRow>) -> Result<(), StoreError> {
        for row in rows {
            self.upsert_transition(row).await?;
        }
        Ok(())
    }

    async fn upsert_workbook_rows(&self, rows: Vec<WorkbookRow>) -> Result<(), StoreError> {
        let mut existing = self.workbook_rows.lock();
        for row in rows {
            if let Some(slot) = existing
                .iter_mut()
                .find(|r| r.execution_id == row.execution_id && r.task_name == row.task_name)
            {
                *slot = row;
            } else {
                existing.push(row);
            }
        }
        Ok(())
    }

    async fn upsert_transition(&self, row: TransitionRow) -> Result<(), StoreError> {
        let mut existing = self.transition_rows.lock();
        if let Some(slot) = existing.iter_mut().find(|r| {
            r.execution_id == row.execution_id
                && r.from_step == row.from_step
                && r.to_step == row.to_step
        }) {
            *slot = row;
        } else {
            existing.push(row);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use noetl_core::ids::new_event_id;

    fn event(execution_id: &str, node_name: &str, status: Status) -> Event {
        Event {
            event_id: new_event_id(),
            parent_event_id: None,
            execution_id: execution_id.to_string(),
            parent_execution_id: None,
            timestamp: Utc::now(),
            insertion_rank: 0,
            event_type: EventType::new(EventType::ACTION_COMPLETED),
            status,
            node_id: Some(node_name.to_string()),
            node_name: Some(node_name.to_string()),
            node_type: None,
            input_context: None,
            output_result: None,
            metadata: None,
            loop_fields: Default::default(),
            error: None,
        }
    }

    #[tokio::test]
    async fn emit_is_idempotent() {
        let store = InMemoryStore::new();
        let e = event("exec-1", "a", Status::Completed);
        store.emit(e.clone()).await.unwrap();
        store.emit(e.clone()).await.unwrap();
        let events = store.get_events("exec-1").await.unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn enqueue_is_idempotent_while_active() {
        let store = InMemoryStore::new();
        let id1 = store
            .enqueue("exec-1", "node-a", Value::Null, Value::Null, 0, 5, Utc::now())
            .await
            .unwrap();
        let id2 = store
            .enqueue("exec-1", "node-a", Value::Null, Value::Null, 0, 5, Utc::now())
            .await
            .unwrap();
        assert_eq!(id1, id2);
    }

    #[tokio::test]
    async fn lease_then_fail_then_lease_increments_attempts() {
        let store = InMemoryStore::new();
        let id = store
            .enqueue("exec-1", "node-a", Value::Null, Value::Null, 0, 5, Utc::now())
            .await
            .unwrap();

        let job = store.lease("w1", 60).await.unwrap().unwrap();
        assert_eq!(job.queue_id, id);
        assert_eq!(job.attempts, 1);

        store.fail(id, true, std::time::Duration::from_secs(0)).await.unwrap();

        let job2 = store.lease("w2", 60).await.unwrap().unwrap();
        assert_eq!(job2.queue_id, id);
        assert_eq!(job2.attempts, 2);
    }

    #[tokio::test]
    async fn reap_expired_reclaims_only_expired_leases() {
        let store = InMemoryStore::new();
        let id = store
            .enqueue("exec-1", "node-a", Value::Null, Value::Null, 0, 5, Utc::now())
            .await
            .unwrap();
        let job = store.lease("w1", 0).await.unwrap().unwrap();
        assert_eq!(job.queue_id, id);

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let reclaimed = store.reap_expired().await.unwrap();
        assert_eq!(reclaimed, 1);

        let job2 = store.lease("w2", 60).await.unwrap().unwrap();
        assert_eq!(job2.attempts, 2);
    }

    #[tokio::test]
    async fn reap_expired_is_noop_on_fresh_lease() {
        let store = InMemoryStore::new();
        store
            .enqueue("exec-1", "node-a", Value::Null, Value::Null, 0, 5, Utc::now())
            .await
            .unwrap();
        store.lease("w1", 3600).await.unwrap();
        let reclaimed = store.reap_expired().await.unwrap();
        assert_eq!(reclaimed, 0);
    }

    #[tokio::test]
    async fn priority_ordering_with_fifo_tiebreak() {
        let store = InMemoryStore::new();
        let low = store
            .enqueue("exec-1", "a", Value::Null, Value::Null, 0, 5, Utc::now())
            .await
            .unwrap();
        let high = store
            .enqueue("exec-1", "b", Value::Null, Value::Null, 10, 5, Utc::now())
            .await
            .unwrap();
        let job = store.lease("w1", 60).await.unwrap().unwrap();
        assert_eq!(job.queue_id, high);
        let _ = low;
    }
}
