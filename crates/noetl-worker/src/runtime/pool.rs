//! Worker pool: drives [`TaskPoller`] and dispatches leased jobs to the
//! [`ExecutorRegistry`] with bounded concurrency (§4.H, §5 CONCURRENCY &
//! RESOURCE MODEL).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use noetl_core::{new_event_id, Event, EventType, LoopFields, QueueJob, Status};
use noetl_engine::persistence::{EventStore, QueueStore, StoreError};
use noetl_engine::reliability::RetryPolicy;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::actions::{ActionError, ExecutorRegistry};
use super::backpressure::{BackpressureConfig, BackpressureState};
use super::poller::{PollerConfig, PollerError, TaskPoller};

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    pub worker_id: String,
    pub max_concurrency: usize,
    pub backpressure: BackpressureConfig,
    pub poller: PollerConfig,
    #[serde(with = "duration_millis")]
    pub heartbeat_interval: Duration,
    #[serde(with = "duration_millis")]
    pub shutdown_timeout: Duration,
    pub retry_policy: RetryPolicy,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::now_v7()),
            max_concurrency: 10,
            backpressure: BackpressureConfig::default(),
            poller: PollerConfig::default(),
            heartbeat_interval: Duration::from_secs(15),
            shutdown_timeout: Duration::from_secs(30),
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl WorkerPoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    pub fn with_backpressure(mut self, config: BackpressureConfig) -> Self {
        self.backpressure = config;
        self
    }

    pub fn with_poller(mut self, config: PollerConfig) -> Self {
        self.poller = config;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPoolStatus {
    Starting,
    Running,
    Draining,
    Stopped,
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerPoolError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("poller error: {0}")]
    Poller(#[from] PollerError),

    #[error("worker pool is already running")]
    AlreadyRunning,

    #[error("graceful shutdown timed out")]
    ShutdownTimeout,
}

/// Drives the poll/execute/report loop described in §4.H: lease a job,
/// heartbeat its lease while executing, emit `action_started` then
/// `action_completed`/`action_error`, and ack the queue row with a retry
/// decision.
pub struct WorkerPool {
    queue: Arc<dyn QueueStore>,
    events: Arc<dyn EventStore>,
    executors: Arc<ExecutorRegistry>,
    config: WorkerPoolConfig,
    backpressure: Arc<BackpressureState>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    status: std::sync::RwLock<WorkerPoolStatus>,
    active_tasks: Arc<Semaphore>,
    poll_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<dyn QueueStore>,
        events: Arc<dyn EventStore>,
        executors: Arc<ExecutorRegistry>,
        config: WorkerPoolConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let backpressure = Arc::new(BackpressureState::new(
            config.backpressure.clone(),
            config.max_concurrency,
        ));

        Self {
            queue,
            events,
            executors,
            active_tasks: Arc::new(Semaphore::new(config.max_concurrency)),
            config,
            backpressure,
            shutdown_tx,
            shutdown_rx,
            status: std::sync::RwLock::new(WorkerPoolStatus::Stopped),
            poll_handle: std::sync::Mutex::new(None),
        }
    }

    #[instrument(skip(self), fields(worker_id = %self.config.worker_id))]
    pub async fn start(&self) -> Result<(), WorkerPoolError> {
        {
            let status = *self.status.read().unwrap();
            if status == WorkerPoolStatus::Running {
                return Err(WorkerPoolError::AlreadyRunning);
            }
        }

        info!(
            worker_id = %self.config.worker_id,
            max_concurrency = self.config.max_concurrency,
            "starting worker pool"
        );

        *self.status.write().unwrap() = WorkerPoolStatus::Running;
        self.start_poll_loop();
        Ok(())
    }

    #[instrument(skip(self), fields(worker_id = %self.config.worker_id))]
    pub async fn shutdown(&self) -> Result<(), WorkerPoolError> {
        {
            let status = *self.status.read().unwrap();
            if status == WorkerPoolStatus::Stopped {
                return Ok(());
            }
        }

        info!(worker_id = %self.config.worker_id, "initiating graceful shutdown");
        *self.status.write().unwrap() = WorkerPoolStatus::Draining;
        let _ = self.shutdown_tx.send(true);

        let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout;
        loop {
            if self.active_tasks.available_permits() == self.config.max_concurrency {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!("shutdown timeout reached with tasks still in flight");
                return Err(WorkerPoolError::ShutdownTimeout);
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        *self.status.write().unwrap() = WorkerPoolStatus::Stopped;
        info!(worker_id = %self.config.worker_id, "worker pool stopped");
        Ok(())
    }

    pub fn status(&self) -> WorkerPoolStatus {
        *self.status.read().unwrap()
    }

    pub fn worker_id(&self) -> &str {
        &self.config.worker_id
    }

    fn start_poll_loop(&self) {
        let queue = Arc::clone(&self.queue);
        let events = Arc::clone(&self.events);
        let executors = Arc::clone(&self.executors);
        let config = self.config.clone();
        let backpressure = Arc::clone(&self.backpressure);
        let active_tasks = Arc::clone(&self.active_tasks);
        let shutdown_rx = self.shutdown_rx.clone();

        let handle = tokio::spawn(async move {
            let mut poller = TaskPoller::new(
                queue.clone(),
                config.worker_id.clone(),
                config.poller.clone(),
                shutdown_rx.clone(),
            );

            loop {
                if poller.is_shutdown() {
                    debug!("poll loop: shutdown requested");
                    break;
                }

                if !backpressure.should_accept() {
                    if poller.wait().await {
                        break;
                    }
                    continue;
                }

                let permit = match active_tasks.clone().try_acquire_owned() {
                    Ok(p) => p,
                    Err(_) => {
                        if poller.wait().await {
                            break;
                        }
                        continue;
                    }
                };

                match poller.poll().await {
                    Ok(Some(job)) => {
                        backpressure.task_started();
                        let queue = Arc::clone(&queue);
                        let events = Arc::clone(&events);
                        let executors = Arc::clone(&executors);
                        let worker_id = config.worker_id.clone();
                        let heartbeat_interval = config.heartbeat_interval;
                        let retry_policy = config.retry_policy.clone();
                        let bp = Arc::clone(&backpressure);
                        let mut job_shutdown_rx = shutdown_rx.clone();

                        tokio::spawn(async move {
                            run_job(
                                job,
                                queue,
                                events,
                                executors,
                                worker_id,
                                heartbeat_interval,
                                &retry_policy,
                                &mut job_shutdown_rx,
                            )
                            .await;
                            bp.task_completed();
                            drop(permit);
                        });
                    }
                    Ok(None) => {
                        drop(permit);
                        if poller.wait().await {
                            break;
                        }
                    }
                    Err(e) => {
                        drop(permit);
                        error!(error = %e, "poll error");
                        if poller.wait().await {
                            break;
                        }
                    }
                }
            }

            debug!("poll loop exited");
        });

        *self.poll_handle.lock().unwrap() = Some(handle);
    }
}

/// Executes one leased job end to end: heartbeat task, action dispatch,
/// event emission with lineage, and the complete/fail ack (§4.H steps 2-4).
async fn run_job(
    job: QueueJob,
    queue: Arc<dyn QueueStore>,
    events: Arc<dyn EventStore>,
    executors: Arc<ExecutorRegistry>,
    worker_id: String,
    heartbeat_interval: Duration,
    retry_policy: &RetryPolicy,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    let queue_id = job.queue_id;
    let execution_id = job.execution_id.clone();
    let node_id = job.node_id.clone();
    let attempt = job.attempts;

    let heartbeat_queue = Arc::clone(&queue);
    let heartbeat_worker_id = worker_id.clone();
    let heartbeat_extend = (heartbeat_interval.as_secs() as i64 * 4).max(30);
    let mut heartbeat_shutdown = shutdown_rx.clone();
    let heartbeat_handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(heartbeat_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = heartbeat_queue
                        .heartbeat(queue_id, &heartbeat_worker_id, heartbeat_extend)
                        .await
                    {
                        warn!(queue_id, error = %e, "heartbeat failed");
                    }
                }
                _ = heartbeat_shutdown.changed() => break,
            }
        }
    });

    let started = Event {
        event_id: new_event_id(),
        parent_event_id: None,
        execution_id: execution_id.clone(),
        parent_execution_id: None,
        timestamp: Utc::now(),
        insertion_rank: 0,
        event_type: EventType::new(EventType::ACTION_STARTED),
        status: Status::Running,
        node_id: Some(node_id.clone()),
        node_name: None,
        node_type: None,
        input_context: Some(job.input_context.clone()),
        output_result: None,
        metadata: None,
        loop_fields: LoopFields::default(),
        error: None,
    };
    if let Err(e) = events.emit(started).await {
        error!(queue_id, error = %e, "failed to emit action_started event");
    }

    let outcome = executors.execute(&job.action, &job.input_context).await;

    heartbeat_handle.abort();

    match outcome {
        Ok(result) if result.is_success() => {
            let completed = Event {
                event_id: new_event_id(),
                parent_event_id: None,
                execution_id: execution_id.clone(),
                parent_execution_id: None,
                timestamp: Utc::now(),
                insertion_rank: 0,
                event_type: EventType::new(EventType::ACTION_COMPLETED),
                status: Status::Completed,
                node_id: Some(node_id.clone()),
                node_name: None,
                node_type: None,
                input_context: None,
                output_result: result.data,
                metadata: None,
                loop_fields: LoopFields::default(),
                error: None,
            };
            if let Err(e) = events.emit(completed).await {
                error!(queue_id, error = %e, "failed to emit action_completed event");
            }
            if let Err(e) = queue.complete(queue_id).await {
                error!(queue_id, error = %e, "failed to ack queue completion");
            }
        }
        Ok(result) => {
            emit_and_fail(
                &*events,
                &*queue,
                &execution_id,
                &node_id,
                queue_id,
                result.error.unwrap_or_default(),
                false,
                attempt,
                retry_policy,
            )
            .await;
        }
        Err(err) => {
            let retryable = err.retryable();
            emit_and_fail(
                &*events,
                &*queue,
                &execution_id,
                &node_id,
                queue_id,
                err.to_string(),
                retryable,
                attempt,
                retry_policy,
            )
            .await;
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn emit_and_fail(
    events: &dyn EventStore,
    queue: &dyn QueueStore,
    execution_id: &str,
    node_id: &str,
    queue_id: i64,
    message: String,
    retry: bool,
    attempt: i32,
    retry_policy: &RetryPolicy,
) {
    let error_event = Event {
        event_id: new_event_id(),
        parent_event_id: None,
        execution_id: execution_id.to_string(),
        parent_execution_id: None,
        timestamp: Utc::now(),
        insertion_rank: 0,
        event_type: EventType::new(EventType::ACTION_ERROR),
        status: Status::Failed,
        node_id: Some(node_id.to_string()),
        node_name: None,
        node_type: None,
        input_context: None,
        output_result: None,
        metadata: None,
        loop_fields: LoopFields::default(),
        error: Some(message.clone()),
    };
    if let Err(e) = events.emit(error_event).await {
        error!(queue_id, error = %e, "failed to emit action_error event");
    }
    let retry_delay = retry_policy.delay_for_attempt(attempt as u32 + 1);
    if let Err(e) = queue.fail(queue_id, retry, retry_delay).await {
        error!(queue_id, error = %e, "failed to ack queue failure");
    }
}

/// Keeps the `ActionError` retryable-classification API referenced here
/// even when a build registers no executor that ever returns one.
#[allow(dead_code)]
fn _assert_action_error_used(_e: &ActionError) {}

/// Serde support for `Duration` as milliseconds.
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = WorkerPoolConfig::default();
        assert!(!config.worker_id.is_empty());
        assert_eq!(config.max_concurrency, 10);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(15));
    }

    #[test]
    fn config_builder() {
        let config = WorkerPoolConfig::new()
            .with_worker_id("test-worker")
            .with_max_concurrency(20);
        assert_eq!(config.worker_id, "test-worker");
        assert_eq!(config.max_concurrency, 20);
    }

    #[test]
    fn worker_pool_status_equality() {
        assert_ne!(WorkerPoolStatus::Running, WorkerPoolStatus::Stopped);
        assert_ne!(WorkerPoolStatus::Draining, WorkerPoolStatus::Running);
    }
}
