//! `/queue/*` (§6): the durable work-queue surface workers lease jobs from
//! and report back to (§4.B WORK QUEUE).

use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use noetl_core::{QueueJob, QueueStatus, Value};
use serde::{Deserialize, Serialize};

use crate::api::ErrorResponse;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/queue/enqueue", post(enqueue))
        .route("/queue/lease", post(lease))
        .route("/queue/:id/complete", post(complete))
        .route("/queue/:id/fail", post(fail))
        .route("/queue/:id/heartbeat", post(heartbeat))
        .route("/queue/reap-expired", post(reap_expired))
        .route("/queue", get(list))
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn store_error(e: impl std::fmt::Display) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new(e.to_string())),
    )
}

#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    pub execution_id: String,
    pub node_id: String,
    pub action: Value,
    pub context: Value,
    pub priority: i32,
    pub max_attempts: i32,
    pub available_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct EnqueueResponse {
    pub id: i64,
}

/// `POST /queue/enqueue` — idempotent by `(execution_id, node_id)` among
/// active rows (§4.B).
#[utoipa::path(
    post,
    path = "/queue/enqueue",
    responses((status = 200, description = "Enqueued (or already-active) job id")),
    tag = "queue"
)]
pub async fn enqueue(
    State(state): State<AppState>,
    Json(body): Json<EnqueueRequest>,
) -> Result<Json<EnqueueResponse>, ApiError> {
    let id = state
        .queue
        .enqueue(
            &body.execution_id,
            &body.node_id,
            body.action,
            body.context,
            body.priority,
            body.max_attempts,
            body.available_at,
        )
        .await
        .map_err(store_error)?;
    Ok(Json(EnqueueResponse { id }))
}

#[derive(Debug, Deserialize)]
pub struct LeaseRequest {
    pub worker_id: String,
    pub lease_seconds: i64,
}

#[derive(Debug, Serialize)]
pub struct LeaseResponse {
    pub job: Option<QueueJob>,
}

/// `POST /queue/lease` — atomically claim the next available job
/// (`SELECT ... FOR UPDATE SKIP LOCKED` on the Postgres backend, §4.B).
#[utoipa::path(
    post,
    path = "/queue/lease",
    responses((status = 200, description = "Leased job, or null if none available")),
    tag = "queue"
)]
pub async fn lease(
    State(state): State<AppState>,
    Json(body): Json<LeaseRequest>,
) -> Result<Json<LeaseResponse>, ApiError> {
    let job = state
        .queue
        .lease(&body.worker_id, body.lease_seconds)
        .await
        .map_err(store_error)?;
    Ok(Json(LeaseResponse { job }))
}

/// `POST /queue/{id}/complete` — marks a leased job `done` and re-triggers
/// the broker for its execution, since a completed job unblocks whatever
/// step was waiting on it.
#[utoipa::path(
    post,
    path = "/queue/{id}/complete",
    params(("id" = i64, Path, description = "Queue row id")),
    responses((status = 200, description = "Marked done")),
    tag = "queue"
)]
pub async fn complete(State(state): State<AppState>, Path(id): Path<i64>) -> Result<StatusCode, ApiError> {
    let job = state.queue.get(id).await.map_err(store_error)?;
    state.queue.complete(id).await.map_err(store_error)?;
    if let Some(job) = job {
        state.scheduler.schedule_evaluation(job.execution_id);
    }
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
pub struct FailRequest {
    pub retry: bool,
    pub retry_delay_seconds: i64,
}

/// `POST /queue/{id}/fail` — marks a job failed, optionally re-queuing it
/// at `now + retry_delay_seconds` (§4.B retry/backoff), and re-triggers the
/// broker so a terminal failure can be observed by the next evaluation.
#[utoipa::path(
    post,
    path = "/queue/{id}/fail",
    params(("id" = i64, Path, description = "Queue row id")),
    responses((status = 200, description = "Marked failed (or re-queued)")),
    tag = "queue"
)]
pub async fn fail(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<FailRequest>,
) -> Result<StatusCode, ApiError> {
    let job = state.queue.get(id).await.map_err(store_error)?;
    state
        .queue
        .fail(id, body.retry, Duration::from_secs(body.retry_delay_seconds.max(0) as u64))
        .await
        .map_err(store_error)?;
    if let Some(job) = job {
        state.scheduler.schedule_evaluation(job.execution_id);
    }
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    pub worker_id: String,
    pub extend_seconds: i64,
}

/// `POST /queue/{id}/heartbeat` — extends a lease (§4.B reaper interplay:
/// a live worker's heartbeat keeps the reaper from reclaiming its job).
#[utoipa::path(
    post,
    path = "/queue/{id}/heartbeat",
    params(("id" = i64, Path, description = "Queue row id")),
    responses((status = 200, description = "Lease extended")),
    tag = "queue"
)]
pub async fn heartbeat(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<HeartbeatRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .queue
        .heartbeat(id, &body.worker_id, body.extend_seconds)
        .await
        .map_err(store_error)?;
    Ok(StatusCode::OK)
}

#[derive(Debug, Serialize)]
pub struct ReapResponse {
    pub reclaimed: u64,
}

/// `POST /queue/reap-expired` — reclaims jobs whose lease expired without a
/// heartbeat, resetting them to `queued` (§4.B reaper).
#[utoipa::path(
    post,
    path = "/queue/reap-expired",
    responses((status = 200, description = "Count of reclaimed jobs")),
    tag = "queue"
)]
pub async fn reap_expired(State(state): State<AppState>) -> Result<Json<ReapResponse>, ApiError> {
    let reclaimed = state.queue.reap_expired().await.map_err(store_error)?;
    Ok(Json(ReapResponse { reclaimed }))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
}

/// `GET /queue?status=` — list jobs, optionally filtered by normalized
/// status.
#[utoipa::path(
    get,
    path = "/queue",
    params(("status" = Option<String>, Query, description = "queued|leased|done|dead")),
    responses((status = 200, description = "Matching jobs")),
    tag = "queue"
)]
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<QueueJob>>, ApiError> {
    let status = match query.status.as_deref() {
        Some("queued") => Some(QueueStatus::Queued),
        Some("leased") => Some(QueueStatus::Leased),
        Some("done") => Some(QueueStatus::Done),
        Some("dead") => Some(QueueStatus::Dead),
        Some(other) => {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new(format!("unknown status filter: {other}"))),
            ))
        }
        None => None,
    };
    let jobs = state.queue.list(status).await.map_err(store_error)?;
    Ok(Json(jobs))
}
