//! `POST /events` and `GET /events/by-execution/{id}` (§6): the event log
//! emit/read surface. `POST /events` is the endpoint that re-triggers the
//! broker (§2 data/control flow: "Every event emission to A re-triggers F
//! for that execution").

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use noetl_core::Event;
use serde::Serialize;

use crate::api::ErrorResponse;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/events", post(emit_event))
        .route("/events/by-execution/:execution_id", get(list_events))
}

/// `POST /events` — emit an event; upsert is idempotent by
/// `(execution_id, event_id)` (§4.A). Body is a raw [`Event`] record;
/// the response echoes it back once upserted.
#[utoipa::path(
    post,
    path = "/events",
    responses(
        (status = 200, description = "Upserted event, echoed back"),
        (status = 500, description = "Store error")
    ),
    tag = "events"
)]
pub async fn emit_event(
    State(state): State<AppState>,
    Json(event): Json<Event>,
) -> Result<Json<Event>, (StatusCode, Json<ErrorResponse>)> {
    let execution_id = event.execution_id.clone();
    state.events.emit(event.clone()).await.map_err(|e| {
        tracing::error!(error = %e, "failed to emit event");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new(e.to_string())),
        )
    })?;

    // Re-trigger the broker without making the caller wait on a full
    // evaluation pass (§9 Design Notes: Scheduler interface).
    state.scheduler.schedule_evaluation(execution_id);

    Ok(Json(event))
}

#[derive(Debug, Serialize)]
pub struct EventsResponse {
    pub events: Vec<Event>,
}

/// `GET /events/by-execution/{execution_id}` — the ordered event log for
/// one execution (§4.A `get_events`).
#[utoipa::path(
    get,
    path = "/events/by-execution/{execution_id}",
    params(("execution_id" = String, Path, description = "Execution id")),
    responses((status = 200, description = "Events for the execution")),
    tag = "events"
)]
pub async fn list_events(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
) -> Result<Json<EventsResponse>, (StatusCode, Json<ErrorResponse>)> {
    let events = state.events.get_events(&execution_id).await.map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new(e.to_string())),
        )
    })?;
    Ok(Json(EventsResponse { events }))
}
