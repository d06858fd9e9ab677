//! `GET /aggregate/loop/results` (§6): fetch the per-iteration results
//! collected so far for a loop body step, independent of whether
//! `end_loop` aggregation has actually run yet (§4.G).

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use noetl_core::Value;
use noetl_engine::loop_engine::collect_iteration_results;
use serde::{Deserialize, Serialize};

use crate::api::ErrorResponse;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/aggregate/loop/results", get(loop_results))
}

#[derive(Debug, Deserialize)]
pub struct LoopResultsQuery {
    pub execution_id: String,
    pub step_name: String,
}

#[derive(Debug, Serialize)]
pub struct LoopResultsResponse {
    pub results: Vec<Value>,
    pub count: usize,
}

#[utoipa::path(
    get,
    path = "/aggregate/loop/results",
    params(
        ("execution_id" = String, Query, description = "Execution id"),
        ("step_name" = String, Query, description = "Loop body step name")
    ),
    responses((status = 200, description = "Per-iteration results, ordered by iteration index")),
    tag = "aggregate"
)]
pub async fn loop_results(
    State(state): State<AppState>,
    Query(query): Query<LoopResultsQuery>,
) -> Result<Json<LoopResultsResponse>, (StatusCode, Json<ErrorResponse>)> {
    let events = state.events.get_events(&query.execution_id).await.map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new(e.to_string())),
        )
    })?;
    let results = collect_iteration_results(&events, &query.step_name);
    let count = results.len();
    Ok(Json(LoopResultsResponse { results, count }))
}
