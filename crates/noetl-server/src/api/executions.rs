//! `GET /executions` and `GET /executions/{id}` (§6): execution listing and
//! the per-execution summary with computed progress (§6 "Progress
//! computation for an execution").

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use noetl_core::Status;
use serde::Serialize;

use crate::api::ErrorResponse;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/executions", get(list_executions))
        .route("/executions/:id", get(get_execution))
}

#[derive(Debug, Serialize)]
pub struct ExecutionRow {
    pub execution_id: String,
    pub path: Option<String>,
    pub version: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// `GET /executions` — executions with a status summary.
#[utoipa::path(
    get,
    path = "/executions",
    responses((status = 200, description = "Known executions")),
    tag = "executions"
)]
pub async fn list_executions(
    State(state): State<AppState>,
) -> Result<Json<Vec<ExecutionRow>>, (StatusCode, Json<ErrorResponse>)> {
    let summaries = state.events.list_executions().await.map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new(e.to_string())),
        )
    })?;
    Ok(Json(
        summaries
            .into_iter()
            .map(|s| ExecutionRow {
                execution_id: s.execution_id,
                path: s.path,
                version: s.version,
                created_at: s.created_at,
            })
            .collect(),
    ))
}

#[derive(Debug, Serialize)]
pub struct ExecutionDetail {
    pub execution_id: String,
    pub path: Option<String>,
    pub version: Option<String>,
    pub status: String,
    /// Percentage, 0.0-100.0 (§6 "Progress computation for an execution").
    pub progress: f64,
    pub events_count: usize,
    pub context: serde_json::Value,
}

/// `GET /executions/{id}` — execution summary with computed progress.
///
/// Status normalization and the progress formula follow §6 literally:
/// `completed`/`failed` executions report 100%; a `running` execution
/// reports `done / total` across the playbook's steps; anything else
/// reports 0%.
#[utoipa::path(
    get,
    path = "/executions/{id}",
    params(("id" = String, Path, description = "Execution id")),
    responses(
        (status = 200, description = "Execution summary"),
        (status = 404, description = "Unknown execution")
    ),
    tag = "executions"
)]
pub async fn get_execution(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
) -> Result<Json<ExecutionDetail>, (StatusCode, Json<ErrorResponse>)> {
    let events = state.events.get_events(&execution_id).await.map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new(e.to_string())),
        )
    })?;
    if events.is_empty() {
        return Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new(format!("unknown execution: {execution_id}"))),
        ));
    }

    let playbook_ref = state.execution_playbook_ref(&execution_id).await.map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new(e.to_string())),
        )
    })?;

    let playbook = match &playbook_ref {
        Some((path, version)) => state.catalog.fetch(path, version).await.ok(),
        None => None,
    };

    let context = noetl_engine::context::build_context(&events, playbook.as_ref(), None)
        .map(|v| v.to_json())
        .unwrap_or(serde_json::Value::Null);

    let failed = state.events.find_error(&execution_id).await.map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new(e.to_string())),
        )
    })?;

    let (status, progress) = if failed.is_some() {
        (Status::Failed, 100.0)
    } else if let Some(playbook) = &playbook {
        let total = playbook.workflow.len();
        let done = playbook
            .workflow
            .iter()
            .filter(|s| {
                events
                    .iter()
                    .any(|e| e.node_name.as_deref() == Some(s.name.as_str()) && e.is_completed())
            })
            .count();
        if total > 0 && done == total {
            (Status::Completed, 100.0)
        } else if done > 0 {
            (Status::Running, (done as f64 / total.max(1) as f64) * 100.0)
        } else {
            (Status::Pending, 0.0)
        }
    } else {
        // No playbook reachable (e.g. catalog unconfigured): fall back to
        // "any completed event seen" rather than a precise step count.
        let any_completed = events.iter().any(|e| e.is_completed());
        if any_completed {
            (Status::Running, 0.0)
        } else {
            (Status::Pending, 0.0)
        }
    };

    let (path, version) = playbook_ref.map(|(p, v)| (Some(p), Some(v))).unwrap_or((None, None));

    Ok(Json(ExecutionDetail {
        execution_id,
        path,
        version,
        status: status.as_str().to_string(),
        progress,
        events_count: events.len(),
        context,
    }))
}
