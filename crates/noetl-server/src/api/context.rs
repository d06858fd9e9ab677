//! `POST /context/render` (§6): render a template against an execution's
//! reconstructed context, for tooling that wants to preview a rendered
//! value without running an actual step.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use noetl_core::Value;
use noetl_engine::template::{render_value, Mode};
use serde::{Deserialize, Serialize};

use crate::api::ErrorResponse;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/context/render", post(render))
}

#[derive(Debug, Deserialize)]
pub struct RenderRequest {
    pub execution_id: String,
    pub template: Value,
    #[serde(default)]
    pub extra_context: Option<Value>,
    #[serde(default)]
    pub strict: bool,
}

#[derive(Debug, Serialize)]
pub struct RenderResponse {
    pub rendered: Value,
    pub context_keys: Vec<String>,
}

/// Builds the execution's context (§4.C) the same way the broker does,
/// then renders `template` against it. `strict: true` raises on undefined
/// references instead of passing the literal template text through
/// (§9 Design Notes: explicit `/context/render` calls with `strict: true`
/// use [`Mode::Strict`]; every other render path in this server is
/// lenient).
#[utoipa::path(
    post,
    path = "/context/render",
    responses(
        (status = 200, description = "Rendered value and the context's top-level keys"),
        (status = 404, description = "Unknown execution"),
        (status = 422, description = "Strict render hit an undefined reference")
    ),
    tag = "context"
)]
pub async fn render(
    State(state): State<AppState>,
    Json(body): Json<RenderRequest>,
) -> Result<Json<RenderResponse>, (StatusCode, Json<ErrorResponse>)> {
    let events = state.events.get_events(&body.execution_id).await.map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new(e.to_string())),
        )
    })?;
    if events.is_empty() {
        return Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new(format!(
                "unknown execution: {}",
                body.execution_id
            ))),
        ));
    }

    let playbook_ref = state.execution_playbook_ref(&body.execution_id).await.map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new(e.to_string())),
        )
    })?;
    let playbook = match &playbook_ref {
        Some((path, version)) => state.catalog.fetch(path, version).await.ok(),
        None => None,
    };

    let context = noetl_engine::context::build_context(&events, playbook.as_ref(), body.extra_context)
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new(e.to_string())),
            )
        })?;

    let context_keys = context
        .as_map()
        .map(|m| m.keys().cloned().collect())
        .unwrap_or_default();

    let mode = if body.strict { Mode::Strict } else { Mode::Lenient };
    let rendered = render_value(&body.template, &context, mode).map_err(|e| {
        (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ErrorResponse::new(e.to_string())),
        )
    })?;

    Ok(Json(RenderResponse { rendered, context_keys }))
}
