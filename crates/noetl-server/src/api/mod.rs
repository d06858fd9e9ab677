//! HTTP route handlers for the §6 EXTERNAL INTERFACES REST surface.
//! Every handler reads/writes through [`crate::AppState`]'s store trait
//! objects; none contain orchestration logic of their own.

pub mod aggregate;
pub mod common;
pub mod context;
pub mod events;
pub mod executions;
pub mod queue;

pub use common::ErrorResponse;

use axum::Router;

use crate::AppState;

/// Assemble the full `/*` route tree (unprefixed; `main` applies
/// `API_PREFIX` on top of this).
pub fn routes(state: AppState) -> Router {
    Router::new()
        .merge(events::routes())
        .merge(executions::routes())
        .merge(queue::routes())
        .merge(context::routes())
        .merge(aggregate::routes())
        .with_state(state)
}
