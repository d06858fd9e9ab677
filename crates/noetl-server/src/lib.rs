//! `noetl-server`: the REST transport for the orchestration kernel (§6
//! EXTERNAL INTERFACES). This crate wires the `noetl-engine` store traits
//! and broker evaluator to an `axum` router; it owns no orchestration
//! logic of its own beyond request/response shaping and the scheduler
//! hand-off described in §9 Design Notes.

pub mod api;
pub mod config;
pub mod openapi;
pub mod scheduler;
pub mod state;

pub use state::AppState;
