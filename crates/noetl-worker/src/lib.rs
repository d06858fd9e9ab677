//! Worker runtime: leases queue jobs, dispatches them to pluggable action
//! executors, and reports outcomes back as events (§4.H).

pub mod actions;
pub mod client;
pub mod config;
pub mod runtime;

pub use client::ApiClient;
pub use config::{Backend, WorkerConfig};
