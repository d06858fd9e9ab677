//! # NoETL orchestration kernel
//!
//! The stateless, event-sourced scheduler core: an append-only event log,
//! a lease-based work queue, a template/context renderer, a playbook
//! parser, and the broker evaluator (with its loop engine) that ties them
//! together.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    broker::evaluate(execution_id)             │
//! │  context build → select next step → dispatch → transition    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!              ┌───────────────┼───────────────┐
//!              ▼               ▼               ▼
//!     persistence::Event  persistence::Queue  template::Renderer
//!     (append-only log)   (lease-based)       (minijinja-backed)
//! ```
//!
//! The broker never blocks on an action executor: it enqueues a job and
//! returns. Workers (a separate crate) lease jobs, execute them, and emit
//! the resulting events, which the next `evaluate` call picks up.

pub mod broker;
pub mod context;
pub mod loop_engine;
pub mod persistence;
pub mod playbook;
pub mod reliability;
pub mod template;

/// Common imports for callers embedding the kernel (the server and CLI
/// crates).
pub mod prelude {
    pub use crate::broker::{evaluate, BrokerError, Outcome};
    pub use crate::context::{build_context, ContextError};
    pub use crate::persistence::{EventStore, InMemoryStore, PostgresStore, QueueStore, StoreError};
    pub use crate::playbook::{Playbook, ParseError};
    pub use crate::reliability::{CircuitBreakerConfig, RetryPolicy};
    pub use crate::template::{RenderError, Renderer};
}
