//! Shared primitives for the NoETL orchestration kernel: the typed [`Value`]
//! context tree, the append-only [`event::Event`] record and status
//! normalization, the [`queue::QueueJob`] shape, identifier/timestamp
//! helpers, and telemetry setup.
//!
//! This crate has no opinion on persistence, rendering, or scheduling — it
//! is the vocabulary the other crates (`noetl-engine`, `noetl-worker`,
//! `noetl-server`, `noetl-cli`) share.

pub mod error;
pub mod event;
pub mod ids;
pub mod queue;
pub mod telemetry;
pub mod value;

pub use error::{CoreError, Result};
pub use event::{Event, EventType, LoopFields, Status};
pub use ids::{
    loop_iter_node_id, new_event_id, new_execution_id, now_rfc3339, parse_loop_iter_node_id,
    step_node_id,
};
pub use queue::{QueueJob, QueueStatus, LOOP_AGGREGATION_ACTION_TYPE};
pub use value::Value;
