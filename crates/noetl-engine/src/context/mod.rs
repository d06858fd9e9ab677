//! Context reconstruction from the event log (§4.C).

mod builder;

pub use builder::{build_context, build_context_with_lineage, ContextError};
