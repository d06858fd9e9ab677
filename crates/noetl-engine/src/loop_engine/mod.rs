//! Loop expansion and `end_loop` aggregation (§4.G).

mod aggregate;
mod expand;

pub use aggregate::{aggregate, collect_iteration_results, INLINE_AGGREGATION_MAX};
pub use expand::{coerce_items, expand_loop, LoopError, LoopIteration};
