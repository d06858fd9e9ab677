//! The broker's sum-type result (§9 Design Notes: "use a sum type for
//! broker outcomes" in place of catch-all exception handling).

use thiserror::Error;

/// What one `evaluate(execution_id)` call accomplished. The evaluator
/// itself never throws to its caller (§4.F): all internal failures are
/// caught, logged, and surfaced as `InternalError` instead.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// A job was enqueued (or a loop was expanded) for `node_id`.
    Scheduled(String),
    /// The execution reached a terminal state (`reason` explains why:
    /// `control_step`, `failed`, etc).
    Terminal(String),
    /// Nothing new to do this round (e.g. waiting on in-flight loop
    /// iterations, or the chosen step is already scheduled/completed).
    Stalled(String),
    /// An internal error occurred; recorded but not propagated.
    InternalError(String),
    /// `outcome` happened for this execution, but a different execution
    /// also needs an evaluation pass: either a sub-playbook call's newly
    /// started child, or the parent of a sub-playbook execution that just
    /// reached a terminal state (`original_source/plugin/playbook/context.py`
    /// parent-tracking). The engine has no `Scheduler` of its own (§9
    /// Design Notes), so it reports the peer back to whoever does.
    NotifyPeer {
        outcome: Box<Outcome>,
        peer_execution_id: String,
    },
}

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("store error: {0}")]
    Store(#[from] crate::persistence::StoreError),

    #[error("context error: {0}")]
    Context(#[from] crate::context::ContextError),

    #[error("render error: {0}")]
    Render(#[from] crate::template::RenderError),

    #[error("loop error: {0}")]
    Loop(#[from] crate::loop_engine::LoopError),
}
