//! Action executors: the uniform `execute(action_spec, input_context) ->
//! {id, status, data?, error?}` interface consumed by the worker runtime
//! (§4.H step 2-3, §6 "Action executor (consumed)").
//!
//! Concrete executors (HTTP client, SQL drivers, code sandboxes, cloud
//! SDKs) are out of scope as *production-grade* integrations (spec §1
//! non-goals); the executors registered here are reference
//! implementations sufficient to run the playbooks in this repository's
//! own test fixtures, behind the same trait a real deployment would
//! plug production executors into.

mod aggregate;
mod embedded;
mod http;
mod noop;

pub use aggregate::LoopAggregationExecutor;
pub use embedded::EmbeddedExecutor;
pub use http::HttpExecutor;
pub use noop::NoopExecutor;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use noetl_core::{Value, LOOP_AGGREGATION_ACTION_TYPE};

/// `status` discriminant of an action result (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionStatus {
    Success,
    Error,
}

/// The structured result an executor returns for one invocation.
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub status: ActionStatus,
    pub data: Option<Value>,
    pub error: Option<String>,
}

impl ActionOutcome {
    pub fn success(data: Value) -> Self {
        Self {
            status: ActionStatus::Success,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            status: ActionStatus::Error,
            data: None,
            error: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ActionStatus::Success
    }
}

/// Errors an executor can raise before producing a structured outcome.
/// `Transient` errors are retried by the worker runtime (§4.H step 4);
/// `Invalid`/`Unknown` are not.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("no executor registered for action type: {0}")]
    UnknownType(String),

    #[error("invalid action spec: {0}")]
    Invalid(String),

    #[error("transient failure: {0}")]
    Transient(String),
}

impl ActionError {
    /// Whether the worker runtime should retry the job for this error
    /// (§4.H step 4: "retry on transient errors (network, timeout);
    /// no-retry on validation errors").
    pub fn retryable(&self) -> bool {
        matches!(self, ActionError::Transient(_))
    }
}

/// One pluggable action type. Implementors accept the merged, rendered
/// `with` map as `input_context` is already scoped to the action.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(
        &self,
        action_spec: &Value,
        input_context: &Value,
    ) -> Result<ActionOutcome, ActionError>;
}

/// Looks up `action_spec.type` and dispatches to the matching executor.
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn ActionExecutor>>,
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ExecutorRegistry {
    pub fn empty() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// The reference executors shipped with this repository: `noop`
    /// (control/test passthrough), `python` (the embedded
    /// assignment-expression evaluator used by playbooks that only need
    /// simple value transforms), `http`, and the dedicated loop-aggregation
    /// job type the broker enqueues for large loops.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register("noop", Arc::new(NoopExecutor));
        registry.register("python", Arc::new(EmbeddedExecutor));
        registry.register("http", Arc::new(HttpExecutor::default()));
        registry.register(LOOP_AGGREGATION_ACTION_TYPE, Arc::new(LoopAggregationExecutor));
        registry
    }

    pub fn register(&mut self, action_type: impl Into<String>, executor: Arc<dyn ActionExecutor>) {
        self.executors.insert(action_type.into(), executor);
    }

    pub fn get(&self, action_type: &str) -> Option<Arc<dyn ActionExecutor>> {
        self.executors.get(action_type).cloned()
    }

    pub async fn execute(
        &self,
        action_spec: &Value,
        input_context: &Value,
    ) -> Result<ActionOutcome, ActionError> {
        let action_type = action_spec
            .get_path("type")
            .and_then(Value::as_str)
            .ok_or_else(|| ActionError::Invalid("action spec missing `type`".to_string()))?;

        let executor = self
            .get(action_type)
            .ok_or_else(|| ActionError::UnknownType(action_type.to_string()))?;

        executor.execute(action_spec, input_context).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_action_type_is_reported() {
        let registry = ExecutorRegistry::with_defaults();
        let mut spec = Value::map();
        spec.insert("type", Value::String("s3".to_string()));

        let err = registry
            .execute(&spec, &Value::map())
            .await
            .expect_err("s3 is not registered by default");
        assert!(matches!(err, ActionError::UnknownType(t) if t == "s3"));
        assert!(!err.retryable());
    }

    #[tokio::test]
    async fn missing_type_is_invalid() {
        let registry = ExecutorRegistry::with_defaults();
        let err = registry
            .execute(&Value::map(), &Value::map())
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::Invalid(_)));
    }
}
