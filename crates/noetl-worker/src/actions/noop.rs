//! A passthrough executor for control and test steps (`call: noop`),
//! used by the broker's own branch/skip fixtures so those steps have
//! something to dispatch to without a real side effect.

use async_trait::async_trait;
use noetl_core::Value;

use super::{ActionError, ActionExecutor, ActionOutcome};

pub struct NoopExecutor;

#[async_trait]
impl ActionExecutor for NoopExecutor {
    async fn execute(
        &self,
        _action_spec: &Value,
        input_context: &Value,
    ) -> Result<ActionOutcome, ActionError> {
        Ok(ActionOutcome::success(input_context.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echoes_input_context() {
        let mut ctx = Value::map();
        ctx.insert("x", Value::Int(1));
        let outcome = NoopExecutor.execute(&Value::map(), &ctx).await.unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.data, Some(ctx));
    }
}
