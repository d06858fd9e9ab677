//! Dedicated loop-aggregation executor.
//!
//! Handles jobs the broker enqueues under
//! [`noetl_core::LOOP_AGGREGATION_ACTION_TYPE`] once a loop's collected
//! iteration count exceeds `INLINE_AGGREGATION_MAX`, moving the
//! `end_loop` reduction off the broker's own call stack and onto a
//! regular worker (§9 Open Question, resolved in `SPEC_FULL.md` Part III
//! item 8).

use async_trait::async_trait;
use noetl_core::Value;
use noetl_engine::template::{render_value, Mode, RenderError};

use super::{ActionError, ActionExecutor, ActionOutcome};

pub struct LoopAggregationExecutor;

#[async_trait]
impl ActionExecutor for LoopAggregationExecutor {
    async fn execute(
        &self,
        action_spec: &Value,
        input_context: &Value,
    ) -> Result<ActionOutcome, ActionError> {
        let results = input_context
            .get_path("loop_results")
            .cloned()
            .unwrap_or_else(|| Value::List(Vec::new()));

        let Some(template) = action_spec.get_path("result_template") else {
            return Ok(ActionOutcome::success(results));
        };

        let rendered = render_value(template, input_context, Mode::Lenient)
            .map_err(|e: RenderError| ActionError::Invalid(e.to_string()))?;
        Ok(ActionOutcome::success(rendered))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn defaults_to_the_raw_results_list_without_a_template() {
        let mut ctx = Value::map();
        ctx.insert("loop_results", Value::List(vec![Value::Int(1), Value::Int(2)]));

        let outcome = LoopAggregationExecutor
            .execute(&Value::map(), &ctx)
            .await
            .unwrap();
        assert_eq!(outcome.data, Some(Value::List(vec![Value::Int(1), Value::Int(2)])));
    }

    #[tokio::test]
    async fn renders_the_result_template_against_the_loop_results() {
        let mut ctx = Value::map();
        ctx.insert("loop_results", Value::List(vec![Value::Int(1), Value::Int(2)]));

        let mut spec = Value::map();
        let mut template = std::collections::BTreeMap::new();
        template.insert("sum".to_string(), Value::String("{{ loop_results.0 }}-{{ loop_results.1 }}".to_string()));
        spec.insert("result_template", Value::Map(template));

        let outcome = LoopAggregationExecutor.execute(&spec, &ctx).await.unwrap();
        assert_eq!(
            outcome.data.unwrap().get_path("sum"),
            Some(&Value::String("1-2".to_string()))
        );
    }
}
