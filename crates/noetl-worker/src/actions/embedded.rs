//! Reference `python` action executor.
//!
//! A real code sandbox is out of scope (§1 non-goals); this executor
//! covers the single-assignment form (`<name> = <expression>`), e.g.
//! `result = n * 3` or `result = results.A + 1`, by handing
//! `<expression>` to the context renderer's expression engine instead of
//! a real interpreter. Anything richer than one assignment is rejected
//! with `ActionError::Invalid` rather than silently mis-evaluated.

use async_trait::async_trait;
use base64::Engine;
use noetl_core::Value;
use noetl_engine::template::{render_str_value, Mode, RenderError};

use super::{ActionError, ActionExecutor, ActionOutcome};

pub struct EmbeddedExecutor;

#[async_trait]
impl ActionExecutor for EmbeddedExecutor {
    async fn execute(
        &self,
        action_spec: &Value,
        input_context: &Value,
    ) -> Result<ActionOutcome, ActionError> {
        let body = decode_body(action_spec, input_context)?;
        let (name, expr) = split_assignment(&body).ok_or_else(|| {
            ActionError::Invalid(format!(
                "unsupported embedded-code body (expected `name = expression`): {body:?}"
            ))
        })?;

        let template = format!("{{{{ {expr} }}}}");
        let value = render_str_value(&template, input_context, Mode::Lenient)
            .map_err(|e: RenderError| ActionError::Invalid(e.to_string()))?;

        let mut data = Value::map();
        data.insert(name, value);
        Ok(ActionOutcome::success(data))
    }
}

fn decode_body(action_spec: &Value, input_context: &Value) -> Result<String, ActionError> {
    for source in [action_spec, input_context] {
        if let Some(b64) = source.get_path("code_b64").and_then(Value::as_str) {
            return decode_b64(b64);
        }
    }
    for source in [action_spec, input_context] {
        if let Some(body) = source.get_path("body").and_then(Value::as_str) {
            return Ok(body.to_string());
        }
    }
    Err(ActionError::Invalid(
        "embedded-code action requires a `body` or `code_b64` parameter".to_string(),
    ))
}

fn decode_b64(encoded: &str) -> Result<String, ActionError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| ActionError::Invalid(format!("invalid base64 in code_b64: {e}")))?;
    String::from_utf8(bytes)
        .map_err(|e| ActionError::Invalid(format!("code_b64 is not valid utf-8: {e}")))
}

/// Splits `name = expr` on the first top-level `=`, skipping `==`, `!=`,
/// `<=`, `>=` so comparison expressions on the right-hand side survive.
fn split_assignment(body: &str) -> Option<(String, String)> {
    let body = body.trim();
    let bytes = body.as_bytes();

    for (i, b) in bytes.iter().enumerate() {
        if *b != b'=' {
            continue;
        }
        let prev = if i > 0 { bytes[i - 1] } else { 0 };
        let next = bytes.get(i + 1).copied().unwrap_or(0);
        if matches!(prev, b'=' | b'!' | b'<' | b'>') || next == b'=' {
            continue;
        }

        let name = body[..i].trim();
        let expr = body[i + 1..].trim();
        let is_identifier = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_alphanumeric() || c == '_')
            && !name.chars().next().unwrap().is_numeric();
        if is_identifier && !expr.is_empty() {
            return Some((name.to_string(), expr.to_string()));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn evaluates_arithmetic_assignment() {
        let mut ctx = Value::map();
        ctx.insert("body", Value::String("result = n * 3".to_string()));
        ctx.insert("n", Value::Int(2));

        let outcome = EmbeddedExecutor
            .execute(&Value::map(), &ctx)
            .await
            .unwrap();
        assert!(outcome.is_success());
        assert_eq!(
            outcome.data.unwrap().get_path("result"),
            Some(&Value::Int(6))
        );
    }

    #[tokio::test]
    async fn evaluates_nested_result_reference() {
        let mut results = Value::map();
        let mut a = Value::map();
        a.insert("result", Value::Int(6));
        results.insert("A", a);

        let mut ctx = Value::map();
        ctx.insert("body", Value::String("result = results.A.result + 1".to_string()));
        ctx.insert("results", results);

        let outcome = EmbeddedExecutor
            .execute(&Value::map(), &ctx)
            .await
            .unwrap();
        assert_eq!(
            outcome.data.unwrap().get_path("result"),
            Some(&Value::Int(7))
        );
    }

    #[tokio::test]
    async fn rejects_bodies_without_an_assignment() {
        let mut ctx = Value::map();
        ctx.insert("body", Value::String("print(n)".to_string()));
        let err = EmbeddedExecutor.execute(&Value::map(), &ctx).await.unwrap_err();
        assert!(matches!(err, ActionError::Invalid(_)));
    }

    #[test]
    fn assignment_splitting_skips_comparison_operators() {
        assert_eq!(
            split_assignment("result = a == b"),
            Some(("result".to_string(), "a == b".to_string()))
        );
        assert_eq!(split_assignment("a == b"), None);
    }
}
