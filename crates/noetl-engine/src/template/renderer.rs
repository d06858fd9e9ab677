//! The Jinja-compatible expression renderer (§4.D). Built on `minijinja`
//! rather than a hand-rolled evaluator, the way the rest of this codebase
//! leans on real crates for ambient concerns instead of reimplementing
//! them.

use std::sync::OnceLock;

use minijinja::{Environment, UndefinedBehavior};
use noetl_core::Value;
use thiserror::Error;

use super::coerce::coerce;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("undefined reference in strict template: {0}")]
    Undefined(String),

    #[error("template evaluation failed: {0}")]
    Eval(String),
}

/// Strict mode raises on undefined references (required connection
/// parameters); lenient mode falls back to the original template text
/// (speculative broker rendering of future-step parameters).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Strict,
    Lenient,
}

fn base_env(behavior: UndefinedBehavior) -> Environment<'static> {
    let mut env = Environment::new();
    env.set_undefined_behavior(behavior);
    env.add_filter("to_json", to_json_filter);
    env.add_filter("b64encode", b64encode_filter);
    env.add_function("now", now_fn);
    env
}

fn env_for(mode: Mode) -> &'static Environment<'static> {
    static STRICT: OnceLock<Environment<'static>> = OnceLock::new();
    static LENIENT: OnceLock<Environment<'static>> = OnceLock::new();
    match mode {
        Mode::Strict => STRICT.get_or_init(|| base_env(UndefinedBehavior::Strict)),
        Mode::Lenient => LENIENT.get_or_init(|| base_env(UndefinedBehavior::Strict)),
    }
}

fn to_json_filter(value: minijinja::Value) -> Result<String, minijinja::Error> {
    let json: serde_json::Value = serde_json::to_value(&value)
        .map_err(|e| minijinja::Error::new(minijinja::ErrorKind::InvalidOperation, e.to_string()))?;
    serde_json::to_string(&json)
        .map_err(|e| minijinja::Error::new(minijinja::ErrorKind::InvalidOperation, e.to_string()))
}

fn b64encode_filter(value: String) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(value.as_bytes())
}

fn now_fn() -> String {
    noetl_core::now_rfc3339()
}

/// A single-expression template, `{{ expr }}` with no surrounding literal
/// text. Rendering this form short-circuits to a type-preserving
/// evaluation instead of stringify-then-coerce (§4.D, §9 Open Question
/// resolved in `SPEC_FULL.md` Part III item 1).
fn as_single_expression(template: &str) -> Option<&str> {
    let t = template.trim();
    let inner = t.strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("}}") || inner.contains("{{") {
        return None;
    }
    Some(inner.trim())
}

/// Render `template` against `context`, honoring `mode`. The context and
/// result are both typed [`Value`] trees; strings anywhere in `template`'s
/// structure are rendered, everything else passes through unchanged.
pub fn render_value(template: &Value, context: &Value, mode: Mode) -> Result<Value, RenderError> {
    match template {
        Value::String(s) => render_str_value(s, context, mode),
        Value::List(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(render_value(item, context, mode)?);
            }
            Ok(Value::List(out))
        }
        Value::Map(map) => {
            let mut out = std::collections::BTreeMap::new();
            for (k, v) in map {
                out.insert(k.clone(), render_value(v, context, mode)?);
            }
            Ok(Value::Map(out))
        }
        other => Ok(other.clone()),
    }
}

/// Render a single template string.
pub fn render_str_value(template: &str, context: &Value, mode: Mode) -> Result<Value, RenderError> {
    if !template.contains("{{") && !template.contains("{%") {
        return Ok(Value::String(template.to_string()));
    }

    let ctx = minijinja::Value::from_serialize(context);

    if let Some(expr) = as_single_expression(template) {
        let e = env_for(mode);
        let result = e
            .compile_expression(expr)
            .and_then(|compiled| compiled.eval(ctx));
        return match result {
            Ok(v) => Ok(minijinja_to_value(v)),
            Err(err) => handle_error(err, template, mode),
        };
    }

    let e = env_for(mode);
    match e.render_str(template, ctx) {
        Ok(rendered) => Ok(coerce(&rendered)),
        Err(err) => handle_error(err, template, mode),
    }
}

fn handle_error(err: minijinja::Error, template: &str, mode: Mode) -> Result<Value, RenderError> {
    let is_undefined = matches!(err.kind(), minijinja::ErrorKind::UndefinedError);
    match (mode, is_undefined) {
        (Mode::Lenient, true) => Ok(Value::String(template.to_string())),
        (Mode::Strict, true) => Err(RenderError::Undefined(err.to_string())),
        _ => Err(RenderError::Eval(err.to_string())),
    }
}

fn minijinja_to_value(v: minijinja::Value) -> Value {
    if v.is_undefined() || v.is_none() {
        return Value::Null;
    }
    match serde_json::to_value(&v) {
        Ok(json) => Value::from_json(json),
        Err(_) => Value::String(v.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use noetl_core::Value;

    fn ctx() -> Value {
        let mut m = std::collections::BTreeMap::new();
        m.insert("x".to_string(), Value::Int(10));
        m.insert("name".to_string(), Value::String("alice".to_string()));
        Value::Map(m)
    }

    #[test]
    fn single_variable_preserves_native_type() {
        let v = render_str_value("{{ x }}", &ctx(), Mode::Strict).unwrap();
        assert_eq!(v, Value::Int(10));
    }

    #[test]
    fn mixed_text_renders_and_coerces() {
        let v = render_str_value("value is {{ x }}", &ctx(), Mode::Strict).unwrap();
        assert_eq!(v, Value::String("value is 10".to_string()));
    }

    #[test]
    fn lenient_mode_preserves_original_on_undefined() {
        let v = render_str_value("{{ missing.field }}", &ctx(), Mode::Lenient).unwrap();
        assert_eq!(v, Value::String("{{ missing.field }}".to_string()));
    }

    #[test]
    fn strict_mode_errors_on_undefined() {
        let err = render_str_value("{{ missing.field }}", &ctx(), Mode::Strict).unwrap_err();
        assert!(matches!(err, RenderError::Undefined(_)));
    }

    #[test]
    fn non_template_strings_pass_through() {
        let v = render_str_value("plain text", &ctx(), Mode::Strict).unwrap();
        assert_eq!(v, Value::String("plain text".to_string()));
    }
}
