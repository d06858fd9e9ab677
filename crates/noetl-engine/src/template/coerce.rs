//! Best-effort literal coercion for rendered template output (§4.D: "a
//! rendered `30` becomes integer 30 when the surrounding context expects a
//! number"). Order per `SPEC_FULL.md` Part III item 2: try JSON first,
//! then a permissive single-token literal parse, then bool/int/float/null,
//! else the literal string.

use noetl_core::Value;

/// Coerce a rendered string into the most specific [`Value`] it looks
/// like. Never fails: falls through to `Value::String` unchanged.
pub fn coerce(rendered: &str) -> Value {
    let trimmed = rendered.trim();
    if trimmed.is_empty() {
        return Value::String(rendered.to_string());
    }

    if let Ok(json) = serde_json::from_str::<serde_json::Value>(trimmed) {
        return Value::from_json(json);
    }

    match trimmed {
        "true" | "True" | "TRUE" => return Value::Bool(true),
        "false" | "False" | "FALSE" => return Value::Bool(false),
        "null" | "None" | "NULL" | "nil" => return Value::Null,
        _ => {}
    }

    if let Ok(i) = trimmed.parse::<i64>() {
        return Value::Int(i);
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        return Value::Float(f);
    }

    Value::String(rendered.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coerces_numbers_and_bools() {
        assert_eq!(coerce("30"), Value::Int(30));
        assert_eq!(coerce("3.5"), Value::Float(3.5));
        assert_eq!(coerce("true"), Value::Bool(true));
        assert_eq!(coerce("None"), Value::Null);
    }

    #[test]
    fn coerces_json_literals() {
        assert_eq!(
            coerce("[1, 2, 3]"),
            Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
        );
    }

    #[test]
    fn falls_through_to_string() {
        assert_eq!(coerce("hello world"), Value::String("hello world".into()));
        assert_eq!(coerce(""), Value::String("".into()));
    }
}
