//! Typed context value, replacing the duck-typed maps the original engine
//! passes between the broker, the renderer, and the action executors.
//!
//! Every JSON document the kernel touches (workload, results, rendered
//! parameters) is represented as [`Value`] rather than `serde_json::Value`
//! directly, so that the renderer and the loop engine can pattern-match on
//! shape instead of re-deserializing at every boundary. Conversions to and
//! from `serde_json::Value` are lossless for the JSON data model.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Number;

/// A dynamically typed context value.
///
/// Mirrors the JSON data model (`Null | Bool | Int | Float | String | List |
/// Map`) but keeps integers and floats distinct, which the original dynamic
/// runtime does not: a rendered `"30"` should become the integer `30`, not
/// `30.0`, when the surrounding context expects a number (see
/// `noetl-engine::template::coerce`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::String(s) => write!(f, "{s}"),
            Value::List(_) | Value::Map(_) => {
                write!(f, "{}", serde_json::to_string(&self.to_json()).unwrap_or_default())
            }
        }
    }
}

impl Value {
    pub fn map() -> Self {
        Value::Map(BTreeMap::new())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l.as_slice()),
            _ => None,
        }
    }

    /// Loose truthiness, matching the original runtime's `when`/`filter`
    /// guard coercion: booleans pass through, numbers are nonzero-truthy,
    /// a small enumerated set of strings map explicitly, and any other
    /// non-empty string defaults to `true`.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(x) => *x != 0.0,
            Value::String(s) => {
                let lower = s.to_lowercase();
                match lower.as_str() {
                    "true" | "yes" | "y" | "on" | "1" => true,
                    "false" | "no" | "n" | "off" | "0" | "" | "none" | "null" => false,
                    _ => true,
                }
            }
            Value::List(l) => !l.is_empty(),
            Value::Map(m) => !m.is_empty(),
        }
    }

    /// Walk a dotted path (`foo.bar.0.baz`) against this value, treating
    /// numeric segments as list indices and everything else as map keys.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut current = self;
        for segment in path.split('.') {
            if segment.is_empty() {
                continue;
            }
            current = match current {
                Value::Map(m) => m.get(segment)?,
                Value::List(l) => {
                    let idx: usize = segment.parse().ok()?;
                    l.get(idx)?
                }
                _ => return None,
            };
        }
        Some(current)
    }

    /// Insert `value` at `key` in a map value, promoting `Null` to an empty
    /// map first. No-ops on non-map values.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        if matches!(self, Value::Null) {
            *self = Value::map();
        }
        if let Value::Map(m) = self {
            m.insert(key.into(), value);
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::Number((*i).into()),
            Value::Float(x) => Number::from_f64(*x)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::List(l) => serde_json::Value::Array(l.iter().map(Value::to_json).collect()),
            Value::Map(m) => serde_json::Value::Object(
                m.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(a) => Value::List(a.into_iter().map(Value::from_json).collect()),
            serde_json::Value::Object(o) => {
                Value::Map(o.into_iter().map(|(k, v)| (k, Value::from_json(v))).collect())
            }
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        Value::from_json(json)
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        value.to_json()
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_json() {
        let json = serde_json::json!({"a": 1, "b": [1, 2.5, "x", null, true]});
        let value = Value::from_json(json.clone());
        assert_eq!(value.to_json(), json);
    }

    #[test]
    fn get_path_walks_maps_and_lists() {
        let value = Value::from_json(serde_json::json!({"items": [{"name": "a"}, {"name": "b"}]}));
        assert_eq!(
            value.get_path("items.1.name"),
            Some(&Value::String("b".to_string()))
        );
        assert_eq!(value.get_path("items.9.name"), None);
    }

    #[test]
    fn truthy_matches_enumerated_strings() {
        assert!(!Value::String("no".into()).truthy());
        assert!(!Value::String("".into()).truthy());
        assert!(Value::String("yes".into()).truthy());
        assert!(Value::String("anything-else".into()).truthy());
        assert!(!Value::Int(0).truthy());
        assert!(Value::Int(-1).truthy());
    }
}
