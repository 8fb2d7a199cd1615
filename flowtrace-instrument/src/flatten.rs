//! Nested record → flat, dot-keyed span attributes.

pub mod bounded;

use crate::span::{AttributeValue, Attributes};
use serde::Serialize;
use serde_json::Value;

/// Nesting depth below which compound values are replaced by
/// [`bounded::DEPTH_MARKER`].
pub const MAX_DEPTH: usize = 10;

/// Flatten any serializable record into scalar attributes.
///
/// Objects are walked recursively with keys joined by `.` under
/// `key_prefix`. Strings, numbers and booleans are kept as they are; arrays,
/// nulls and empty objects become their JSON text. A record that fails to
/// serialize produces a single `<prefix>.error` attribute.
///
/// ```
/// use flowtrace_instrument::{flatten, AttributeValue};
/// use serde_json::json;
///
/// let attrs = flatten(&json!({"a": {"b": 1, "c": [1, 2]}}), "");
/// assert_eq!(attrs["a.b"], AttributeValue::I64(1));
/// assert_eq!(attrs["a.c"], AttributeValue::String("[1,2]".into()));
/// ```
pub fn flatten<T>(record: &T, key_prefix: &str) -> Attributes
where
    T: ?Sized + Serialize,
{
    let mut attributes = Attributes::new();
    match bounded::to_value(record, MAX_DEPTH) {
        Ok(value) => flatten_value(&value, key_prefix, &mut attributes),
        Err(e) => {
            attributes.insert(
                join(key_prefix, "error"),
                AttributeValue::String(format!("flatten failed: {}", e)),
            );
        }
    }
    attributes
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", prefix, key)
    }
}

fn flatten_value(value: &Value, key: &str, out: &mut Attributes) {
    let key_or_default = || {
        if key.is_empty() {
            "value".to_string()
        } else {
            key.to_string()
        }
    };

    match value {
        Value::Object(map) if !map.is_empty() => {
            for (child_key, child) in map {
                flatten_value(child, &join(key, child_key), out);
            }
        }
        Value::String(s) => {
            out.insert(key_or_default(), AttributeValue::String(s.clone()));
        }
        Value::Bool(b) => {
            out.insert(key_or_default(), AttributeValue::Bool(*b));
        }
        Value::Number(n) => {
            let attr = if let Some(i) = n.as_i64() {
                AttributeValue::I64(i)
            } else if n.is_u64() {
                AttributeValue::String(n.to_string())
            } else {
                AttributeValue::F64(n.as_f64().unwrap_or_default())
            };
            out.insert(key_or_default(), attr);
        }
        other => {
            out.insert(key_or_default(), AttributeValue::String(other.to_string()));
        }
    }
}
