//! Bounded snapshots of task inputs and outputs.

use crate::flatten::{bounded, MAX_DEPTH};
use flowtrace_core::{Node, TaskResult};
use regex::Regex;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::borrow::Cow;
use std::sync::OnceLock;

/// Parameter names that usually hold the meaningful input of a task, in
/// priority order.
pub const INPUT_FIELDS: [&str; 10] = [
    "text",
    "prompt",
    "input",
    "query",
    "question",
    "messages",
    "systemMessage",
    "systemPrompt",
    "instructions",
    "url",
];

/// Item fields that usually hold the meaningful output of a task, in
/// priority order.
pub const OUTPUT_FIELDS: [&str; 5] = ["output", "completion", "text", "result", "response"];

/// Cap for string parameters captured by the fallback scan.
pub const FALLBACK_VALUE_MAX_CHARS: usize = 200;

/// Number of output items kept verbatim.
pub const MAX_OUTPUT_ITEMS: usize = 3;

fn truncation_suffix() -> &'static Regex {
    static SUFFIX: OnceLock<Regex> = OnceLock::new();
    SUFFIX.get_or_init(|| {
        Regex::new(r"\.\.\.\[truncated (\d+) chars\]$").expect("truncation suffix pattern")
    })
}

/// Select the input-bearing parameters of `node`.
///
/// Priority fields are looked up at the top level and then under `options`.
/// When none is present, every primitive top-level parameter is taken
/// instead, with strings capped at [`FALLBACK_VALUE_MAX_CHARS`].
pub fn extract_input(node: &Node) -> Option<Map<String, Value>> {
    let parameters = &node.parameters;
    let options = parameters.get("options").and_then(Value::as_object);

    let mut selected = Map::new();
    for field in INPUT_FIELDS {
        if let Some(value) = parameters.get(field) {
            selected.insert(field.to_string(), value.clone());
        }
    }
    if let Some(options) = options {
        for field in INPUT_FIELDS {
            if let Some(value) = options.get(field) {
                selected.insert(format!("options.{}", field), value.clone());
            }
        }
    }
    if !selected.is_empty() {
        return Some(selected);
    }

    for (key, value) in parameters {
        let captured = match value {
            Value::String(s) => Value::String(truncate(s, FALLBACK_VALUE_MAX_CHARS).into_owned()),
            Value::Number(_) | Value::Bool(_) => value.clone(),
            _ => continue,
        };
        selected.insert(key.clone(), captured);
    }

    (!selected.is_empty()).then_some(selected)
}

/// Summarize a task's output items as `{primary, items, runIndex}`.
///
/// `primary` is the first [`OUTPUT_FIELDS`] entry found on the first item,
/// looking inside an item's `json` object when it has one. `None` when the
/// result has no items.
pub fn extract_output(result: &TaskResult, run_index: usize) -> Option<Map<String, Value>> {
    let first = result.items.first()?;
    let payload = first.get("json").filter(|v| v.is_object()).unwrap_or(first);

    let primary = OUTPUT_FIELDS
        .iter()
        .find_map(|field| payload.get(*field))
        .cloned()
        .unwrap_or(Value::Null);

    let mut output = Map::new();
    output.insert("primary".to_string(), primary);
    output.insert(
        "items".to_string(),
        Value::Array(result.items.iter().take(MAX_OUTPUT_ITEMS).cloned().collect()),
    );
    output.insert("runIndex".to_string(), json!(run_index));
    Some(output)
}

/// Serialize to a JSON string. Never fails: a value that cannot be
/// serialized yields a JSON error object instead.
pub fn stringify<T>(value: &T) -> String
where
    T: ?Sized + Serialize,
{
    match bounded::to_value(value, MAX_DEPTH) {
        Ok(Value::String(s)) => s,
        Ok(value) => value.to_string(),
        Err(e) => json!({
            "error": "serialization_failed",
            "message": e.to_string(),
        })
        .to_string(),
    }
}

/// Cut `s` to `max_chars` characters and append `...[truncated N chars]`.
///
/// A trailing truncation marker from an earlier pass does not count towards
/// the length, so truncating twice at the same cap changes nothing.
pub fn truncate(s: &str, max_chars: usize) -> Cow<'_, str> {
    let (content, already_removed) = match truncation_suffix().captures(s) {
        Some(caps) => {
            let start = caps.get(0).map(|m| m.start()).unwrap_or(s.len());
            let removed = caps
                .get(1)
                .and_then(|m| m.as_str().parse::<usize>().ok())
                .unwrap_or(0);
            (&s[..start], removed)
        }
        None => (s, 0),
    };

    let len = content.chars().count();
    if len <= max_chars {
        return Cow::Borrowed(s);
    }

    let cut = content
        .char_indices()
        .nth(max_chars)
        .map(|(i, _)| i)
        .unwrap_or(content.len());
    Cow::Owned(format!(
        "{}...[truncated {} chars]",
        &content[..cut],
        (len - max_chars).saturating_add(already_removed)
    ))
}

pub fn is_truncated(s: &str) -> bool {
    truncation_suffix().is_match(s)
}

/// Stringify and truncate in one step.
pub fn capture_value<T>(value: &T, max_chars: usize) -> String
where
    T: ?Sized + Serialize,
{
    let text = stringify(value);
    match truncate(&text, max_chars) {
        Cow::Borrowed(_) => text,
        Cow::Owned(truncated) => truncated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    // ===== Input Tests =====

    #[test]
    fn test_extract_input_priority_fields_in_order() {
        let node = Node::new("Chat", "ai.mockChatModel")
            .with_parameter("temperature", json!(0.2))
            .with_parameter("query", json!("what is rust"))
            .with_parameter("prompt", json!("be brief"))
            .with_parameter("options", json!({"systemMessage": "you are helpful"}));

        let input = extract_input(&node).unwrap();
        let keys: Vec<&str> = input.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["prompt", "query", "options.systemMessage"]);
    }

    #[test]
    fn test_extract_input_fallback_to_primitives() {
        let long = "x".repeat(500);
        let node = Node::new("Http", "core.httpRequest")
            .with_parameter("method", json!("GET"))
            .with_parameter("retries", json!(3))
            .with_parameter("body", json!(long))
            .with_parameter("headers", json!({"a": "b"}));

        let input = extract_input(&node).unwrap();
        assert_eq!(input["method"], json!("GET"));
        assert_eq!(input["retries"], json!(3));
        assert!(!input.contains_key("headers"));
        let body = input["body"].as_str().unwrap();
        assert!(body.starts_with(&"x".repeat(FALLBACK_VALUE_MAX_CHARS)));
        assert!(body.ends_with("...[truncated 300 chars]"));
    }

    #[test]
    fn test_extract_input_none_when_nothing_qualifies() {
        let node = Node::new("Merge", "core.merge").with_parameter("mode", json!({"x": 1}));
        assert!(extract_input(&node).is_none());
        assert!(extract_input(&Node::new("Empty", "core.noOp")).is_none());
    }

    // ===== Output Tests =====

    #[test]
    fn test_extract_output_primary_and_items() {
        let result = TaskResult::success(vec![
            json!({"completion": "hi", "text": "ignored"}),
            json!({"n": 2}),
            json!({"n": 3}),
            json!({"n": 4}),
        ]);
        let output = extract_output(&result, 1).unwrap();
        assert_eq!(output["primary"], json!("hi"));
        assert_eq!(output["items"].as_array().unwrap().len(), MAX_OUTPUT_ITEMS);
        assert_eq!(output["runIndex"], json!(1));
    }

    #[test]
    fn test_extract_output_looks_inside_json_key() {
        let result = TaskResult::success(vec![json!({"json": {"output": 42}})]);
        assert_eq!(extract_output(&result, 0).unwrap()["primary"], json!(42));
    }

    #[test]
    fn test_extract_output_without_primary() {
        let result = TaskResult::success(vec![json!({"other": 1})]);
        assert_eq!(extract_output(&result, 0).unwrap()["primary"], Value::Null);
    }

    #[test]
    fn test_extract_output_none_without_items() {
        assert!(extract_output(&TaskResult::success(vec![]), 0).is_none());
        assert!(extract_output(&TaskResult::failure("boom"), 0).is_none());
    }

    // ===== Stringify / Truncate Tests =====

    #[test]
    fn test_stringify_never_fails() {
        struct Failing;
        impl Serialize for Failing {
            fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
                Err(serde::ser::Error::custom("broken"))
            }
        }
        let text = stringify(&Failing);
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["error"], json!("serialization_failed"));
        assert_eq!(parsed["message"], json!("broken"));
    }

    #[test]
    fn test_stringify_plain_string_is_not_quoted() {
        assert_eq!(stringify("hello"), "hello");
        assert_eq!(stringify(&json!({"a": 1})), r#"{"a":1}"#);
    }

    #[rstest]
    #[case(4, false)]
    #[case(5, false)]
    #[case(6, true)]
    fn test_truncate_boundary(#[case] len: usize, #[case] suffixed: bool) {
        let input = "a".repeat(len);
        let output = truncate(&input, 5);
        assert_eq!(is_truncated(&output), suffixed);
        if suffixed {
            assert_eq!(output, format!("aaaaa...[truncated {} chars]", len - 5));
        } else {
            assert_eq!(output, input);
        }
    }

    #[test]
    fn test_truncate_is_idempotent() {
        let once = truncate(&"b".repeat(20), 8).into_owned();
        let twice = truncate(&once, 8);
        assert_eq!(twice, once);
        assert_eq!(once, "bbbbbbbb...[truncated 12 chars]");
    }

    #[test]
    fn test_truncate_again_with_smaller_cap_accumulates() {
        let once = truncate(&"c".repeat(20), 10).into_owned();
        let twice = truncate(&once, 4);
        assert_eq!(twice, "cccc...[truncated 16 chars]");
    }

    #[test]
    fn test_truncate_saturates_huge_existing_count() {
        let forged = format!("{}...[truncated {} chars]", "a".repeat(20), usize::MAX);
        let output = truncate(&forged, 5);
        assert_eq!(output, format!("aaaaa...[truncated {} chars]", usize::MAX));
    }

    #[test]
    fn test_truncate_counts_characters_not_bytes() {
        let output = truncate("héllo wörld", 5);
        assert_eq!(output, "héllo...[truncated 6 chars]");
    }

    #[test]
    fn test_capture_value() {
        assert_eq!(capture_value(&json!({"k": "v"}), 100), r#"{"k":"v"}"#);
        assert!(capture_value(&"z".repeat(50), 10).ends_with("[truncated 40 chars]"));
    }
}
