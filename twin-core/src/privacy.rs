//! Privacy utilities for anything headed into telemetry.
//!
//! Redaction is an ordered list of pattern → replacement rules applied to the
//! whole string; later rules see text already rewritten by earlier ones.
//! Sanitization bounds structured payloads by depth, string length and
//! sequence length so a recorded trace never carries raw user text.

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::OnceLock;

/// Default bound for strings stored in telemetry payloads.
pub const MAX_STRING_LENGTH: usize = 200;

/// Default bound for summaries placed into trace input/output fields.
pub const SUMMARY_LENGTH: usize = 160;

/// Nesting deeper than this is replaced by [`TRUNCATED_MARKER`].
pub const MAX_DEPTH: usize = 3;

/// Sequences keep at most this many entries.
pub const MAX_ARRAY_ITEMS: usize = 5;

pub const REDACTED_MARKER: &str = "[redacted]";
pub const TRUNCATED_MARKER: &str = "[truncated]";
pub const UNHANDLED_MARKER: &str = "[unhandled]";

const ELLIPSIS: &str = "...";

const REDACTION_RULES: &[(&str, &str)] = &[
    (
        r"(?i)\b[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}\b",
        "[redacted-email]",
    ),
    (
        r"\b(?:\+?1[-.\s]?)?\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}\b",
        "[redacted-phone]",
    ),
    (r"\b\d{3}-\d{2}-\d{4}\b", "[redacted-ssn]"),
    (r"\b(?:\d[ -]*?){13,19}\b", "[redacted-cc]"),
    (r"\bAIza[0-9A-Za-z\-_]{35}\b", "[redacted-key]"),
    (r"\b(?:sk|rk|pk)-[A-Za-z0-9_\-]{16,}\b", "[redacted-key]"),
];

static REDACTIONS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
static SENSITIVE_KEY_RE: OnceLock<Option<Regex>> = OnceLock::new();

fn redactions() -> &'static [(Regex, &'static str)] {
    REDACTIONS.get_or_init(|| {
        REDACTION_RULES
            .iter()
            .filter_map(|(pattern, replacement)| match Regex::new(pattern) {
                Ok(re) => Some((re, *replacement)),
                Err(e) => {
                    tracing::error!(pattern, error = %e, "Invalid redaction pattern skipped");
                    None
                }
            })
            .collect()
    })
}

fn is_sensitive_key(key: &str) -> bool {
    SENSITIVE_KEY_RE
        .get_or_init(|| Regex::new(r"(?i)(pass(word)?|token|secret|api[-_]?key|session|cookie)").ok())
        .as_ref()
        // Without a working matcher every key is treated as sensitive.
        .map_or(true, |re| re.is_match(key))
}

/// Replace emails, phone numbers, SSNs, card numbers and API keys.
pub fn redact_sensitive_text(text: &str) -> String {
    redactions()
        .iter()
        .fold(text.to_string(), |acc, (re, replacement)| {
            re.replace_all(&acc, *replacement).into_owned()
        })
}

/// Cut `text` to exactly `max` characters (ellipsis included) when it is longer.
pub fn truncate_text(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let keep = max.saturating_sub(ELLIPSIS.len());
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(ELLIPSIS);
    out
}

/// Redact and truncate to [`SUMMARY_LENGTH`].
pub fn summarize_for_telemetry(text: &str) -> String {
    summarize_with_limit(text, SUMMARY_LENGTH)
}

pub fn summarize_with_limit(text: &str, max: usize) -> String {
    truncate_text(&redact_sensitive_text(text), max)
}

/// Recursively sanitize a JSON value for telemetry, starting at depth 0.
pub fn sanitize_telemetry_value(value: &Value) -> Value {
    sanitize_at_depth(value, 0)
}

/// Serialize any value and sanitize the result. Values that cannot be
/// represented as JSON become [`UNHANDLED_MARKER`].
pub fn sanitize_serializable<T: Serialize + ?Sized>(value: &T) -> Value {
    match serde_json::to_value(value) {
        Ok(v) => sanitize_telemetry_value(&v),
        Err(e) => {
            tracing::debug!(error = %e, "Telemetry value not serializable");
            Value::String(UNHANDLED_MARKER.to_string())
        }
    }
}

fn sanitize_at_depth(value: &Value, depth: usize) -> Value {
    if value.is_null() {
        return Value::Null;
    }
    if depth > MAX_DEPTH {
        return Value::String(TRUNCATED_MARKER.to_string());
    }

    match value {
        Value::String(s) => Value::String(truncate_text(
            &redact_sensitive_text(s),
            MAX_STRING_LENGTH,
        )),
        Value::Number(_) | Value::Bool(_) => value.clone(),
        Value::Array(items) => {
            let mut out: Vec<Value> = items
                .iter()
                .take(MAX_ARRAY_ITEMS)
                .map(|item| sanitize_at_depth(item, depth + 1))
                .collect();
            if items.len() > MAX_ARRAY_ITEMS {
                out.push(Value::String(format!(
                    "[...{} more]",
                    items.len() - MAX_ARRAY_ITEMS
                )));
            }
            Value::Array(out)
        }
        Value::Object(entries) => {
            let mut out = Map::with_capacity(entries.len());
            for (key, entry) in entries {
                let sanitized = if is_sensitive_key(key) {
                    Value::String(REDACTED_MARKER.to_string())
                } else {
                    sanitize_at_depth(entry, depth + 1)
                };
                out.insert(key.clone(), sanitized);
            }
            Value::Object(out)
        }
        Value::Null => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_redacts_every_sensitive_class() {
        let key = format!("AIza{}", "a".repeat(35));
        let samples = [
            "jane.doe@example.com",
            "555-123-4567",
            "123-45-6789",
            "4111 1111 1111 1111",
            key.as_str(),
            "sk-abcdefghijklmnop1234",
        ];

        for sample in samples {
            let text = format!("contact {} please", sample);
            let out = redact_sensitive_text(&text);
            assert!(!out.contains(sample), "{} leaked in {}", sample, out);
            assert!(out.starts_with("contact "), "unexpected output: {}", out);
        }
    }

    #[test]
    fn test_redaction_replacement_tokens() {
        assert_eq!(
            redact_sensitive_text("mail me at a.b@c.io"),
            "mail me at [redacted-email]"
        );
        assert_eq!(redact_sensitive_text("ssn 123-45-6789"), "ssn [redacted-ssn]");
        assert_eq!(
            redact_sensitive_text("card 4111111111111111 ok"),
            "card [redacted-cc] ok"
        );
    }

    #[test]
    fn test_redaction_leaves_plain_text() {
        let text = "I went for a run today and felt great.";
        assert_eq!(redact_sensitive_text(text), text);
    }

    #[test]
    fn test_truncate_text_bounds() {
        let long = "x".repeat(250);
        let out = truncate_text(&long, 200);
        assert_eq!(out.chars().count(), 200);
        assert!(out.ends_with("..."));

        let exact = "y".repeat(200);
        assert_eq!(truncate_text(&exact, 200), exact);
        assert_eq!(truncate_text("short", 200), "short");
    }

    #[test]
    fn test_truncate_counts_chars_not_bytes() {
        let text = "é".repeat(20);
        let out = truncate_text(&text, 10);
        assert_eq!(out.chars().count(), 10);
        assert!(out.starts_with("ééééééé..."));
    }

    #[test]
    fn test_summarize_redacts_then_truncates() {
        let text = format!("reach me at someone@example.com {}", "z".repeat(300));
        let out = summarize_for_telemetry(&text);
        assert_eq!(out.chars().count(), SUMMARY_LENGTH);
        assert!(out.contains("[redacted-email]"));
        assert!(!out.contains("someone@example.com"));
    }

    #[test]
    fn test_sanitize_depth_limit() {
        let value = json!({"a": {"b": {"c": {"d": {"e": 1}}}}});
        let out = sanitize_telemetry_value(&value);
        assert_eq!(out["a"]["b"]["c"]["d"], json!(TRUNCATED_MARKER));
    }

    #[test]
    fn test_sanitize_caps_sequences() {
        let value = json!([1, 2, 3, 4, 5, 6, 7, 8]);
        let out = sanitize_telemetry_value(&value);
        let items = out.as_array().unwrap();
        assert_eq!(items.len(), 6);
        assert_eq!(items[4], json!(5));
        assert_eq!(items[5], json!("[...3 more]"));
    }

    #[test]
    fn test_sanitize_redacts_sensitive_keys_regardless_of_type() {
        let value = json!({
            "password": {"nested": true},
            "apiKey": 12345,
            "session_id": ["a", "b"],
            "Cookie": null,
            "note": "call 555-123-4567",
        });
        let out = sanitize_telemetry_value(&value);
        assert_eq!(out["password"], json!(REDACTED_MARKER));
        assert_eq!(out["apiKey"], json!(REDACTED_MARKER));
        assert_eq!(out["session_id"], json!(REDACTED_MARKER));
        assert_eq!(out["Cookie"], json!(REDACTED_MARKER));
        assert_eq!(out["note"], json!("call [redacted-phone]"));
    }

    #[test]
    fn test_sanitize_passes_scalars_and_null() {
        assert_eq!(sanitize_telemetry_value(&Value::Null), Value::Null);
        assert_eq!(sanitize_telemetry_value(&json!(42.5)), json!(42.5));
        assert_eq!(sanitize_telemetry_value(&json!(false)), json!(false));
        // null survives even below the depth limit
        let deep = json!({"a": {"b": {"c": {"d": null}}}});
        assert_eq!(sanitize_telemetry_value(&deep)["a"]["b"]["c"]["d"], Value::Null);
    }

    #[test]
    fn test_sanitize_serializable_unrepresentable() {
        use std::collections::HashMap;
        // Non-string map keys cannot become a JSON object.
        let mut map: HashMap<(u8, u8), u8> = HashMap::new();
        map.insert((1, 2), 3);
        assert_eq!(sanitize_serializable(&map), json!(UNHANDLED_MARKER));
    }
}
