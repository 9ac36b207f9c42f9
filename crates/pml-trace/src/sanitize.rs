//! Trace Sanitiser (spec §4.10): redacts secrets/PII from a trace before it
//! ever leaves the process, depth-capped so a pathological/cyclic-looking
//! payload can't blow the stack.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

const MAX_DEPTH: usize = 20;
const MAX_STRING_LEN: usize = 10 * 1024;
const PREVIEW_LEN: usize = 100;
const REDACTED: &str = "[REDACTED]";

static SECRET_KEY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(api_key|token|password|secret|authorization|bearer|credential|private_key|access_key|session_id|cookie|auth)$")
        .expect("static regex is valid")
});

static SECRET_VALUE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"sk-ant-[A-Za-z0-9_-]+").unwrap(),
        Regex::new(r"sk-[A-Za-z0-9]{20,}").unwrap(),
        Regex::new(r"tvly-[A-Za-z0-9_-]+").unwrap(),
        Regex::new(r"exa[_-][A-Za-z0-9_-]+").unwrap(),
        Regex::new(r"(?i)bearer\s+[A-Za-z0-9._-]+").unwrap(),
        Regex::new(r"(?i)[A-Za-z0-9_]*_API_KEY\s*=\s*\S+").unwrap(),
    ]
});

static PII_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (
            Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap(),
            "[EMAIL]",
        ),
        (
            Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap(),
            "[SSN]",
        ),
        (
            Regex::new(r"\b(?:\d[ -]*?){13,19}\b").unwrap(),
            "[CARD]",
        ),
        (
            Regex::new(r"\+?\d{1,3}[-.\s]?\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}\b").unwrap(),
            "[PHONE]",
        ),
    ]
});

/// Sanitise one JSON value in place, per spec §4.10. Idempotent: sanitising
/// an already-sanitised value returns it unchanged (spec §8 round-trip
/// property `sanitize(sanitize(x)) == sanitize(x)`).
pub fn sanitize(value: &Value) -> Value {
    sanitize_at_depth(value, 0)
}

fn sanitize_at_depth(value: &Value, depth: usize) -> Value {
    if depth >= MAX_DEPTH {
        return Value::String("[MAX_DEPTH_EXCEEDED]".to_string());
    }

    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, val) in map {
                if SECRET_KEY_PATTERN.is_match(key) {
                    out.insert(key.clone(), Value::String(REDACTED.to_string()));
                } else {
                    out.insert(key.clone(), sanitize_at_depth(val, depth + 1));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| sanitize_at_depth(v, depth + 1)).collect()),
        Value::String(s) => Value::String(sanitize_string(s)),
        Value::Number(n) => {
            if n.as_f64().is_some_and(|f| f.is_nan() || f.is_infinite()) {
                Value::Null
            } else {
                value.clone()
            }
        }
        Value::Bool(_) | Value::Null => value.clone(),
    }
}

fn sanitize_string(input: &str) -> String {
    let mut s = input.to_string();
    for pattern in SECRET_VALUE_PATTERNS.iter() {
        s = pattern.replace_all(&s, REDACTED).into_owned();
    }
    for (pattern, token) in PII_PATTERNS.iter() {
        s = pattern.replace_all(&s, *token).into_owned();
    }
    truncate(&s)
}

fn truncate(s: &str) -> String {
    if s.len() <= MAX_STRING_LEN {
        return s.to_string();
    }
    let preview: String = s.chars().take(PREVIEW_LEN).collect();
    format!("{preview}... [truncated, original length {} bytes]", s.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn redacts_secret_keys_by_name() {
        let input = json!({"api_key": "sk-ant-abc123def456", "note": "fine"});
        let out = sanitize(&input);
        assert_eq!(out["api_key"], json!("[REDACTED]"));
        assert_eq!(out["note"], json!("fine"));
    }

    #[test]
    fn redacts_known_secret_value_shapes_in_free_text() {
        let input = json!({"log": "using key sk-ant-REDACTED and Bearer xyz123"});
        let out = sanitize(&input);
        let text = out["log"].as_str().unwrap();
        assert!(!text.contains("sk-ant-REDACTED"));
        assert!(!text.to_lowercase().contains("bearer xyz123"));
    }

    #[test]
    fn masks_email_addresses() {
        let input = json!({"text": "contact me at jane.doe@example.com please"});
        let out = sanitize(&input);
        assert!(out["text"].as_str().unwrap().contains("[EMAIL]"));
        assert!(!out["text"].as_str().unwrap().contains("jane.doe@example.com"));
    }

    #[test]
    fn truncates_long_strings_and_reports_original_length() {
        let long = "x".repeat(20_000);
        let out = sanitize(&json!(long));
        let text = out.as_str().unwrap();
        assert!(text.len() < 20_000);
        assert!(text.contains("original length 20000 bytes"));
    }

    #[test]
    fn depth_beyond_the_cap_is_replaced_not_recursed_into() {
        let mut value = json!("leaf");
        for _ in 0..25 {
            value = json!({"nested": value});
        }
        let out = sanitize(&value);
        // Walk down MAX_DEPTH levels; beyond that we should hit the placeholder.
        let mut cursor = &out;
        for _ in 0..MAX_DEPTH {
            cursor = &cursor["nested"];
        }
        assert_eq!(*cursor, json!("[MAX_DEPTH_EXCEEDED]"));
    }

    #[test]
    fn sanitizing_twice_is_a_no_op() {
        let input = json!({"api_key": "sk-ant-abc123def456", "text": "email me at a@b.com"});
        let once = sanitize(&input);
        let twice = sanitize(&once);
        assert_eq!(once, twice);
    }
}
