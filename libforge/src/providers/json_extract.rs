//! Tolerant JSON extraction from language-model output
//!
//! Models wrap JSON in markdown fences, prepend commentary, and emit literal
//! newlines inside string values. The extractor strips the wrapping, isolates
//! the outermost object, escapes raw control characters found inside strings,
//! and only then hands the text to `serde_json`.

use serde::de::DeserializeOwned;

use crate::error::{ProviderError, Result};

/// Extract and parse one JSON object from raw model output.
pub fn extract_json<T: DeserializeOwned>(raw: &str) -> Result<T> {
    let cleaned = sanitize(raw);
    serde_json::from_str(&cleaned)
        .map_err(|e| {
            ProviderError::Attempt {
                provider: "json_extract".to_string(),
                reason: format!("unparseable model output: {}", e),
            }
            .into()
        })
}

/// The sanitization pass without the final parse, exposed for callers that
/// parse into `serde_json::Value` themselves.
pub fn sanitize(raw: &str) -> String {
    let unfenced = strip_code_fence(raw);
    let object = outermost_object(unfenced).unwrap_or(unfenced);
    escape_control_chars(object)
}

/// Prefer the body of the first ``` or ```json fence, if any.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(start) = trimmed.find("```") else {
        return trimmed;
    };
    let after = &trimmed[start + 3..];
    let after = after.strip_prefix("json").unwrap_or(after);
    match after.find("```") {
        Some(end) => after[..end].trim(),
        None => trimmed,
    }
}

/// Slice from the first `{` to the last `}`.
fn outermost_object(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let end = s.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&s[start..=end])
}

/// Escape raw control characters that appear inside JSON string values.
/// Characters outside strings are left alone so structural whitespace
/// survives.
fn escape_control_chars(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut in_string = false;
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            result.push(ch);
            escaped = false;
            continue;
        }

        if ch == '\\' && in_string {
            result.push(ch);
            escaped = true;
            continue;
        }

        if ch == '"' {
            in_string = !in_string;
            result.push(ch);
            continue;
        }

        if in_string && (ch as u32) < 0x20 {
            match ch {
                '\n' => result.push_str("\\n"),
                '\r' => result.push_str("\\r"),
                '\t' => result.push_str("\\t"),
                _ => {}
            }
            continue;
        }

        result.push(ch);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_plain_json_passes_through() {
        let parsed: Value = extract_json(r#"{"hook": "hi"}"#).unwrap();
        assert_eq!(parsed["hook"], "hi");
    }

    #[test]
    fn test_markdown_fence_stripped() {
        let raw = "Here you go:\n```json\n{\"caption\": \"text\"}\n```\nEnjoy!";
        let parsed: Value = extract_json(raw).unwrap();
        assert_eq!(parsed["caption"], "text");
    }

    #[test]
    fn test_bare_fence_stripped() {
        let raw = "```\n{\"a\": 1}\n```";
        let parsed: Value = extract_json(raw).unwrap();
        assert_eq!(parsed["a"], 1);
    }

    #[test]
    fn test_surrounding_prose_removed() {
        let raw = "Sure! The JSON is {\"a\": [1, 2]} as requested.";
        let parsed: Value = extract_json(raw).unwrap();
        assert_eq!(parsed["a"][1], 2);
    }

    #[test]
    fn test_literal_newline_inside_string_escaped() {
        let raw = "{\"script\": \"line one\nline two\tend\"}";
        let parsed: Value = extract_json(raw).unwrap();
        assert_eq!(parsed["script"], "line one\nline two\tend");
    }

    #[test]
    fn test_escaped_quote_does_not_terminate_string() {
        let raw = r#"{"caption": "she said \"hi\"\nbye"}"#;
        let sanitized = sanitize(raw);
        let parsed: Value = serde_json::from_str(&sanitized).unwrap();
        assert_eq!(parsed["caption"], "she said \"hi\"\nbye");
    }

    #[test]
    fn test_structural_whitespace_untouched() {
        let raw = "{\n  \"a\": 1,\n  \"b\": 2\n}";
        let parsed: Value = extract_json(raw).unwrap();
        assert_eq!(parsed["b"], 2);
    }

    #[test]
    fn test_garbage_is_an_error() {
        let result: Result<Value> = extract_json("no json here at all");
        assert!(result.is_err());
    }
}
