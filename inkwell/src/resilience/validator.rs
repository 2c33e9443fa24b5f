//! Heuristic classification of generation responses.
//!
//! This is not a schema check. Short replies that read like an apology or an
//! error report are treated as failed generations; anything long enough is
//! trusted even if it mentions the same words.

use serde_json::Value;

/// Strings with fewer characters than this are never usable output.
pub const MIN_RESPONSE_CHARS: usize = 10;

/// Phrase matching only applies below this length.
pub const PHRASE_CHECK_MAX_CHARS: usize = 100;

/// Matched case-insensitively.
const FAILURE_PHRASES: &[&str] = &[
    "sorry",
    "apologize",
    "error",
    "unable to",
    "cannot",
    "can't",
    "failed",
    "not available",
    "as an ai",
    "抱歉",
    "对不起",
    "错误",
    "无法",
    "失败",
    "不能",
];

/// Classify an arbitrary response value.
pub fn is_valid(response: &Value) -> bool {
    match response {
        Value::Null => false,
        Value::String(text) => is_valid_text(text),
        Value::Object(map) => {
            !map.is_empty() && !map.contains_key("error") && !map.contains_key("errorMessage")
        }
        Value::Array(items) => !items.is_empty(),
        Value::Bool(_) | Value::Number(_) => true,
    }
}

/// Classify a text response.
pub fn is_valid_text(text: &str) -> bool {
    let chars = text.chars().count();
    if chars < MIN_RESPONSE_CHARS {
        return false;
    }
    if chars < PHRASE_CHECK_MAX_CHARS && contains_failure_phrase(text) {
        return false;
    }
    true
}

fn contains_failure_phrase(text: &str) -> bool {
    let lower = text.to_lowercase();
    FAILURE_PHRASES.iter().any(|phrase| lower.contains(phrase))
}
