//! Turning service output into a JSON object.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::error::{InferenceError, InferenceResult};
use crate::traits::inference::InferenceResponse;

static RE_FENCED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)\s*```").expect("valid regex")
});

/// Extract a JSON object from free text.
///
/// Tries, in order: the whole text, each fenced code block, and the span
/// between the first `{` and the last `}`. Only objects are accepted.
pub fn extract_json_object(text: &str) -> Option<Value> {
    let trimmed = text.trim();

    let as_object = |candidate: &str| match serde_json::from_str::<Value>(candidate) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    };

    if let Some(value) = as_object(trimmed) {
        return Some(value);
    }

    for captures in RE_FENCED.captures_iter(trimmed) {
        if let Some(value) = captures.get(1).and_then(|m| as_object(m.as_str())) {
            return Some(value);
        }
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    as_object(&trimmed[start..=end])
}

/// Resolve a response into a JSON object.
pub fn parse_response(response: InferenceResponse) -> InferenceResult<Value> {
    match response {
        InferenceResponse::Structured(value @ Value::Object(_)) => Ok(value),
        InferenceResponse::Structured(other) => Err(InferenceError::MalformedResponse(format!(
            "expected a JSON object, got {}",
            truncate(&other.to_string(), 200)
        ))),
        InferenceResponse::RawText(text) => extract_json_object(&text).ok_or_else(|| {
            InferenceError::MalformedResponse(format!(
                "no JSON object in response: {}",
                truncate(&text, 200)
            ))
        }),
    }
}

/// Truncate to at most `max` characters, for log output.
pub(crate) fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
