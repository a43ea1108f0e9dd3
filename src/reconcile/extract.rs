//! Recovering the payload from raw model output.
//!
//! Models wrap JSON in code fences, prefix it with chatter, or trail it with
//! explanations. Extraction tries, in order:
//! 1. The whole trimmed response
//! 2. The body of each fenced block
//! 3. Each balanced `{...}` or `[...]` span, string-literal aware

use super::failure::{MergeFailure, Problem, ValidationError};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Fenced code block with an optional language tag.
static FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[ \t]*(?:[A-Za-z]+)?[ \t]*\r?\n?(.*?)```").unwrap());

/// Length of the excerpt carried by [`MergeFailure::UnparsableResponse`].
const EXCERPT_CHARS: usize = 120;

/// Upper bound on balanced-span candidates tried before giving up.
const MAX_SPAN_ATTEMPTS: usize = 32;

/// Extract a JSON value from a raw model response.
///
/// # Errors
///
/// Returns [`MergeFailure::UnparsableResponse`] if no JSON object or array can
/// be recovered.
pub fn extract_json(raw: &str) -> Result<Value, MergeFailure> {
    let trimmed = raw.trim();

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if value.is_object() || value.is_array() {
            return Ok(value);
        }
    }

    for captures in FENCE_RE.captures_iter(trimmed) {
        let body = captures.get(1).map_or("", |m| m.as_str()).trim();
        if let Ok(value) = serde_json::from_str::<Value>(body) {
            if value.is_object() || value.is_array() {
                return Ok(value);
            }
        }
    }

    let mut attempts = 0;
    for (start, c) in trimmed.char_indices() {
        if c != '{' && c != '[' {
            continue;
        }
        attempts += 1;
        if attempts > MAX_SPAN_ATTEMPTS {
            break;
        }
        if let Some(span) = balanced_span(&trimmed[start..]) {
            if let Ok(value) = serde_json::from_str::<Value>(span) {
                return Ok(value);
            }
        }
    }

    Err(unparsable(raw))
}

/// Extract a plain-text block from a raw model response.
///
/// A surrounding code fence is removed and a bare JSON string literal is
/// unquoted. Structured JSON (an object or array) is refused.
///
/// # Errors
///
/// Returns [`MergeFailure::UnparsableResponse`] for empty text and
/// [`MergeFailure::Validation`] for structured JSON.
pub fn extract_text(raw: &str) -> Result<String, MergeFailure> {
    let mut text = raw.trim();

    if let Some(captures) = FENCE_RE.captures(text) {
        if let Some(whole) = captures.get(0) {
            if whole.start() == 0 && whole.end() == text.len() {
                text = captures.get(1).map_or("", |m| m.as_str()).trim();
            }
        }
    }

    if text.is_empty() {
        return Err(unparsable(raw));
    }

    match serde_json::from_str::<Value>(text) {
        Ok(Value::String(inner)) if !inner.trim().is_empty() => Ok(inner.trim().to_string()),
        Ok(value @ (Value::Object(_) | Value::Array(_))) => {
            Err(MergeFailure::Validation(ValidationError::single(
                "",
                Problem::Invalid {
                    reason: format!(
                        "expected a plain text block, found a structured JSON {}",
                        if value.is_object() { "object" } else { "array" }
                    ),
                },
            )))
        }
        _ => Ok(text.to_string()),
    }
}

/// The shortest prefix of `text` whose brackets balance, ignoring brackets
/// inside string literals.
fn balanced_span(text: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&text[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

fn unparsable(raw: &str) -> MergeFailure {
    MergeFailure::UnparsableResponse { excerpt: raw.trim().chars().take(EXCERPT_CHARS).collect() }
}
