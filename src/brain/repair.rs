//! Lenient parsing of model output into an artifact.
//!
//! Order of attempts:
//! 1. Strip a surrounding code fence, parse strictly
//! 2. Escape raw control characters inside string literals, parse again
//! 3. Cut out the outermost `{...}` and repeat 1-2 on it

use serde_json::Value;
use thiserror::Error;

use crate::domain::BuildArtifact;

/// Language tags accepted after an opening fence
const FENCE_TAGS: &[&str] = &["json", "tsx", "typescript", "jsx", "js", "ts"];

/// Why a completion could not be turned into an artifact
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Output is not valid JSON: {0}")]
    NotJson(String),

    #[error("Output does not contain a non-empty files array")]
    MissingFiles,

    #[error("Output does not match the artifact schema: {0}")]
    Schema(#[source] serde_json::Error),
}

/// Remove a leading ```` ```lang ```` line and a trailing ```` ``` ````
pub fn strip_code_fence(raw: &str) -> &str {
    let mut text = raw.trim();

    if let Some(rest) = text.strip_prefix("```") {
        let tag_len = rest
            .find(|c: char| !c.is_ascii_alphanumeric())
            .unwrap_or(rest.len());
        let tag = &rest[..tag_len];
        text = if FENCE_TAGS.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
            &rest[tag_len..]
        } else {
            rest
        };
    }

    if let Some(rest) = text.trim_end().strip_suffix("```") {
        text = rest;
    }

    text.trim()
}

/// Escape raw newlines, carriage returns and tabs that appear inside string
/// literals. Everything outside strings is copied unchanged.
pub fn escape_control_in_strings(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 16);
    let mut in_string = false;
    let mut escaped = false;

    for ch in raw.chars() {
        if escaped {
            out.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => {
                escaped = true;
                out.push(ch);
            }
            '"' => {
                in_string = !in_string;
                out.push(ch);
            }
            '\n' if in_string => out.push_str("\\n"),
            '\r' if in_string => out.push_str("\\r"),
            '\t' if in_string => out.push_str("\\t"),
            _ => out.push(ch),
        }
    }

    out
}

/// The span from the first `{` to the last `}`
pub fn extract_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

/// Strict parse, then parse after repair
fn parse_with_repair(text: &str) -> Result<Value, serde_json::Error> {
    serde_json::from_str(text).or_else(|_| serde_json::from_str(&escape_control_in_strings(text)))
}

/// Parse model output into JSON using the full fallback chain
pub fn parse_completion(raw: &str) -> Result<Value, ParseError> {
    let cleaned = strip_code_fence(raw);

    match parse_with_repair(cleaned) {
        Ok(value) => Ok(value),
        Err(first) => {
            let object = extract_object(cleaned).ok_or_else(|| ParseError::NotJson(first.to_string()))?;
            parse_with_repair(object).map_err(|e| ParseError::NotJson(e.to_string()))
        }
    }
}

/// Parse model output and require a non-empty `files` array
pub fn parse_artifact(raw: &str) -> Result<BuildArtifact, ParseError> {
    let value = parse_completion(raw)?;

    let has_files = value
        .get("files")
        .and_then(Value::as_array)
        .is_some_and(|files| !files.is_empty());
    if !has_files {
        return Err(ParseError::MissingFiles);
    }

    serde_json::from_value(value).map_err(ParseError::Schema)
}
