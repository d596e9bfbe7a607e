//! Recursive lookup of a string field in an arbitrary JSON tree.

use serde_json::Value;

/// Field names that may hold a job prompt, highest priority first
pub const PROMPT_KEYS: &[&str] = &[
    "prompt",
    "mysteryPrompt",
    "challengePrompt",
    "description",
    "text",
];

/// Prompts shorter than this (after trimming) are treated as placeholders
pub const MIN_PROMPT_CHARS: usize = 11;

/// Depth-first search for the first acceptable string under one of `keys`.
///
/// At each object the candidate keys are checked in priority order before
/// descending into child values; arrays are searched item by item. The
/// returned string is trimmed, and `accept` sees the trimmed value.
pub fn deep_find_string(value: &Value, keys: &[&str], accept: &dyn Fn(&str) -> bool) -> Option<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .find_map(|item| deep_find_string(item, keys, accept)),
        Value::Object(map) => {
            for key in keys {
                if let Some(Value::String(s)) = map.get(*key) {
                    let trimmed = s.trim();
                    if accept(trimmed) {
                        return Some(trimmed.to_string());
                    }
                }
            }
            map.values()
                .find_map(|child| deep_find_string(child, keys, accept))
        }
        _ => None,
    }
}

/// [`deep_find_string`] with the prompt keys and minimum length
pub fn deep_find_prompt(value: &Value) -> Option<String> {
    deep_find_string(value, PROMPT_KEYS, &|s: &str| {
        s.chars().count() >= MIN_PROMPT_CHARS
    })
}
