//! Pulling JSON out of free-form model replies.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;

/// Extract the outermost `{...}` from text that may contain other content.
/// Braces inside JSON strings are skipped.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse the first JSON object in a model reply, with context on failure.
pub fn parse_reply<T: DeserializeOwned>(text: &str, what: &str) -> Result<T> {
    let json = extract_json_object(text)
        .with_context(|| format!("No JSON object found in {what} reply"))?;
    serde_json::from_str(json).with_context(|| format!("Failed to parse {what} reply"))
}
