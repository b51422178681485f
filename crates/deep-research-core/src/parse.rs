//! Strict parsers for list-shaped language model output.
//!
//! Model responses are never evaluated as expressions. A list is accepted
//! only when it is a JSON array of the expected element type, optionally
//! wrapped in a Markdown code fence; anything else is a
//! [`UpstreamError::Parse`].

use crate::error::UpstreamError;

/// Remove a surrounding Markdown code fence (```` ``` ```` or ```` ```json ````).
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Parse a JSON array of non-negative integers that fit in `u32`.
///
/// Rejects floats, negative numbers, strings, nested arrays, and any
/// trailing content.
pub fn parse_index_list(raw: &str) -> Result<Vec<u32>, UpstreamError> {
    let body = strip_code_fences(raw);
    let values: Vec<u64> = serde_json::from_str(body)
        .map_err(|e| UpstreamError::Parse(format!("expected a JSON array of integers: {}", e)))?;
    values
        .into_iter()
        .map(|v| {
            u32::try_from(v)
                .map_err(|_| UpstreamError::Parse(format!("index out of range: {}", v)))
        })
        .collect()
}

/// Parse a JSON array of strings, dropping blank entries.
pub fn parse_string_list(raw: &str) -> Result<Vec<String>, UpstreamError> {
    let body = strip_code_fences(raw);
    let values: Vec<String> = serde_json::from_str(body)
        .map_err(|e| UpstreamError::Parse(format!("expected a JSON array of strings: {}", e)))?;
    Ok(values
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}
