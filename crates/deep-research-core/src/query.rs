//! Query normalization, cache keys, and the time-sensitivity rule.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

/// Salt prefixed to every cache key. Bump it whenever the meaning of a
/// cached payload changes (e.g. results per query) to invalidate old rows.
pub const DEFAULT_CACHE_VERSION: &str = "v2";

/// Default cap on the normalized query length used in cache keys.
pub const DEFAULT_MAX_KEY_CHARS: usize = 256;

/// Lower-case, collapse whitespace runs to a single space, trim, and
/// truncate to `max_chars` characters.
pub fn normalize_query(query: &str, max_chars: usize) -> String {
    let collapsed = query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    collapsed.chars().take(max_chars).collect()
}

/// Cache key for `query`: `"<version>:<normalized query>"`.
pub fn cache_key(version: &str, query: &str, max_chars: usize) -> String {
    format!("{}:{}", version, normalize_query(query, max_chars))
}

fn keyword_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(today|tonight|yesterday|tomorrow|latest|breaking|now|current|currently|recent|recently|live|this\s+week|this\s+month|this\s+year)\b",
        )
        .expect("keyword pattern is valid")
    })
}

fn year_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(\d{4})\b").expect("year pattern is valid"))
}

/// Whether results for `query` go stale too quickly to cache.
///
/// True when the query contains a freshness keyword (`today`, `latest`,
/// `breaking`, `now`, ...) as a whole word, or a four-digit year within one
/// year of `current_year`.
pub fn is_time_sensitive(query: &str, current_year: i32) -> bool {
    if keyword_re().is_match(query) {
        return true;
    }
    year_re().captures_iter(query).any(|caps| {
        caps[1]
            .parse::<i32>()
            .map(|y| (y - current_year).abs() <= 1)
            .unwrap_or(false)
    })
}

/// Trim, drop blanks and case-insensitive duplicates (including anything in
/// `already_run`), and keep at most `limit` queries in their original order.
pub fn dedupe_queries<I>(queries: I, already_run: &HashSet<String>, limit: usize) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen: HashSet<String> = already_run.clone();
    let mut out = Vec::new();
    for q in queries {
        if out.len() >= limit {
            break;
        }
        let trimmed = q.trim();
        if trimmed.is_empty() {
            continue;
        }
        if seen.insert(normalize_query(trimmed, usize::MAX)) {
            out.push(trimmed.to_string());
        }
    }
    out
}
