//! URL canonicalization for source deduplication.
//!
//! Two sources are the same iff their canonical URLs are equal. The
//! algorithm is fixed so that dedup results are reproducible:
//!
//! 1. Parse the URL; lower-case scheme and host (default ports are dropped).
//! 2. Strip exactly one trailing `/` from the path (`/` itself becomes empty).
//! 3. Drop the fragment.
//! 4. Remove tracking query parameters (`utm_*`, `fbclid`, `gclid`) and
//!    re-encode the remaining pairs in their original relative order.
//! 5. Reassemble.
//!
//! Strings that do not parse as URLs canonicalize to their trimmed form.

use url::form_urlencoded;
use url::Url;

/// Exact-match tracking parameters. Any key starting with `utm_` is also removed.
pub const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid"];

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key.as_str())
}

/// Canonical form of `raw` used as the dedup key.
pub fn canonicalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let parsed = match Url::parse(trimmed) {
        Ok(u) => u,
        Err(_) => return trimmed.to_string(),
    };

    let mut out = String::with_capacity(trimmed.len());
    out.push_str(&parsed.scheme().to_ascii_lowercase());
    out.push_str("://");

    if !parsed.username().is_empty() {
        out.push_str(parsed.username());
        out.push('@');
    }
    if let Some(host) = parsed.host_str() {
        out.push_str(&host.to_ascii_lowercase());
    }
    if let Some(port) = parsed.port() {
        out.push_str(&format!(":{}", port));
    }

    let path = parsed.path();
    out.push_str(path.strip_suffix('/').unwrap_or(path));

    if parsed.query().is_some() {
        let kept: Vec<(String, String)> = parsed
            .query_pairs()
            .filter(|(k, _)| !is_tracking_param(k))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        if !kept.is_empty() {
            let mut ser = form_urlencoded::Serializer::new(String::new());
            for (k, v) in &kept {
                ser.append_pair(k, v);
            }
            out.push('?');
            out.push_str(&ser.finish());
        }
    }

    out
}

/// Registrable-ish domain of a URL: lower-cased host without a leading `www.`.
pub fn domain_of(raw: &str) -> Option<String> {
    let parsed = Url::parse(raw.trim()).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}
