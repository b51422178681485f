//! Run-level errors and terminal failure classification.
//!
//! Upstream calls fail with [`UpstreamError`] (defined in the core crate);
//! the helpers here translate `reqwest` failures and HTTP statuses into it.
//! [`FailureKind::classify`] maps whatever error ends a run onto the short
//! list of categories the CLI reports to the user.

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use thiserror::Error;

use deep_research_core::error::UpstreamError;

use crate::retry::parse_retry_hint;

#[derive(Debug, Error)]
pub enum ResearchError {
    /// The caller stopped listening for progress.
    #[error("research run cancelled")]
    Cancelled,

    #[error("synthesis failed: {0}")]
    Synthesis(String),

    #[error("verification failed: {0}")]
    Verification(String),

    /// A required API key environment variable is unset or empty.
    #[error("missing credential: environment variable {0} is not set")]
    MissingCredential(String),
}

/// Category of a terminal failure, used to pick the CLI message and exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Connection,
    Auth,
    Quota,
    Cancelled,
    Internal,
}

impl FailureKind {
    pub fn classify(err: &anyhow::Error) -> Self {
        // `downcast_ref` on the anyhow handle also sees values attached with
        // `.context(..)`, which the plain cause chain does not.
        match err.downcast_ref::<ResearchError>() {
            Some(ResearchError::Cancelled) => return FailureKind::Cancelled,
            Some(ResearchError::MissingCredential(_)) => return FailureKind::Auth,
            _ => {}
        }
        for cause in err.chain() {
            if let Some(e) = cause.downcast_ref::<ResearchError>() {
                match e {
                    ResearchError::Cancelled => return FailureKind::Cancelled,
                    ResearchError::MissingCredential(_) => return FailureKind::Auth,
                    // Synthesis/verification wrap an upstream cause further down the chain.
                    _ => continue,
                }
            }
            if let Some(e) = cause.downcast_ref::<UpstreamError>() {
                return match e {
                    UpstreamError::Transient(_) => FailureKind::Connection,
                    UpstreamError::RateLimited { .. } => FailureKind::Quota,
                    UpstreamError::Auth(_) => FailureKind::Auth,
                    UpstreamError::Api { status: 402, .. } => FailureKind::Quota,
                    UpstreamError::Api { .. } | UpstreamError::Parse(_) => FailureKind::Internal,
                };
            }
            if let Some(e) = cause.downcast_ref::<reqwest::Error>() {
                if e.is_connect() || e.is_timeout() {
                    return FailureKind::Connection;
                }
            }
        }
        FailureKind::Internal
    }

    /// One-line explanation printed before the error chain.
    pub fn headline(&self) -> &'static str {
        match self {
            FailureKind::Connection => {
                "Could not reach an upstream service (connection failed or timed out after retries)."
            }
            FailureKind::Auth => "Authentication failed: check the configured API key variables.",
            FailureKind::Quota => "Upstream quota or rate limit exhausted; try again later.",
            FailureKind::Cancelled => "Research run cancelled.",
            FailureKind::Internal => "Research run failed with an internal error.",
        }
    }

    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            FailureKind::Auth => 2,
            _ => 1,
        }
    }
}

/// Map a transport-level `reqwest` error.
pub fn upstream_from_reqwest(err: reqwest::Error) -> UpstreamError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        return UpstreamError::Transient(err.to_string());
    }
    if err.is_decode() || err.is_body() {
        return UpstreamError::Parse(err.to_string());
    }
    match err.status() {
        Some(status) => upstream_from_status(status, None, &err.to_string()),
        None => UpstreamError::Transient(err.to_string()),
    }
}

/// Map a non-success HTTP status (plus response headers and body) to an
/// [`UpstreamError`].
pub fn upstream_from_status(
    status: StatusCode,
    headers: Option<&HeaderMap>,
    body: &str,
) -> UpstreamError {
    let message = format!("{}: {}", status, truncate(body, 300));
    match status.as_u16() {
        429 => UpstreamError::RateLimited {
            retry_after_secs: headers
                .and_then(retry_after_header)
                .or_else(|| parse_retry_hint(body)),
            message,
        },
        401 | 403 => UpstreamError::Auth(message),
        408 => UpstreamError::Transient(message),
        s if s >= 500 => UpstreamError::Transient(message),
        s => UpstreamError::Api { status: s, message },
    }
}

/// Read a `Retry-After` header given in seconds. HTTP-date values are ignored.
pub fn retry_after_header(headers: &HeaderMap) -> Option<f64> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|s| s.is_finite() && *s >= 0.0)
}

/// Prefix of `s` holding at most `max` characters.
pub(crate) fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
