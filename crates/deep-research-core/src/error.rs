//! Typed errors for calls to upstream capabilities.
//!
//! Provider implementations return [`UpstreamError`] (boxed inside
//! `anyhow::Error`) so the retry controller can tell transient failures
//! and rate limits apart from errors that must not be retried.

use thiserror::Error;

/// Failure of a call to the search provider or the language model.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Connection reset, refused connection, timeout, or a 5xx response.
    #[error("transient upstream error: {0}")]
    Transient(String),

    /// The upstream asked us to slow down (HTTP 429 or an equivalent message).
    #[error("rate limited: {message}")]
    RateLimited {
        /// Server-suggested wait, from a `Retry-After` header or the message text.
        retry_after_secs: Option<f64>,
        message: String,
    },

    /// Non-retryable API error.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Missing or rejected credentials.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The upstream answered but the payload did not match the expected schema.
    #[error("parse error: {0}")]
    Parse(String),
}

impl UpstreamError {
    /// Whether the retry controller should retry this error on its
    /// short transient schedule.
    pub fn is_transient(&self) -> bool {
        matches!(self, UpstreamError::Transient(_))
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, UpstreamError::RateLimited { .. })
    }
}
