//! Retry with backoff for upstream calls.
//!
//! Two independent budgets apply to a single operation:
//!
//! - **Transient** failures (connection reset, timeout, 5xx) get
//!   `transient_attempts` total attempts on the short schedule
//!   (default 0.5s, 1s, 2s, 4s).
//! - **Rate limits** get up to `rate_limit_retries` retries on the long
//!   schedule (default 5s .. 60s). A server-suggested wait, from a
//!   `Retry-After` header or from text like "try again in 20s", replaces the
//!   scheduled delay, capped at `max_retry_after_secs`.
//!
//! Every delay gets `0..=jitter_ms` of random jitter. Anything else fails
//! immediately, and when a budget runs out the last error is returned
//! unchanged.

use anyhow::Result;
use rand::Rng;
use regex::Regex;
use std::future::Future;
use std::sync::OnceLock;
use std::time::Duration;

use deep_research_core::error::UpstreamError;

use crate::config::RetryConfig;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts for transient failures, including the first call.
    pub transient_attempts: u32,
    pub transient_backoff: Vec<Duration>,
    pub rate_limit_retries: u32,
    pub rate_limit_backoff: Vec<Duration>,
    pub max_retry_after: Duration,
    pub jitter: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            transient_attempts: config.transient_attempts.max(1),
            transient_backoff: to_durations(&config.transient_backoff_ms),
            rate_limit_retries: config.rate_limit_retries,
            rate_limit_backoff: to_durations(&config.rate_limit_backoff_ms),
            max_retry_after: Duration::from_secs(config.max_retry_after_secs),
            jitter: Duration::from_millis(config.jitter_ms),
        }
    }

    /// Policy that never retries.
    pub fn none() -> Self {
        Self {
            transient_attempts: 1,
            transient_backoff: vec![Duration::ZERO],
            rate_limit_retries: 0,
            rate_limit_backoff: vec![Duration::ZERO],
            max_retry_after: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

fn to_durations(ms: &[u64]) -> Vec<Duration> {
    ms.iter().map(|m| Duration::from_millis(*m)).collect()
}

/// Delay for the `n`th retry (0-based). Past the end, the last step repeats.
fn scheduled(schedule: &[Duration], n: u32) -> Duration {
    schedule
        .get(n as usize)
        .or_else(|| schedule.last())
        .copied()
        .unwrap_or(Duration::ZERO)
}

fn jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}

/// How the retry loop treats an error.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorClass {
    Transient,
    RateLimited { retry_after_secs: Option<f64> },
    Fatal,
}

/// Classify an error from any upstream call.
///
/// Typed [`UpstreamError`]s are trusted. Otherwise `reqwest` transport
/// errors are transient, and as a last resort the message text is checked
/// for rate-limit and connection wording.
pub fn classify(err: &anyhow::Error) -> ErrorClass {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<UpstreamError>() {
            return match e {
                UpstreamError::Transient(_) => ErrorClass::Transient,
                UpstreamError::RateLimited {
                    retry_after_secs, ..
                } => ErrorClass::RateLimited {
                    retry_after_secs: *retry_after_secs,
                },
                _ => ErrorClass::Fatal,
            };
        }
        if let Some(e) = cause.downcast_ref::<reqwest::Error>() {
            if e.is_timeout() || e.is_connect() {
                return ErrorClass::Transient;
            }
        }
    }

    let msg = format!("{:#}", err).to_lowercase();
    if msg.contains("rate limit")
        || msg.contains("ratelimit")
        || msg.contains("too many requests")
        || msg.contains("429")
    {
        return ErrorClass::RateLimited {
            retry_after_secs: parse_retry_hint(&msg),
        };
    }
    if [
        "timed out",
        "timeout",
        "connection reset",
        "connection refused",
        "connection closed",
        "broken pipe",
        "temporarily unavailable",
    ]
    .iter()
    .any(|needle| msg.contains(needle))
    {
        return ErrorClass::Transient;
    }
    ErrorClass::Fatal
}

fn hint_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)(?:retry[- ]after|try again in|retry in|wait)\s*:?\s*(\d+(?:\.\d+)?)\s*(ms|milliseconds?|s|secs?|seconds?|m|mins?|minutes?)?\b",
        )
        .expect("valid retry hint regex")
    })
}

/// Extract a "retry after N" hint from free text, in seconds.
///
/// Understands `Retry-After: 12`, `try again in 1.5s`, `retry in 250ms`,
/// and `wait 2 minutes`. A number without a unit is seconds.
pub fn parse_retry_hint(text: &str) -> Option<f64> {
    let caps = hint_re().captures(text)?;
    let value: f64 = caps.get(1)?.as_str().parse().ok()?;
    let unit = caps
        .get(2)
        .map(|m| m.as_str().to_lowercase())
        .unwrap_or_default();
    let secs = if unit.starts_with("ms") || unit.starts_with("milli") {
        value / 1000.0
    } else if unit.starts_with('m') {
        value * 60.0
    } else {
        value
    };
    (secs.is_finite() && secs >= 0.0).then_some(secs)
}

/// Run `op` until it succeeds, a non-retryable error occurs, or a retry
/// budget is exhausted.
///
/// `label` only appears in log lines.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut transient_failures: u32 = 0;
    let mut rate_limit_retries: u32 = 0;

    loop {
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        let delay = match classify(&err) {
            ErrorClass::Fatal => return Err(err),
            ErrorClass::Transient => {
                transient_failures += 1;
                if transient_failures >= policy.transient_attempts {
                    tracing::debug!(label, attempts = transient_failures, "transient retries exhausted");
                    return Err(err);
                }
                scheduled(&policy.transient_backoff, transient_failures - 1)
            }
            ErrorClass::RateLimited { retry_after_secs } => {
                if rate_limit_retries >= policy.rate_limit_retries {
                    tracing::debug!(label, retries = rate_limit_retries, "rate-limit retries exhausted");
                    return Err(err);
                }
                rate_limit_retries += 1;
                match retry_after_secs {
                    Some(secs) => Duration::try_from_secs_f64(secs)
                        .unwrap_or(policy.max_retry_after)
                        .min(policy.max_retry_after),
                    None => scheduled(&policy.rate_limit_backoff, rate_limit_retries - 1),
                }
            }
        };

        let delay = delay + jitter(policy.jitter);
        tracing::debug!(
            label,
            error = %err,
            delay_ms = delay.as_millis() as u64,
            "retrying upstream call"
        );
        tokio::time::sleep(delay).await;
    }
}
