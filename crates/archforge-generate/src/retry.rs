//! Error classification and exponential backoff.
//!
//! Structured fields (HTTP status, network cause) decide first. Message
//! sniffing applies to errors whose source exposes nothing else, and to HTTP
//! errors whose status alone reads as permanent (some providers report rate
//! limits as 400 or 403 with an explanatory body).

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use archforge_core::RetrySettings;

use crate::error::ProviderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient; retried locally with backoff.
    Retryable,
    /// Surfaced immediately so the caller can fail over.
    RateLimited,
    /// Never retried.
    Permanent,
}

pub trait RetryClassifiable {
    fn classify(&self) -> ErrorClass;
}

/// Rate-limit phrase some providers return in Chinese ("requests too frequent").
const RATE_LIMIT_PHRASE_ZH: &str = "请求过于频繁";

const RETRYABLE_MARKERS: &[&str] = &[
    "timeout",
    "timed out",
    "network",
    "econnrefused",
    "connection refused",
    "econnreset",
    "connection reset",
    "429",
    "502",
    "503",
    "504",
];

/// Classify a bare status code.
pub fn classify_status(status: u16) -> ErrorClass {
    match status {
        429 => ErrorClass::RateLimited,
        s if s >= 500 => ErrorClass::Retryable,
        _ => ErrorClass::Permanent,
    }
}

/// Classify from message text alone.
pub fn classify_message(message: &str) -> ErrorClass {
    let lower = message.to_lowercase();
    if lower.contains("429") || lower.contains("rate limit") || message.contains(RATE_LIMIT_PHRASE_ZH)
    {
        return ErrorClass::RateLimited;
    }
    if RETRYABLE_MARKERS.iter().any(|m| lower.contains(m)) {
        return ErrorClass::Retryable;
    }
    ErrorClass::Permanent
}

impl RetryClassifiable for ProviderError {
    fn classify(&self) -> ErrorClass {
        match self {
            ProviderError::Http { status, message, .. } => match classify_status(*status) {
                ErrorClass::Permanent => classify_message(message),
                class => class,
            },
            ProviderError::Network { .. } => ErrorClass::Retryable,
            ProviderError::Stream(msg) | ProviderError::Backend(msg) => classify_message(msg),
            ProviderError::EmptyResponse | ProviderError::InvalidRequest(_) => {
                ErrorClass::Permanent
            }
        }
    }
}

pub fn is_retryable_error<E: RetryClassifiable>(err: &E) -> bool {
    matches!(err.classify(), ErrorClass::Retryable | ErrorClass::RateLimited)
}

pub fn is_rate_limit_error<E: RetryClassifiable>(err: &E) -> bool {
    err.classify() == ErrorClass::RateLimited
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(10_000),
            multiplier: 2.0,
        }
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(s: &RetrySettings) -> Self {
        Self {
            max_attempts: s.max_attempts.max(1),
            base_delay: Duration::from_millis(s.base_delay_ms),
            max_delay: Duration::from_millis(s.max_delay_ms),
            multiplier: if s.multiplier >= 1.0 { s.multiplier } else { 1.0 },
        }
    }
}

/// `min(base * multiplier^(attempt-1), max)`; `attempt` is 1-indexed.
pub fn calculate_delay(attempt: u32, policy: &RetryPolicy) -> Duration {
    let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
    let factor = policy.multiplier.powi(exponent);
    let millis = policy.base_delay.as_millis() as f64 * factor;
    let cap = policy.max_delay.as_millis() as f64;
    if !millis.is_finite() || millis >= cap {
        policy.max_delay
    } else {
        Duration::from_millis(millis as u64)
    }
}

/// Run `operation` up to `policy.max_attempts` times.
///
/// Rate-limit and permanent errors are returned after the attempt that
/// produced them. Retryable errors sleep `calculate_delay(attempt)` on the
/// tokio timer, so only the calling task is suspended.
pub async fn with_retry<T, E, F, Fut>(mut operation: F, policy: &RetryPolicy) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryClassifiable + Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(attempt, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => match err.classify() {
                ErrorClass::RateLimited => {
                    tracing::warn!(attempt, error = %err, "rate limited, not retrying");
                    return Err(err);
                }
                ErrorClass::Permanent => {
                    tracing::debug!(attempt, error = %err, "non-retryable error");
                    return Err(err);
                }
                ErrorClass::Retryable if attempt >= max_attempts => {
                    tracing::warn!(attempt, error = %err, "retries exhausted");
                    return Err(err);
                }
                ErrorClass::Retryable => {
                    let delay = calculate_delay(attempt, policy);
                    tracing::info!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            },
        }
    }
}
