use std::fmt;
use std::time::Duration;

use crate::provider::ProviderId;

/// Network-layer cause of a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkCause {
    Timeout,
    Connect,
    Other,
}

impl fmt::Display for NetworkCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NetworkCause::Timeout => "timeout",
            NetworkCause::Connect => "connection refused",
            NetworkCause::Other => "network failure",
        })
    }
}

/// Failure of a single attempt against one provider.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP {status}: {message}")]
    Http {
        status: u16,
        message: String,
        /// Parsed from a `Retry-After` header when the provider sent one
        retry_after: Option<Duration>,
    },

    #[error("{cause}: {message}")]
    Network { cause: NetworkCause, message: String },

    #[error("stream error: {0}")]
    Stream(String),

    /// Error from a client library that only exposes a message.
    #[error("{0}")]
    Backend(String),

    #[error("provider returned an empty response")]
    EmptyResponse,

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ProviderError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ProviderError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        let message = err.to_string();
        if err.is_timeout() {
            ProviderError::Network {
                cause: NetworkCause::Timeout,
                message,
            }
        } else if err.is_connect() {
            ProviderError::Network {
                cause: NetworkCause::Connect,
                message,
            }
        } else if let Some(status) = err.status() {
            ProviderError::Http {
                status: status.as_u16(),
                message,
                retry_after: None,
            }
        } else {
            ProviderError::Network {
                cause: NetworkCause::Other,
                message,
            }
        }
    }
}

fn ceil_secs(d: &Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

/// Errors surfaced by the generation entry points.
#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    /// Raised locally before any network call.
    #[error("provider {provider} unavailable: circuit open, retry after {}s", ceil_secs(.retry_after))]
    CircuitOpen {
        provider: ProviderId,
        retry_after: Duration,
    },

    #[error("provider {provider} failed: {source}")]
    Provider {
        provider: ProviderId,
        #[source]
        source: ProviderError,
    },

    /// The stream failed after tokens were already delivered. Never retried.
    #[error("stream from {provider} interrupted after {delivered} chunks: {message}")]
    StreamInterrupted {
        provider: ProviderId,
        delivered: usize,
        message: String,
    },

    #[error("unknown model: {0}")]
    UnknownModel(String),

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("generation cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),
}

impl GenerateError {
    pub fn provider_error(&self) -> Option<&ProviderError> {
        match self {
            GenerateError::Provider { source, .. } => Some(source),
            _ => None,
        }
    }

    pub fn provider(&self) -> Option<ProviderId> {
        match self {
            GenerateError::CircuitOpen { provider, .. }
            | GenerateError::Provider { provider, .. }
            | GenerateError::StreamInterrupted { provider, .. } => Some(*provider),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circuit_open_message_rounds_up() {
        let err = GenerateError::CircuitOpen {
            provider: ProviderId::DeepSeek,
            retry_after: Duration::from_millis(12_300),
        };
        assert_eq!(
            err.to_string(),
            "provider deepseek unavailable: circuit open, retry after 13s"
        );
    }

    #[test]
    fn network_cause_reads_naturally() {
        let err = ProviderError::Network {
            cause: NetworkCause::Connect,
            message: "tcp connect error".to_string(),
        };
        assert_eq!(err.to_string(), "connection refused: tcp connect error");
        assert_eq!(err.status(), None);
    }
}
