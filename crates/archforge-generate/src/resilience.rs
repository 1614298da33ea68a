use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::breaker::CircuitBreaker;
use crate::error::{GenerateError, ProviderError};
use crate::provider::ProviderId;
use crate::retry::{with_retry, RetryPolicy};

/// Circuit breaker + retry around a provider call. Every provider call goes
/// through here, and this is the only place breaker outcomes are recorded.
#[derive(Debug, Clone)]
pub struct ResilientCaller {
    breaker: Arc<CircuitBreaker>,
    policy: RetryPolicy,
}

impl ResilientCaller {
    pub fn new(breaker: Arc<CircuitBreaker>, policy: RetryPolicy) -> Self {
        Self { breaker, policy }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn admit(&self, provider: ProviderId, label: &str) -> Result<(), GenerateError> {
        if self.breaker.can_execute(provider) {
            return Ok(());
        }
        let retry_after = self.breaker.retry_after(provider);
        tracing::warn!(
            provider = %provider,
            operation = label,
            retry_after_ms = retry_after.as_millis() as u64,
            "circuit open, skipping call"
        );
        Err(GenerateError::CircuitOpen {
            provider,
            retry_after,
        })
    }

    fn settle<T>(
        &self,
        provider: ProviderId,
        label: &str,
        result: Result<T, ProviderError>,
    ) -> Result<T, GenerateError> {
        match result {
            Ok(value) => {
                self.breaker.record_success(provider);
                Ok(value)
            }
            Err(source) => {
                self.breaker.record_failure(provider);
                tracing::warn!(provider = %provider, operation = label, error = %source, "call failed");
                Err(GenerateError::Provider { provider, source })
            }
        }
    }

    /// Dropping the returned future cancels the attempt without recording an
    /// outcome.
    pub async fn call_with_resilience<T, F, Fut>(
        &self,
        provider: ProviderId,
        operation: F,
        label: &str,
    ) -> Result<T, GenerateError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        self.admit(provider, label)?;
        tracing::debug!(provider = %provider, operation = label, "calling provider");
        let result = with_retry(operation, &self.policy).await;
        self.settle(provider, label, result)
    }

    /// Like [`call_with_resilience`](Self::call_with_resilience), returning
    /// `Cancelled` once `cancel` fires. Cancellation is neither a success nor
    /// a failure for the breaker.
    pub async fn call_with_resilience_cancellable<T, F, Fut>(
        &self,
        provider: ProviderId,
        operation: F,
        label: &str,
        cancel: &CancellationToken,
    ) -> Result<T, GenerateError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        if cancel.is_cancelled() {
            return Err(GenerateError::Cancelled);
        }
        self.admit(provider, label)?;
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!(provider = %provider, operation = label, "call cancelled");
                return Err(GenerateError::Cancelled);
            }
            result = with_retry(operation, &self.policy) => result,
        };
        self.settle(provider, label, result)
    }
}
