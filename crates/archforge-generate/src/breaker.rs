//! Per-provider circuit breaker.
//!
//! Each provider owns its own `Mutex<CircuitState>`; the outer map is only
//! locked long enough to find or insert an entry, so calls against one
//! provider never wait on another. Time comes from `tokio::time::Instant`,
//! which lets tests drive cool-downs with a paused clock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use archforge_core::BreakerSettings;

use crate::provider::ProviderId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitStatus {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitStatus::Closed => "closed",
            CircuitStatus::Open => "open",
            CircuitStatus::HalfOpen => "half-open",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitState {
    pub status: CircuitStatus,
    pub failures: u32,
    pub last_failure: Option<Instant>,
    pub half_open_calls: u32,
}

impl Default for CircuitState {
    fn default() -> Self {
        Self {
            status: CircuitStatus::Closed,
            failures: 0,
            last_failure: None,
            half_open_calls: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            reset_timeout: Duration::from_secs(30),
            half_open_max_calls: 2,
        }
    }
}

impl From<&BreakerSettings> for CircuitBreakerConfig {
    fn from(s: &BreakerSettings) -> Self {
        Self {
            failure_threshold: s.failure_threshold.max(1),
            reset_timeout: Duration::from_secs(s.reset_timeout_secs),
            half_open_max_calls: s.half_open_max_calls.max(1),
        }
    }
}

/// Circuit state store, one circuit per provider.
#[derive(Debug, Default)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    circuits: Mutex<HashMap<ProviderId, Arc<Mutex<CircuitState>>>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            circuits: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn circuit(&self, provider: ProviderId) -> Arc<Mutex<CircuitState>> {
        let mut circuits = self.circuits.lock().unwrap_or_else(PoisonError::into_inner);
        circuits.entry(provider).or_default().clone()
    }

    fn with_state<R>(&self, provider: ProviderId, f: impl FnOnce(&mut CircuitState) -> R) -> R {
        let circuit = self.circuit(provider);
        let mut state = circuit.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    /// Whether a call may be attempted. An open circuit whose cool-down has
    /// elapsed moves to half-open here.
    pub fn can_execute(&self, provider: ProviderId) -> bool {
        let config = self.config;
        self.with_state(provider, |state| match state.status {
            CircuitStatus::Closed => true,
            CircuitStatus::Open => {
                let cooled = state
                    .last_failure
                    .map_or(true, |at| at.elapsed() >= config.reset_timeout);
                if cooled {
                    state.status = CircuitStatus::HalfOpen;
                    state.half_open_calls = 0;
                    tracing::info!(provider = %provider, "circuit half-open");
                }
                cooled
            }
            CircuitStatus::HalfOpen => state.half_open_calls < config.half_open_max_calls,
        })
    }

    pub fn record_success(&self, provider: ProviderId) {
        let config = self.config;
        self.with_state(provider, |state| match state.status {
            CircuitStatus::Closed => state.failures = 0,
            CircuitStatus::HalfOpen => {
                state.half_open_calls += 1;
                if state.half_open_calls >= config.half_open_max_calls {
                    state.status = CircuitStatus::Closed;
                    state.failures = 0;
                    state.half_open_calls = 0;
                    tracing::info!(provider = %provider, "circuit closed");
                }
            }
            CircuitStatus::Open => {}
        });
    }

    pub fn record_failure(&self, provider: ProviderId) {
        let config = self.config;
        self.with_state(provider, |state| {
            let now = Instant::now();
            match state.status {
                CircuitStatus::Closed => {
                    state.failures += 1;
                    if state.failures >= config.failure_threshold {
                        state.status = CircuitStatus::Open;
                        state.last_failure = Some(now);
                        tracing::warn!(
                            provider = %provider,
                            failures = state.failures,
                            "circuit opened"
                        );
                    }
                }
                CircuitStatus::HalfOpen => {
                    state.status = CircuitStatus::Open;
                    state.last_failure = Some(now);
                    state.half_open_calls = 0;
                    tracing::warn!(provider = %provider, "circuit re-opened from half-open");
                }
                CircuitStatus::Open => state.last_failure = Some(now),
            }
        });
    }

    pub fn status(&self, provider: ProviderId) -> CircuitState {
        self.with_state(provider, |state| *state)
    }

    pub fn reset(&self, provider: ProviderId) {
        self.with_state(provider, |state| *state = CircuitState::default());
        tracing::info!(provider = %provider, "circuit reset");
    }

    /// Remaining cool-down of an open circuit; zero otherwise.
    pub fn retry_after(&self, provider: ProviderId) -> Duration {
        let reset_timeout = self.config.reset_timeout;
        self.with_state(provider, |state| match (state.status, state.last_failure) {
            (CircuitStatus::Open, Some(at)) => reset_timeout.saturating_sub(at.elapsed()),
            _ => Duration::ZERO,
        })
    }

    /// States of every provider seen so far, sorted by provider id.
    pub fn snapshot_all(&self) -> Vec<(ProviderId, CircuitState)> {
        let circuits: Vec<(ProviderId, Arc<Mutex<CircuitState>>)> = {
            let map = self.circuits.lock().unwrap_or_else(PoisonError::into_inner);
            map.iter().map(|(id, c)| (*id, c.clone())).collect()
        };
        let mut out: Vec<(ProviderId, CircuitState)> = circuits
            .into_iter()
            .map(|(id, c)| (id, *c.lock().unwrap_or_else(PoisonError::into_inner)))
            .collect();
        out.sort_by_key(|(id, _)| *id);
        out
    }
}
