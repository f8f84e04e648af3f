//! Default circuit breaker implementation.
//!
//! Provides a thread-safe circuit breaker using Arc<RwLock<>> for state
//! management. Failure windows are measured with `tokio::time::Instant` so
//! that tests can drive them with a paused clock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::time::Instant;
use tracing::{error, info, warn};

use super::{CircuitBreaker, CircuitBreakerConfig, CircuitMetrics, CircuitState};
use crate::critical::CriticalErrorHandler;

// ============================================================================
// Internal State
// ============================================================================

/// Internal state for circuit breaker.
///
/// Protected by RwLock for thread-safe access.
#[derive(Debug)]
struct InternalState {
    /// Current circuit state
    current_state: CircuitState,

    /// Failures since the last success
    consecutive_failures: u32,

    /// Monotonic time of the first failure after the last success
    armed_at: Option<Instant>,

    /// Wall-clock time of the first failure after the last success
    opened_at: Option<DateTime<Utc>>,

    total_failures: u64,

    trigger_count: u64,
}

impl InternalState {
    fn new() -> Self {
        Self {
            current_state: CircuitState::Closed,
            consecutive_failures: 0,
            armed_at: None,
            opened_at: None,
            total_failures: 0,
            trigger_count: 0,
        }
    }
}

// ============================================================================
// Repeated Failures Circuit Breaker
// ============================================================================

/// Circuit breaker that escalates once failures outlast a time window.
///
/// Cloning yields a handle on the same breaker state.
#[derive(Clone)]
pub struct RepeatedFailuresCircuitBreaker {
    config: CircuitBreakerConfig,
    state: Arc<RwLock<InternalState>>,
    critical: Arc<dyn CriticalErrorHandler>,
}

impl RepeatedFailuresCircuitBreaker {
    /// Create new circuit breaker with configuration.
    pub fn new(config: CircuitBreakerConfig, critical: Arc<dyn CriticalErrorHandler>) -> Self {
        Self {
            config,
            state: Arc::new(RwLock::new(InternalState::new())),
            critical,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Record a failure and decide whether this failure triggers the breaker.
    fn record_failure(&self) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();

        state.consecutive_failures += 1;
        state.total_failures += 1;

        if state.current_state == CircuitState::Closed {
            state.current_state = CircuitState::Armed;
            state.armed_at = Some(now);
            state.opened_at = Some(Utc::now());
            warn!(
                circuit_breaker = %self.config.name,
                "Circuit breaker armed"
            );
        }

        let window_elapsed = state
            .armed_at
            .map(|armed_at| now.duration_since(armed_at) >= self.config.time_to_wait_before_triggering())
            .unwrap_or(false);

        if state.current_state == CircuitState::Armed && window_elapsed {
            state.current_state = CircuitState::Triggered;
            state.trigger_count += 1;
            return true;
        }

        false
    }
}

#[async_trait]
impl CircuitBreaker for RepeatedFailuresCircuitBreaker {
    fn success(&self) {
        {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            if state.current_state == CircuitState::Closed {
                return;
            }
        }

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.current_state != CircuitState::Closed {
            info!(
                circuit_breaker = %self.config.name,
                failures = state.consecutive_failures,
                "Circuit breaker disarmed"
            );
        }
        state.current_state = CircuitState::Closed;
        state.consecutive_failures = 0;
        state.armed_at = None;
        state.opened_at = None;
    }

    async fn failure(&self, error: &anyhow::Error) {
        if self.record_failure() {
            error!(
                circuit_breaker = %self.config.name,
                error = %error,
                "Circuit breaker triggered"
            );
            let description = format!(
                "{} circuit breaker triggered: failures persisted for more than {:?}",
                self.config.name,
                self.config.time_to_wait_before_triggering()
            );
            self.critical.raise(&description, error);
        }

        let delay = self.config.delay_after_failure();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    fn state(&self) -> CircuitState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .current_state
    }

    fn metrics(&self) -> CircuitMetrics {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        CircuitMetrics {
            state: state.current_state,
            consecutive_failures: state.consecutive_failures,
            total_failures: state.total_failures,
            trigger_count: state.trigger_count,
            opened_at: state.opened_at,
        }
    }
}

impl std::fmt::Debug for RepeatedFailuresCircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepeatedFailuresCircuitBreaker")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
#[path = "breaker_tests.rs"]
mod tests;
