//! Repeated-failure circuit breakers for infrastructure operations.
//!
//! These breakers never reject operations. They track how long an operation
//! has been failing without interruption and escalate to the critical error
//! handler once failures have persisted for a configured window.
//!
//! # Circuit Breaker States
//!
//! - **Closed**: Normal operation, no outstanding failures
//! - **Armed**: At least one failure since the last success; the window is running
//! - **Triggered**: Failures outlasted the window and the critical error
//!   handler has been invoked; stays here until the next success
//!
//! # Example
//!
//! ```rust
//! use queue_pump_core::circuit_breaker::{
//!     CircuitBreaker, CircuitBreakerConfig, CircuitState, RepeatedFailuresCircuitBreaker,
//! };
//! use queue_pump_core::critical::LoggingCriticalErrorHandler;
//! use std::sync::Arc;
//!
//! # async fn example() {
//! let breaker = RepeatedFailuresCircuitBreaker::new(
//!     CircuitBreakerConfig::default(),
//!     Arc::new(LoggingCriticalErrorHandler),
//! );
//! breaker.success();
//! assert_eq!(breaker.state(), CircuitState::Closed);
//! # }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::PumpSettings;

mod breaker;
pub use breaker::RepeatedFailuresCircuitBreaker;

// ============================================================================
// Circuit Breaker Trait
// ============================================================================

/// Failure escalation tracker for a single kind of operation.
#[async_trait]
pub trait CircuitBreaker: Send + Sync {
    /// Report a successful operation.
    ///
    /// Disarms the breaker and clears the failure window.
    fn success(&self);

    /// Report a failed operation.
    ///
    /// Arms the breaker on the first failure after a success and invokes the
    /// critical error handler once failures have lasted for the configured
    /// window. Returns after pausing for the configured failure delay.
    async fn failure(&self, error: &anyhow::Error);

    /// Get current circuit breaker state.
    fn state(&self) -> CircuitState;

    /// Get circuit breaker metrics and statistics.
    fn metrics(&self) -> CircuitMetrics;
}

// ============================================================================
// Circuit State
// ============================================================================

/// Current state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Armed,
    Triggered,
}

impl CircuitState {
    /// Check if failures are outstanding.
    pub fn is_failing(&self) -> bool {
        matches!(self, Self::Armed | Self::Triggered)
    }
}

// ============================================================================
// Circuit Breaker Configuration
// ============================================================================

/// Configuration for circuit breaker behavior.
///
/// # Default Configuration
///
/// - Time to wait before triggering: 30 seconds
/// - Delay after each failure: 1 second
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Name used in log entries and the critical error description.
    pub name: String,

    /// How long failures must persist before triggering (seconds).
    pub time_to_wait_before_triggering_seconds: u64,

    /// Pause applied after each failure (milliseconds).
    pub delay_after_failure_ms: u64,
}

impl CircuitBreakerConfig {
    pub fn time_to_wait_before_triggering(&self) -> Duration {
        Duration::from_secs(self.time_to_wait_before_triggering_seconds)
    }

    pub fn delay_after_failure(&self) -> Duration {
        Duration::from_millis(self.delay_after_failure_ms)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            name: "unknown".to_string(),
            time_to_wait_before_triggering_seconds: 30,
            delay_after_failure_ms: 1_000,
        }
    }
}

// ============================================================================
// Circuit Metrics
// ============================================================================

/// Metrics and statistics for circuit breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitMetrics {
    /// Current circuit state.
    pub state: CircuitState,

    /// Failures since the last success.
    pub consecutive_failures: u32,

    /// Failures reported over the breaker's lifetime.
    pub total_failures: u64,

    /// Number of times the critical error handler was invoked.
    pub trigger_count: u64,

    /// Time of the first failure after the last success.
    pub opened_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Pump-Specific Configurations
// ============================================================================

/// Circuit breaker configuration for queue peek operations.
pub fn peek_circuit_breaker_config(settings: &PumpSettings) -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        name: "MessageQueuePeek".to_string(),
        time_to_wait_before_triggering_seconds: settings.time_to_wait_before_triggering_seconds,
        delay_after_failure_ms: settings.delay_after_failure_ms,
    }
}

/// Circuit breaker configuration for dequeue-and-process operations.
pub fn receive_circuit_breaker_config(settings: &PumpSettings) -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        name: "MessageQueueReceive".to_string(),
        time_to_wait_before_triggering_seconds: settings.time_to_wait_before_triggering_seconds,
        delay_after_failure_ms: settings.delay_after_failure_ms,
    }
}

/// Circuit breaker configuration for timeout storage access.
///
/// Storage outages are tolerated for longer than queue outages: the poller
/// retries on its own schedule and nothing is lost while it waits.
pub fn timeout_storage_circuit_breaker_config() -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        name: "TimeoutStorageConnectivity".to_string(),
        time_to_wait_before_triggering_seconds: 120,
        delay_after_failure_ms: 10_000,
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
