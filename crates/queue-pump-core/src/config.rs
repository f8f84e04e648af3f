//! Pump and delayed delivery settings.
//!
//! All settings deserialize with defaults for every field so that partial
//! configuration files are accepted. Durations are stored as plain integers
//! (`_ms` / `_seconds`) and exposed through [`Duration`] accessors.

use queue_pump_runtime::QueueAddress;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::PumpError;

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

// ============================================================================
// Transaction Mode
// ============================================================================

/// Consistency level used when receiving messages.
///
/// Selects which receive strategy the pump uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransactionMode {
    /// Destructive receive without any transaction
    None,
    /// Receive inside a native transaction
    ReceiveOnly,
    /// Receive inside a native transaction that outgoing sends also join
    #[default]
    SendsAtomicWithReceive,
    /// Receive inside an ambient transaction scope
    TransactionScope,
}

impl TransactionMode {
    /// Check if the input queue must support native transactions
    pub fn requires_transactional_queue(&self) -> bool {
        !matches!(self, Self::None)
    }
}

impl fmt::Display for TransactionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::ReceiveOnly => "receive_only",
            Self::SendsAtomicWithReceive => "sends_atomic_with_receive",
            Self::TransactionScope => "transaction_scope",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// Pump Settings
// ============================================================================

/// Settings for a single message pump
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PumpSettings {
    pub transaction_mode: TransactionMode,

    /// Queue receiving poison and dead-lettered messages
    pub error_queue: String,

    /// How long a single peek waits for a message
    pub peek_timeout_ms: u64,

    /// How long a dequeue waits after a successful peek
    pub receive_timeout_ms: u64,

    /// How long failures must persist before the critical callback fires
    pub time_to_wait_before_triggering_seconds: u64,

    /// Pause after each reported failure
    pub delay_after_failure_ms: u64,

    /// Maximum number of messages tracked in the failure record cache
    pub failure_cache_capacity: usize,

    /// Processing attempts before a message is moved to the error queue
    pub max_processing_attempts: u32,

    pub transaction_scope_timeout_seconds: u64,

    /// Remove every message from the input queue when the pump starts
    pub purge_on_startup: bool,
}

impl Default for PumpSettings {
    fn default() -> Self {
        Self {
            transaction_mode: TransactionMode::default(),
            error_queue: "error".to_string(),
            peek_timeout_ms: 1_000,
            receive_timeout_ms: 10,
            time_to_wait_before_triggering_seconds: 30,
            delay_after_failure_ms: 1_000,
            failure_cache_capacity: 1_000,
            max_processing_attempts: 5,
            transaction_scope_timeout_seconds: 60,
            purge_on_startup: false,
        }
    }
}

impl PumpSettings {
    pub fn peek_timeout(&self) -> Duration {
        Duration::from_millis(self.peek_timeout_ms)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn time_to_wait_before_triggering(&self) -> Duration {
        Duration::from_secs(self.time_to_wait_before_triggering_seconds)
    }

    pub fn delay_after_failure(&self) -> Duration {
        Duration::from_millis(self.delay_after_failure_ms)
    }

    pub fn transaction_scope_timeout(&self) -> Duration {
        Duration::from_secs(self.transaction_scope_timeout_seconds)
    }

    /// Parse the configured error queue address
    pub fn error_queue_address(&self) -> Result<QueueAddress, PumpError> {
        self.error_queue
            .parse()
            .map_err(|e| PumpError::InvalidSettings {
                message: format!("error_queue '{}': {}", self.error_queue, e),
            })
    }

    /// Validate settings consistency
    pub fn validate(&self) -> Result<(), PumpError> {
        self.error_queue_address()?;

        if self.peek_timeout_ms == 0 {
            return Err(PumpError::InvalidSettings {
                message: "peek_timeout_ms must be greater than zero".to_string(),
            });
        }

        if self.failure_cache_capacity == 0 {
            return Err(PumpError::InvalidSettings {
                message: "failure_cache_capacity must be greater than zero".to_string(),
            });
        }

        if self.max_processing_attempts == 0 {
            return Err(PumpError::InvalidSettings {
                message: "max_processing_attempts must be greater than zero".to_string(),
            });
        }

        if self.transaction_mode == TransactionMode::TransactionScope
            && self.transaction_scope_timeout_seconds == 0
        {
            return Err(PumpError::InvalidSettings {
                message: "transaction_scope_timeout_seconds must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}

// ============================================================================
// Delayed Delivery Settings
// ============================================================================

/// Settings for the delayed delivery pump and timeout poller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DelayedDeliverySettings {
    /// Queue carrying messages whose delivery is deferred
    pub timeouts_queue: String,

    /// Immediate retries for a timeout message that cannot be handled
    pub max_immediate_retries: u32,

    /// Longest time the poller sleeps without checking storage
    pub poller_max_sleep_seconds: u64,
}

impl Default for DelayedDeliverySettings {
    fn default() -> Self {
        Self {
            timeouts_queue: "timeouts".to_string(),
            max_immediate_retries: 3,
            poller_max_sleep_seconds: 60,
        }
    }
}

impl DelayedDeliverySettings {
    pub fn poller_max_sleep(&self) -> Duration {
        Duration::from_secs(self.poller_max_sleep_seconds)
    }

    /// Parse the configured timeouts queue address
    pub fn timeouts_queue_address(&self) -> Result<QueueAddress, PumpError> {
        self.timeouts_queue
            .parse()
            .map_err(|e| PumpError::InvalidSettings {
                message: format!("timeouts_queue '{}': {}", self.timeouts_queue, e),
            })
    }

    /// Processing attempts allowed before a timeout message is dead-lettered
    pub fn max_processing_attempts(&self) -> u32 {
        self.max_immediate_retries.saturating_add(1)
    }
}
