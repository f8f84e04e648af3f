//! Contracts between the receive pipeline and application code.
//!
//! The pump hands each message to a [`MessageHandler`]. When processing
//! fails, an [`ErrorPolicy`] decides whether the message should be retried or
//! has been disposed of.

use async_trait::async_trait;
use bytes::Bytes;
use queue_pump_runtime::{Headers, QueueAddress};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::error::PolicyError;
use crate::transaction::TransportTransaction;

#[cfg(test)]
#[path = "processing_tests.rs"]
mod tests;

// ============================================================================
// Context Bag
// ============================================================================

/// Shared key/value context carried through one processing attempt.
///
/// Clones share the same values, so data a handler stores is visible to the
/// error-handling policy when the attempt fails.
#[derive(Debug, Clone, Default)]
pub struct ContextBag {
    values: Arc<RwLock<HashMap<String, serde_json::Value>>>,
}

impl ContextBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value; values that cannot be represented as JSON are ignored
    pub fn set<T: Serialize>(&self, key: impl Into<String>, value: T) {
        if let Ok(value) = serde_json::to_value(value) {
            self.values
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(key.into(), value);
        }
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        values
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }
}

// ============================================================================
// Message Handling
// ============================================================================

/// Immutable view of a received message handed to the application handler
#[derive(Debug, Clone)]
pub struct MessageContext {
    /// Native message identifier
    pub message_id: String,
    pub headers: Headers,
    pub body: Bytes,
    /// Transaction the receive is part of; pass it along when sending
    pub transaction: TransportTransaction,
    pub context: ContextBag,
    /// Fires when the host asks in-flight processing to stop
    pub cancellation: CancellationToken,
    pub receive_address: QueueAddress,
}

/// Outcome of a failed processing attempt
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Processing stopped in response to the cancellation token
    #[error("Processing was cancelled")]
    Cancelled,

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// Application message handler
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &MessageContext) -> Result<(), HandlerError>;
}

// ============================================================================
// Error Handling Policy
// ============================================================================

/// Everything known about a failed message
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub error: Arc<anyhow::Error>,
    pub message_id: String,
    pub headers: Headers,
    pub body: Bytes,
    pub transaction: TransportTransaction,
    /// Number of failed processing attempts so far
    pub attempts: u32,
    pub context: ContextBag,
    pub receive_address: QueueAddress,
    /// False when the message has already left the queue and a retry
    /// request cannot be honored
    pub can_redeliver: bool,
}

/// Decision returned by an error-handling policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorHandleResult {
    /// Leave the message for redelivery
    RetryRequired,
    /// The policy disposed of the message; it must not be processed again
    Handled,
}

/// Decides what happens to a message whose processing failed.
#[async_trait]
pub trait ErrorPolicy: Send + Sync {
    async fn on_error(&self, context: &ErrorContext) -> Result<ErrorHandleResult, PolicyError>;
}
