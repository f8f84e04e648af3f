//! Error types for the message pump and its collaborators.

use queue_pump_runtime::{QueueError, SerializationError};
use thiserror::Error;

use crate::config::TransactionMode;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;

/// Errors raised by the message pump and receive strategies
#[derive(Debug, Error)]
pub enum PumpError {
    #[error("Queue '{address}' is not local; messages can only be received from local queues")]
    QueueNotLocal { address: String },

    #[error("Queue '{address}' is not transactional but transaction mode '{mode}' requires it")]
    QueueNotTransactional {
        address: String,
        mode: TransactionMode,
    },

    #[error("Invalid concurrency limit {limit}: must be between 1 and {max}")]
    InvalidConcurrency { limit: usize, max: usize },

    #[error("Invalid pump settings: {message}")]
    InvalidSettings { message: String },

    #[error("Message pump has not been initialized")]
    NotInitialized,

    #[error("Message pump is already running")]
    AlreadyRunning,

    #[error("Failed to {operation} transaction for message {message_id}: {source}")]
    CompletionFailed {
        operation: &'static str,
        message_id: String,
        #[source]
        source: QueueError,
    },

    #[error("Queue operation failed: {0}")]
    Queue(#[from] QueueError),

    #[error("Dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),
}

/// Errors raised while sending outgoing messages
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Queue operation failed: {0}")]
    Queue(#[from] QueueError),

    #[error("Failed to encode message headers: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Cannot defer delivery to '{destination}': delayed delivery is not enabled")]
    DelayedDeliveryNotEnabled { destination: String },

    #[error("Invalid transport operation: {message}")]
    InvalidOperation { message: String },
}

/// Errors raised by timeout storage
#[derive(Debug, Error)]
pub enum TimeoutStoreError {
    #[error("Timeout storage unavailable: {message}")]
    Unavailable { message: String },

    #[error("Timeout storage internal error: {message}")]
    Internal { message: String },
}

/// Errors raised when reading reserved transport headers
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HeaderError {
    #[error("Required header '{key}' is missing")]
    Missing { key: String },

    #[error("Header '{key}' has an invalid value: {message}")]
    Invalid { key: String, message: String },
}

/// Errors raised by an error-handling policy while disposing of a message
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("Failed to move message to the error queue: {0}")]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
