//! Error types for queue operations.

use crate::binding::TransactionStatus;
use thiserror::Error;

/// Comprehensive error type for all queue binding operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue not found: {address}")]
    QueueNotFound { address: String },

    #[error("Queue already exists: {address}")]
    QueueAlreadyExists { address: String },

    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Transaction usage is invalid for queue '{address}': {message}")]
    TransactionUsageInvalid { address: String, message: String },

    #[error("Transaction '{transaction_id}' is not active (status: {status})")]
    TransactionNotActive {
        transaction_id: String,
        status: TransactionStatus,
    },

    #[error("Message too large: {size} bytes (max: {max_size})")]
    MessageTooLarge { size: usize, max_size: usize },

    #[error("Queue '{address}' is full ({capacity} messages)")]
    QueueFull { address: String, capacity: usize },

    #[error("Provider error ({provider}): {code} - {message}")]
    ProviderError {
        provider: String,
        code: String,
        message: String,
    },

    #[error("Serialization failed: {0}")]
    SerializationError(#[from] SerializationError),

    #[error("Validation error: {0}")]
    ValidationError(#[from] ValidationError),
}

/// Errors during message header serialization/deserialization
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("Header serialization failed: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Header block is not valid UTF-8")]
    InvalidUtf8,
}

/// Validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
