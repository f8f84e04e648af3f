//! Queue binding traits: the primitives a physical queue must offer.
//!
//! A binding is a handle on one queue. It exposes a non-destructive peek, a
//! dequeue that can optionally enlist in a native transaction, a send, and the
//! queue's transactional capability. Transactions are created by the binding
//! and committed or aborted through the [`NativeTransaction`] handle.

use crate::error::QueueError;
use crate::message::{Message, QueueAddress, ReceivedMessage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Peek
// ============================================================================

/// Result of a non-destructive peek.
///
/// An empty queue is a normal outcome and not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeekOutcome {
    /// At least one message is available
    Available,
    /// Nothing arrived before the timeout elapsed
    Empty,
}

impl PeekOutcome {
    /// Check if a message is available
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available)
    }
}

// ============================================================================
// Native Transactions
// ============================================================================

/// Identifier of a native queue transaction
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(String);

impl TransactionId {
    /// Generate a new transaction identifier
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get identifier as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a native transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Active,
    Committed,
    Aborted,
}

impl TransactionStatus {
    /// Check if the transaction has been committed or aborted
    pub fn is_completed(&self) -> bool {
        !matches!(self, Self::Active)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Committed => "committed",
            Self::Aborted => "aborted",
        };
        write!(f, "{}", s)
    }
}

/// Handle on a native queue transaction.
///
/// Receives and sends enlisted in the transaction become visible (or are
/// undone) together on [`commit`](NativeTransaction::commit) or
/// [`abort`](NativeTransaction::abort). Both are terminal: a second
/// completion fails with [`QueueError::TransactionNotActive`].
#[async_trait]
pub trait NativeTransaction: Send + Sync + fmt::Debug {
    /// Get transaction identifier
    fn id(&self) -> &TransactionId;

    /// Get current status
    fn status(&self) -> TransactionStatus;

    /// Make all enlisted operations durable
    async fn commit(&self) -> Result<(), QueueError>;

    /// Undo all enlisted operations; dequeued messages become visible again
    async fn abort(&self) -> Result<(), QueueError>;
}

// ============================================================================
// Queue Binding
// ============================================================================

/// Handle on a single physical queue
#[async_trait]
pub trait QueueBinding: Send + Sync {
    /// Address of the bound queue
    fn address(&self) -> &QueueAddress;

    /// Check if the queue lives on this machine and can be received from
    fn is_local(&self) -> bool;

    /// Check if the queue supports native transactions
    fn is_transactional(&self) -> bool;

    /// Wait up to `timeout` for a message to become available without removing it
    async fn peek(&self, timeout: Duration) -> Result<PeekOutcome, QueueError>;

    /// Start a native transaction against this queue's queue manager
    async fn begin_transaction(&self) -> Result<Arc<dyn NativeTransaction>, QueueError>;

    /// Remove the next message, waiting up to `timeout`.
    ///
    /// When `transaction` is given the removal is provisional until the
    /// transaction completes.
    async fn dequeue(
        &self,
        transaction: Option<&dyn NativeTransaction>,
        timeout: Duration,
    ) -> Result<Option<ReceivedMessage>, QueueError>;

    /// Send a message to the bound queue, optionally enlisted in `transaction`
    async fn send(
        &self,
        message: Message,
        transaction: Option<&dyn NativeTransaction>,
    ) -> Result<(), QueueError>;

    /// Remove every message currently in the queue, returning the count
    async fn purge(&self) -> Result<usize, QueueError>;
}

/// Resolves queue addresses to bindings
#[async_trait]
pub trait QueueConnector: Send + Sync {
    /// Open a binding for `address`
    async fn open(&self, address: &QueueAddress) -> Result<Arc<dyn QueueBinding>, QueueError>;
}
