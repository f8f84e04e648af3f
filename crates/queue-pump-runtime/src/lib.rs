//! # Queue Pump Runtime
//!
//! Native queue primitives consumed by the queue pump.
//!
//! This library provides:
//! - Validated queue addresses and message identifiers
//! - Message and header block types
//! - The [`QueueBinding`] and [`NativeTransaction`] abstractions a physical
//!   queue must implement
//! - An in-memory broker for tests and development
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for all queue operations
//! - [`message`] - Addresses, messages and header encoding
//! - [`binding`] - Queue binding and native transaction traits
//! - [`providers`] - Concrete queue implementations

// Module declarations
pub mod binding;
pub mod error;
pub mod message;
pub mod providers;

// Re-export commonly used types at crate root for convenience
pub use binding::{
    NativeTransaction, PeekOutcome, QueueBinding, QueueConnector, TransactionId,
    TransactionStatus,
};
pub use error::{QueueError, SerializationError, ValidationError};
pub use message::{
    decode_headers, encode_headers, Headers, Message, MessageId, QueueAddress, ReceivedMessage,
    Timestamp,
};
pub use providers::{InMemoryBroker, InMemoryConfig, InMemoryQueue, InMemoryTransaction};
