//! Queue provider implementations.
//!
//! This module contains concrete implementations of the `QueueBinding`,
//! `NativeTransaction` and `QueueConnector` traits.

pub mod memory;

pub use memory::{InMemoryBroker, InMemoryConfig, InMemoryQueue, InMemoryTransaction};
