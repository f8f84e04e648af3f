//! Failure record cache.
//!
//! A transactional receive that fails is aborted so the queue hands the same
//! message out again. The queue does not remember why it failed or how many
//! times, so this cache does: it keeps the last error, the attempt count and
//! the processing context per native message id, bounded in size with
//! least-recently-used eviction.

use chrono::{DateTime, Utc};
use moka::notification::RemovalCause;
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use std::sync::Arc;
use tracing::debug;

use crate::processing::ContextBag;

#[cfg(test)]
#[path = "failure_info_tests.rs"]
mod tests;

/// Default number of messages tracked
pub const DEFAULT_FAILURE_CACHE_CAPACITY: usize = 1_000;

/// Accumulated failure information for one message
#[derive(Debug, Clone)]
pub struct FailureRecord {
    /// Most recent processing error
    pub error: Arc<anyhow::Error>,
    /// Number of failed processing attempts so far
    pub attempts: u32,
    /// Context of the most recent attempt
    pub context: ContextBag,
    pub recorded_at: DateTime<Utc>,
}

/// Bounded, message-id keyed store of failure records.
///
/// Safe for concurrent use; updates to a single key are serialized.
/// Eviction runs as part of cache maintenance, so the cache may briefly hold
/// more than `capacity` records.
pub struct FailureInfoStorage {
    entries: Cache<String, FailureRecord>,
}

impl FailureInfoStorage {
    /// Create a cache holding at most `capacity` records (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1) as u64;
        let entries = Cache::builder()
            .max_capacity(capacity)
            .eviction_policy(EvictionPolicy::lru())
            .eviction_listener(|message_id: Arc<String>, _, cause| {
                if cause == RemovalCause::Size {
                    debug!(message_id = %message_id, "Evicted failure record");
                }
            })
            .build();
        Self { entries }
    }

    /// Record a failed attempt for `message_id`.
    ///
    /// Increments the attempt count of an existing record, otherwise creates
    /// one with a count of 1. Returns the new attempt count.
    pub fn record(&self, message_id: &str, error: anyhow::Error, context: ContextBag) -> u32 {
        let error = Arc::new(error);
        self.entries
            .entry_by_ref(message_id)
            .and_upsert_with(|existing| {
                let attempts = existing
                    .map(|entry| entry.into_value().attempts.saturating_add(1))
                    .unwrap_or(1);
                FailureRecord {
                    error,
                    attempts,
                    context,
                    recorded_at: Utc::now(),
                }
            })
            .into_value()
            .attempts
    }

    /// Get the record for `message_id` without removing it
    pub fn try_get(&self, message_id: &str) -> Option<FailureRecord> {
        self.entries.get(message_id)
    }

    /// Remove the record for `message_id`
    pub fn clear(&self, message_id: &str) -> Option<FailureRecord> {
        self.entries.remove(message_id)
    }

    /// Number of records held once pending evictions are applied
    pub fn len(&self) -> usize {
        self.entries.run_pending_tasks();
        self.entries.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.entries.policy().max_capacity().unwrap_or_default() as usize
    }
}

impl Default for FailureInfoStorage {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_CACHE_CAPACITY)
    }
}

impl std::fmt::Debug for FailureInfoStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailureInfoStorage")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}
