//! Timeout storage for deferred messages.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use queue_pump_runtime::{Headers, QueueAddress};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::dispatch::TransportOperation;
use crate::error::TimeoutStoreError;
use crate::headers::TimeoutHeaders;

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;

/// A deferred message waiting for its due time
#[derive(Debug, Clone, PartialEq)]
pub struct TimeoutItem {
    /// Native id of the timeout message; doubles as the idempotency key
    pub id: String,
    pub destination: QueueAddress,
    pub due: DateTime<Utc>,
    pub headers: Headers,
    pub body: Bytes,
}

impl TimeoutItem {
    /// Build the send that delivers this item to its destination.
    ///
    /// The timeout headers are removed; every other header travels unchanged.
    pub fn to_operation(&self) -> TransportOperation {
        let mut headers = self.headers.clone();
        TimeoutHeaders::strip(&mut headers);
        TransportOperation::new(
            self.destination.clone(),
            self.id.clone(),
            headers,
            self.body.clone(),
        )
    }
}

/// Durable home for timeout items until they fall due
#[async_trait]
pub trait TimeoutStore: Send + Sync {
    /// Persist `item`; returns `false` when an item with the same id exists
    async fn store(&self, item: TimeoutItem) -> Result<bool, TimeoutStoreError>;

    /// Every item due at or before `now`, earliest first
    async fn fetch_due(&self, now: DateTime<Utc>) -> Result<Vec<TimeoutItem>, TimeoutStoreError>;

    /// Remove an item; returns `false` when it was already gone
    async fn remove(&self, id: &str) -> Result<bool, TimeoutStoreError>;

    /// Due time of the earliest stored item
    async fn next_due(&self) -> Result<Option<DateTime<Utc>>, TimeoutStoreError>;
}

// ============================================================================
// In-Memory Store
// ============================================================================

/// Process-local timeout store.
///
/// Items do not survive a restart.
///
/// ```
/// use chrono::{Duration, Utc};
/// use queue_pump_core::{InMemoryTimeoutStore, TimeoutItem, TimeoutStore};
/// use queue_pump_runtime::{Headers, QueueAddress};
///
/// # tokio_test::block_on(async {
/// let store = InMemoryTimeoutStore::new();
/// let due = Utc::now() + Duration::minutes(5);
/// store
///     .store(TimeoutItem {
///         id: "timeout-1".to_string(),
///         destination: QueueAddress::local("reminders").unwrap(),
///         due,
///         headers: Headers::new(),
///         body: bytes::Bytes::new(),
///     })
///     .await
///     .unwrap();
///
/// assert!(store.fetch_due(Utc::now()).await.unwrap().is_empty());
/// assert_eq!(store.next_due().await.unwrap(), Some(due));
/// # });
/// ```
#[derive(Debug, Default)]
pub struct InMemoryTimeoutStore {
    items: Mutex<HashMap<String, TimeoutItem>>,
}

impl InMemoryTimeoutStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, TimeoutItem>>, TimeoutStoreError> {
        self.items.lock().map_err(|_| TimeoutStoreError::Internal {
            message: "timeout store lock poisoned".to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.lock().map(|items| items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock()
            .map(|items| items.contains_key(id))
            .unwrap_or(false)
    }
}

#[async_trait]
impl TimeoutStore for InMemoryTimeoutStore {
    async fn store(&self, item: TimeoutItem) -> Result<bool, TimeoutStoreError> {
        let mut items = self.lock()?;
        if items.contains_key(&item.id) {
            debug!(timeout_id = %item.id, "Timeout already stored");
            return Ok(false);
        }
        items.insert(item.id.clone(), item);
        Ok(true)
    }

    async fn fetch_due(&self, now: DateTime<Utc>) -> Result<Vec<TimeoutItem>, TimeoutStoreError> {
        let items = self.lock()?;
        let mut due: Vec<TimeoutItem> = items
            .values()
            .filter(|item| item.due <= now)
            .cloned()
            .collect();
        due.sort_by_key(|item| item.due);
        Ok(due)
    }

    async fn remove(&self, id: &str) -> Result<bool, TimeoutStoreError> {
        Ok(self.lock()?.remove(id).is_some())
    }

    async fn next_due(&self) -> Result<Option<DateTime<Utc>>, TimeoutStoreError> {
        Ok(self.lock()?.values().map(|item| item.due).min())
    }
}
