//! In-memory queue provider implementation for testing and development.
//!
//! This module provides a fully functional in-memory broker that:
//! - Hosts any number of named queues, transactional or not
//! - Implements native transactions with provisional receives and sends
//! - Drops repeated sends carrying an already-seen deduplication id
//! - Provides thread-safe concurrent access
//!
//! This provider is intended for:
//! - Unit testing of queue-pump consumers
//! - Development and prototyping
//! - Reference implementation for native queue bindings

use crate::binding::{
    NativeTransaction, PeekOutcome, QueueBinding, QueueConnector, TransactionId,
    TransactionStatus,
};
use crate::error::QueueError;
use crate::message::{Message, MessageId, QueueAddress, ReceivedMessage, Timestamp};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

// ============================================================================
// Configuration
// ============================================================================

/// In-memory broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InMemoryConfig {
    /// Name the broker answers to when deciding whether an address is local
    pub machine_name: String,
    pub max_queue_size: usize,
    pub max_message_size: usize,
    /// Number of recent deduplication ids remembered per queue
    pub deduplication_window: usize,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            machine_name: "localhost".to_string(),
            max_queue_size: 10_000,
            max_message_size: 4 * 1024 * 1024, // 4MB
            deduplication_window: 1_000,
        }
    }
}

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// Thread-safe storage for all queues and open transactions
#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, QueueState>,
    transactions: HashMap<TransactionId, TransactionJournal>,
}

/// Internal state for a single queue
struct QueueState {
    address: QueueAddress,
    transactional: bool,
    /// Visible messages (FIFO order)
    messages: VecDeque<ReceivedMessage>,
    /// Recently accepted deduplication ids, oldest first
    recent_ids: VecDeque<String>,
    recent_id_set: HashSet<String>,
}

impl QueueState {
    fn new(address: QueueAddress, transactional: bool) -> Self {
        Self {
            address,
            transactional,
            messages: VecDeque::new(),
            recent_ids: VecDeque::new(),
            recent_id_set: HashSet::new(),
        }
    }

    /// Append a message unless its deduplication id was already accepted.
    ///
    /// Returns `false` when the message was dropped as a duplicate.
    fn push(&mut self, message: Message, window: usize) -> bool {
        if let Some(dedup_id) = &message.deduplication_id {
            if self.recent_id_set.contains(dedup_id) {
                debug!(
                    queue = %self.address,
                    deduplication_id = %dedup_id,
                    "Dropping duplicate message"
                );
                return false;
            }

            self.recent_ids.push_back(dedup_id.clone());
            self.recent_id_set.insert(dedup_id.clone());
            while self.recent_ids.len() > window {
                if let Some(evicted) = self.recent_ids.pop_front() {
                    self.recent_id_set.remove(&evicted);
                }
            }
        }

        self.messages.push_back(ReceivedMessage {
            message_id: MessageId::new(),
            body: message.body,
            extension: message.extension,
            label: message.label,
            delivery_count: 0,
            arrived_at: Timestamp::now(),
        });
        true
    }
}

/// Provisional operations enlisted in an open transaction
#[derive(Default)]
struct TransactionJournal {
    received: Vec<(String, ReceivedMessage)>,
    sent: Vec<(String, Message)>,
}

struct BrokerInner {
    config: InMemoryConfig,
    state: Mutex<BrokerState>,
    arrivals: Notify,
}

impl BrokerInner {
    fn lock(&self) -> Result<MutexGuard<'_, BrokerState>, QueueError> {
        self.state.lock().map_err(|e| QueueError::ProviderError {
            provider: "InMemory".to_string(),
            code: "LockPoisoned".to_string(),
            message: e.to_string(),
        })
    }

    /// Normalize an address to its storage key
    fn queue_key(&self, address: &QueueAddress) -> String {
        if address.is_local_to(&self.config.machine_name) {
            address.queue().to_ascii_lowercase()
        } else {
            format!(
                "{}@{}",
                address.queue().to_ascii_lowercase(),
                address.machine().unwrap_or_default().to_ascii_lowercase()
            )
        }
    }

    fn has_messages(&self, key: &str) -> Result<bool, QueueError> {
        let state = self.lock()?;
        Ok(state
            .queues
            .get(key)
            .map(|q| !q.messages.is_empty())
            .unwrap_or(false))
    }

    fn complete_transaction(&self, id: &TransactionId, commit: bool) -> Result<(), QueueError> {
        let mut state = self.lock()?;
        let journal = state.transactions.remove(id).unwrap_or_default();
        let window = self.config.deduplication_window;

        if commit {
            for (key, message) in journal.sent {
                if let Some(queue) = state.queues.get_mut(&key) {
                    queue.push(message, window);
                }
            }
        } else {
            // Put received messages back at the head in their original order
            for (key, message) in journal.received.into_iter().rev() {
                if let Some(queue) = state.queues.get_mut(&key) {
                    queue.messages.push_front(message);
                }
            }
        }

        drop(state);
        self.arrivals.notify_waiters();
        Ok(())
    }

    /// Wait until the queue has a visible message or the deadline passes
    async fn wait_for_arrival(&self, key: &str, deadline: Instant) -> Result<bool, QueueError> {
        loop {
            let notified = self.arrivals.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.has_messages(key)? {
                return Ok(true);
            }

            if Instant::now() >= deadline {
                return Ok(false);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.has_messages(key);
            }
        }
    }
}

// ============================================================================
// InMemoryBroker
// ============================================================================

/// In-memory queue broker hosting named queues
///
/// ```
/// use bytes::Bytes;
/// use queue_pump_runtime::{InMemoryBroker, Message, QueueAddress, QueueBinding};
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let broker = InMemoryBroker::default();
/// let orders = broker
///     .create_queue(&QueueAddress::local("orders").unwrap(), true)
///     .unwrap();
///
/// let tx = orders.begin_transaction().await.unwrap();
/// orders.send(Message::new(Bytes::from_static(b"order-1")), None).await.unwrap();
/// let received = orders
///     .dequeue(Some(tx.as_ref()), Duration::from_millis(10))
///     .await
///     .unwrap();
/// assert!(received.is_some());
///
/// tx.abort().await.unwrap();
/// assert_eq!(broker.message_count(&QueueAddress::local("orders").unwrap()), 1);
/// # });
/// ```
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<BrokerInner>,
}

impl InMemoryBroker {
    /// Create new in-memory broker with configuration
    pub fn new(config: InMemoryConfig) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                config,
                state: Mutex::new(BrokerState::default()),
                arrivals: Notify::new(),
            }),
        }
    }

    /// Get the machine name this broker considers local
    pub fn machine_name(&self) -> &str {
        &self.inner.config.machine_name
    }

    /// Create a queue and return a binding for it
    pub fn create_queue(
        &self,
        address: &QueueAddress,
        transactional: bool,
    ) -> Result<Arc<InMemoryQueue>, QueueError> {
        let key = self.inner.queue_key(address);
        let mut state = self.inner.lock()?;

        if state.queues.contains_key(&key) {
            return Err(QueueError::QueueAlreadyExists {
                address: address.to_string(),
            });
        }

        state
            .queues
            .insert(key.clone(), QueueState::new(address.clone(), transactional));

        debug!(queue = %address, transactional, "Created in-memory queue");

        Ok(Arc::new(InMemoryQueue {
            broker: self.clone(),
            address: address.clone(),
            key,
            transactional,
        }))
    }

    /// Get a binding for an existing queue
    pub fn queue(&self, address: &QueueAddress) -> Result<Arc<InMemoryQueue>, QueueError> {
        let key = self.inner.queue_key(address);
        let state = self.inner.lock()?;

        let queue = state
            .queues
            .get(&key)
            .ok_or_else(|| QueueError::QueueNotFound {
                address: address.to_string(),
            })?;

        Ok(Arc::new(InMemoryQueue {
            broker: self.clone(),
            address: queue.address.clone(),
            key,
            transactional: queue.transactional,
        }))
    }

    /// Number of visible messages in a queue (zero if the queue does not exist)
    pub fn message_count(&self, address: &QueueAddress) -> usize {
        let key = self.inner.queue_key(address);
        self.inner
            .lock()
            .map(|state| state.queues.get(&key).map(|q| q.messages.len()).unwrap_or(0))
            .unwrap_or(0)
    }

    /// Snapshot of the visible messages in a queue
    pub fn messages(&self, address: &QueueAddress) -> Vec<ReceivedMessage> {
        let key = self.inner.queue_key(address);
        self.inner
            .lock()
            .map(|state| {
                state
                    .queues
                    .get(&key)
                    .map(|q| q.messages.iter().cloned().collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    /// Number of transactions that have been started but not completed
    pub fn active_transaction_count(&self) -> usize {
        self.inner
            .lock()
            .map(|state| state.transactions.len())
            .unwrap_or(0)
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(InMemoryConfig::default())
    }
}

#[async_trait]
impl QueueConnector for InMemoryBroker {
    async fn open(&self, address: &QueueAddress) -> Result<Arc<dyn QueueBinding>, QueueError> {
        let queue: Arc<dyn QueueBinding> = self.queue(address)?;
        Ok(queue)
    }
}

// ============================================================================
// InMemoryQueue
// ============================================================================

/// Binding for a single queue hosted by an [`InMemoryBroker`]
pub struct InMemoryQueue {
    broker: InMemoryBroker,
    address: QueueAddress,
    key: String,
    transactional: bool,
}

impl InMemoryQueue {
    fn ensure_transactional(&self, operation: &str) -> Result<(), QueueError> {
        if self.transactional {
            Ok(())
        } else {
            Err(QueueError::TransactionUsageInvalid {
                address: self.address.to_string(),
                message: format!("cannot {} within a transaction on a non-transactional queue", operation),
            })
        }
    }

    fn try_dequeue(
        &self,
        transaction: Option<&dyn NativeTransaction>,
    ) -> Result<Option<ReceivedMessage>, QueueError> {
        let tx_status = transaction.map(|tx| tx.status());
        let mut state = self.broker.inner.lock()?;

        if let (Some(tx), Some(status)) = (transaction, tx_status) {
            if !state.transactions.contains_key(tx.id()) {
                return Err(QueueError::TransactionNotActive {
                    transaction_id: tx.id().to_string(),
                    status,
                });
            }
        }

        let queue = state
            .queues
            .get_mut(&self.key)
            .ok_or_else(|| QueueError::QueueNotFound {
                address: self.address.to_string(),
            })?;

        let Some(mut message) = queue.messages.pop_front() else {
            return Ok(None);
        };
        message.delivery_count += 1;

        if let Some(tx) = transaction {
            if let Some(journal) = state.transactions.get_mut(tx.id()) {
                journal.received.push((self.key.clone(), message.clone()));
            }
        }

        Ok(Some(message))
    }
}

#[async_trait]
impl QueueBinding for InMemoryQueue {
    fn address(&self) -> &QueueAddress {
        &self.address
    }

    fn is_local(&self) -> bool {
        self.address.is_local_to(self.broker.machine_name())
    }

    fn is_transactional(&self) -> bool {
        self.transactional
    }

    async fn peek(&self, timeout: Duration) -> Result<PeekOutcome, QueueError> {
        let deadline = Instant::now() + timeout;
        if self.broker.inner.wait_for_arrival(&self.key, deadline).await? {
            Ok(PeekOutcome::Available)
        } else {
            Ok(PeekOutcome::Empty)
        }
    }

    async fn begin_transaction(&self) -> Result<Arc<dyn NativeTransaction>, QueueError> {
        let id = TransactionId::new();
        self.broker
            .inner
            .lock()?
            .transactions
            .insert(id.clone(), TransactionJournal::default());

        Ok(Arc::new(InMemoryTransaction {
            id,
            broker: Arc::clone(&self.broker.inner),
            status: Mutex::new(TransactionStatus::Active),
        }))
    }

    async fn dequeue(
        &self,
        transaction: Option<&dyn NativeTransaction>,
        timeout: Duration,
    ) -> Result<Option<ReceivedMessage>, QueueError> {
        if transaction.is_some() {
            self.ensure_transactional("receive")?;
        }

        let deadline = Instant::now() + timeout;
        loop {
            if let Some(message) = self.try_dequeue(transaction)? {
                return Ok(Some(message));
            }

            if !self.broker.inner.wait_for_arrival(&self.key, deadline).await? {
                return Ok(None);
            }
        }
    }

    async fn send(
        &self,
        message: Message,
        transaction: Option<&dyn NativeTransaction>,
    ) -> Result<(), QueueError> {
        let config = &self.broker.inner.config;
        if message.size() > config.max_message_size {
            return Err(QueueError::MessageTooLarge {
                size: message.size(),
                max_size: config.max_message_size,
            });
        }

        if transaction.is_some() {
            self.ensure_transactional("send")?;
        }

        let tx_status = transaction.map(|tx| tx.status());
        let mut state = self.broker.inner.lock()?;
        let queue = state
            .queues
            .get_mut(&self.key)
            .ok_or_else(|| QueueError::QueueNotFound {
                address: self.address.to_string(),
            })?;

        if queue.messages.len() >= config.max_queue_size {
            return Err(QueueError::QueueFull {
                address: self.address.to_string(),
                capacity: config.max_queue_size,
            });
        }

        match transaction {
            Some(tx) => {
                let journal = state.transactions.get_mut(tx.id()).ok_or_else(|| {
                    QueueError::TransactionNotActive {
                        transaction_id: tx.id().to_string(),
                        status: tx_status.unwrap_or(TransactionStatus::Aborted),
                    }
                })?;
                journal.sent.push((self.key.clone(), message));
            }
            None => {
                queue.push(message, config.deduplication_window);
                drop(state);
                self.broker.inner.arrivals.notify_waiters();
            }
        }

        Ok(())
    }

    async fn purge(&self) -> Result<usize, QueueError> {
        let mut state = self.broker.inner.lock()?;
        let queue = state
            .queues
            .get_mut(&self.key)
            .ok_or_else(|| QueueError::QueueNotFound {
                address: self.address.to_string(),
            })?;

        let purged = queue.messages.len();
        queue.messages.clear();
        Ok(purged)
    }
}

// ============================================================================
// InMemoryTransaction
// ============================================================================

/// Native transaction against an [`InMemoryBroker`].
///
/// Dropping an active transaction aborts it.
pub struct InMemoryTransaction {
    id: TransactionId,
    broker: Arc<BrokerInner>,
    status: Mutex<TransactionStatus>,
}

impl InMemoryTransaction {
    fn complete(&self, commit: bool) -> Result<(), QueueError> {
        let mut status = self.status.lock().map_err(|e| QueueError::ProviderError {
            provider: "InMemory".to_string(),
            code: "LockPoisoned".to_string(),
            message: e.to_string(),
        })?;

        if *status != TransactionStatus::Active {
            return Err(QueueError::TransactionNotActive {
                transaction_id: self.id.to_string(),
                status: *status,
            });
        }

        self.broker.complete_transaction(&self.id, commit)?;
        *status = if commit {
            TransactionStatus::Committed
        } else {
            TransactionStatus::Aborted
        };
        Ok(())
    }
}

impl fmt::Debug for InMemoryTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryTransaction")
            .field("id", &self.id)
            .field("status", &self.status())
            .finish()
    }
}

#[async_trait]
impl NativeTransaction for InMemoryTransaction {
    fn id(&self) -> &TransactionId {
        &self.id
    }

    fn status(&self) -> TransactionStatus {
        self.status
            .lock()
            .map(|s| *s)
            .unwrap_or(TransactionStatus::Aborted)
    }

    async fn commit(&self) -> Result<(), QueueError> {
        self.complete(true)
    }

    async fn abort(&self) -> Result<(), QueueError> {
        self.complete(false)
    }
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        if self.status() == TransactionStatus::Active {
            let _ = self.complete(false);
        }
    }
}
