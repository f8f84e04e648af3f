//! Outgoing message dispatch.
//!
//! Sends performed while processing a message go through a
//! [`MessageDispatcher`], which enlists them in the receive transaction when
//! there is one. Operations with a future delivery time are rerouted to the
//! timeouts queue, where the delayed delivery pump picks them up.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use queue_pump_runtime::{Headers, Message, QueueAddress, QueueConnector, ReceivedMessage};
use std::sync::Arc;
use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::error::DispatchError;
use crate::headers::{self, TimeoutHeaders};
use crate::transaction::TransportTransaction;

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;

// ============================================================================
// Transport Operation
// ============================================================================

/// A single outgoing message and where it should go
#[derive(Debug, Clone, PartialEq)]
pub struct TransportOperation {
    pub destination: QueueAddress,
    /// Logical id; also used by the queue to drop repeated sends
    pub message_id: String,
    pub headers: Headers,
    pub body: Bytes,
    pub label: String,
    /// Earliest time the message may be delivered
    pub deliver_at: Option<DateTime<Utc>>,
    raw_extension: Option<Bytes>,
}

impl TransportOperation {
    pub fn new(
        destination: QueueAddress,
        message_id: impl Into<String>,
        headers: Headers,
        body: Bytes,
    ) -> Self {
        Self {
            destination,
            message_id: message_id.into(),
            headers,
            body,
            label: String::new(),
            deliver_at: None,
            raw_extension: None,
        }
    }

    /// Forward a received message byte-for-byte, including a header block
    /// that could not be decoded
    pub fn verbatim(destination: QueueAddress, message: &ReceivedMessage) -> Self {
        Self {
            destination,
            message_id: message.message_id.to_string(),
            headers: Headers::new(),
            body: message.body.clone(),
            label: message.label.clone(),
            deliver_at: None,
            raw_extension: Some(message.extension.clone()),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Defer delivery until `at`
    pub fn deliver_at(mut self, at: DateTime<Utc>) -> Self {
        self.deliver_at = Some(at);
        self
    }

    pub fn is_verbatim(&self) -> bool {
        self.raw_extension.is_some()
    }

    fn into_message(self) -> Result<Message, DispatchError> {
        let message = match self.raw_extension {
            Some(extension) => Message::new(self.body).with_extension(extension),
            None => {
                let mut headers = self.headers;
                headers
                    .entry(headers::MESSAGE_ID.to_string())
                    .or_insert_with(|| self.message_id.clone());
                Message::new(self.body).with_headers(&headers)?
            }
        };

        Ok(message
            .with_label(self.label)
            .with_deduplication_id(self.message_id))
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Sends outgoing messages, optionally inside a transport transaction
#[async_trait]
pub trait MessageDispatcher: Send + Sync {
    async fn dispatch(
        &self,
        operations: Vec<TransportOperation>,
        transaction: &TransportTransaction,
    ) -> Result<(), DispatchError>;
}

/// Dispatcher that sends through queue bindings
pub struct BindingDispatcher {
    connector: Arc<dyn QueueConnector>,
    timeouts_queue: Option<QueueAddress>,
    clock: Arc<dyn Clock>,
}

impl BindingDispatcher {
    pub fn new(connector: Arc<dyn QueueConnector>) -> Self {
        Self {
            connector,
            timeouts_queue: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Enable deferred sends through `timeouts_queue`
    pub fn with_delayed_delivery(mut self, timeouts_queue: QueueAddress) -> Self {
        self.timeouts_queue = Some(timeouts_queue);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Redirect operations due in the future to the timeouts queue
    fn route(&self, mut operation: TransportOperation) -> Result<TransportOperation, DispatchError> {
        let Some(due) = operation.deliver_at.take() else {
            return Ok(operation);
        };

        if due <= self.clock.now() {
            return Ok(operation);
        }

        if operation.is_verbatim() {
            return Err(DispatchError::InvalidOperation {
                message: "verbatim forwards cannot be deferred".to_string(),
            });
        }

        let timeouts_queue =
            self.timeouts_queue
                .clone()
                .ok_or_else(|| DispatchError::DelayedDeliveryNotEnabled {
                    destination: operation.destination.to_string(),
                })?;

        TimeoutHeaders {
            destination: operation.destination.clone(),
            due,
        }
        .apply(&mut operation.headers);
        operation.destination = timeouts_queue;

        Ok(operation)
    }
}

#[async_trait]
impl MessageDispatcher for BindingDispatcher {
    async fn dispatch(
        &self,
        operations: Vec<TransportOperation>,
        transaction: &TransportTransaction,
    ) -> Result<(), DispatchError> {
        let enlistment = transaction.enlistment();

        for operation in operations {
            let operation = self.route(operation)?;
            let destination = operation.destination.clone();
            let message_id = operation.message_id.clone();

            let queue = self.connector.open(&destination).await?;
            queue
                .send(operation.into_message()?, enlistment.as_deref())
                .await?;

            debug!(
                message_id = %message_id,
                destination = %destination,
                enlisted = enlistment.is_some(),
                "Dispatched message"
            );
        }

        Ok(())
    }
}
