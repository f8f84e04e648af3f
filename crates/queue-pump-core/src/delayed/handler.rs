//! Handler for messages arriving on the timeouts queue.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::clock::Clock;
use crate::dispatch::MessageDispatcher;
use crate::headers::TimeoutHeaders;
use crate::processing::{HandlerError, MessageContext, MessageHandler};

use super::poller::TimeoutPoller;
use super::store::{TimeoutItem, TimeoutStore};

#[cfg(test)]
#[path = "handler_tests.rs"]
mod tests;

/// Sends due timeout messages on and stores the rest for the poller.
///
/// A message without readable timeout headers fails processing, so the
/// pump's error policy retries and eventually dead-letters it.
pub struct DelayedDeliveryHandler {
    store: Arc<dyn TimeoutStore>,
    poller: Arc<TimeoutPoller>,
    dispatcher: Arc<dyn MessageDispatcher>,
    clock: Arc<dyn Clock>,
}

impl DelayedDeliveryHandler {
    pub fn new(
        store: Arc<dyn TimeoutStore>,
        poller: Arc<TimeoutPoller>,
        dispatcher: Arc<dyn MessageDispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            poller,
            dispatcher,
            clock,
        }
    }
}

#[async_trait]
impl MessageHandler for DelayedDeliveryHandler {
    async fn handle(&self, message: &MessageContext) -> Result<(), HandlerError> {
        let timeout = TimeoutHeaders::extract(&message.headers).map_err(anyhow::Error::from)?;

        let item = TimeoutItem {
            id: message.message_id.clone(),
            destination: timeout.destination,
            due: timeout.due,
            headers: message.headers.clone(),
            body: message.body.clone(),
        };

        if item.due <= self.clock.now() {
            self.dispatcher
                .dispatch(vec![item.to_operation()], &message.transaction)
                .await
                .map_err(anyhow::Error::from)?;
            debug!(
                message_id = %item.id,
                destination = %item.destination,
                "Timeout already due, dispatched immediately"
            );
            return Ok(());
        }

        let due = item.due;
        let id = item.id.clone();
        if self.store.store(item).await.map_err(anyhow::Error::from)? {
            debug!(message_id = %id, due = %due, "Stored timeout");
            self.poller.notify(due);
        } else {
            debug!(message_id = %id, "Timeout was stored by an earlier delivery");
        }

        Ok(())
    }
}
