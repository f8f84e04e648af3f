//! Delayed delivery.
//!
//! Sends with a future delivery time are rerouted by the dispatcher to the
//! timeouts queue. A dedicated [`DelayedDeliveryPump`] receives from that
//! queue: timeouts that are already due go straight to their destination,
//! the others are written to a [`TimeoutStore`]. The [`TimeoutPoller`]
//! dispatches stored timeouts once they fall due.
//!
//! Malformed timeout messages are retried a bounded number of times and then
//! moved to the error queue with diagnostic headers.

use queue_pump_runtime::QueueBinding;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::clock::Clock;
use crate::config::{DelayedDeliverySettings, PumpSettings};
use crate::critical::CriticalErrorHandler;
use crate::dispatch::MessageDispatcher;
use crate::error::PumpError;
use crate::pump::MessagePump;
use crate::recoverability::DeadLetterPolicy;

mod handler;
mod poller;
mod store;

pub use handler::DelayedDeliveryHandler;
pub use poller::{PollSummary, TimeoutPoller};
pub use store::{InMemoryTimeoutStore, TimeoutItem, TimeoutStore};

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;

struct PollerTask {
    cancellation: CancellationToken,
    handle: JoinHandle<()>,
}

/// Message pump on the timeouts queue together with its timeout poller
pub struct DelayedDeliveryPump {
    pump: MessagePump,
    poller: Arc<TimeoutPoller>,
    handler: Arc<DelayedDeliveryHandler>,
    policy: Arc<DeadLetterPolicy>,
    poller_task: Mutex<Option<PollerTask>>,
}

impl DelayedDeliveryPump {
    pub fn new(
        input: Arc<dyn QueueBinding>,
        dispatcher: Arc<dyn MessageDispatcher>,
        store: Arc<dyn TimeoutStore>,
        clock: Arc<dyn Clock>,
        pump_settings: PumpSettings,
        settings: &DelayedDeliverySettings,
        critical: Arc<dyn CriticalErrorHandler>,
    ) -> Result<Self, PumpError> {
        let poller = Arc::new(TimeoutPoller::new(
            Arc::clone(&store),
            Arc::clone(&dispatcher),
            Arc::clone(&clock),
            Arc::clone(&critical),
            settings.poller_max_sleep(),
        ));
        let handler = Arc::new(DelayedDeliveryHandler::new(
            store,
            Arc::clone(&poller),
            Arc::clone(&dispatcher),
            Arc::clone(&clock),
        ));
        let policy = Arc::new(
            DeadLetterPolicy::new(
                Arc::clone(&dispatcher),
                pump_settings.error_queue_address()?,
                settings.max_processing_attempts(),
            )
            .with_clock(clock),
        );
        let pump = MessagePump::new(
            "delayed-delivery",
            input,
            dispatcher,
            pump_settings,
            critical,
        );

        Ok(Self {
            pump,
            poller,
            handler,
            policy,
            poller_task: Mutex::new(None),
        })
    }

    pub fn pump(&self) -> &MessagePump {
        &self.pump
    }

    pub fn poller(&self) -> &Arc<TimeoutPoller> {
        &self.poller
    }

    pub async fn initialize(&self, concurrency_limit: usize) -> Result<(), PumpError> {
        self.pump
            .initialize(
                concurrency_limit,
                self.handler.clone(),
                self.policy.clone(),
            )
            .await
    }

    /// Start receiving timeout messages and polling storage
    pub async fn start(&self) -> Result<(), PumpError> {
        let mut task = self.poller_task.lock().await;
        self.pump.start().await?;

        if task.is_none() {
            let cancellation = CancellationToken::new();
            let poller = Arc::clone(&self.poller);
            let token = cancellation.clone();
            let handle = tokio::spawn(async move { poller.run(token).await });
            *task = Some(PollerTask {
                cancellation,
                handle,
            });
        }
        Ok(())
    }

    /// Drain the pump, then stop the poller
    pub async fn stop_receive(&self, cancellation: Option<CancellationToken>) {
        self.pump.stop_receive(cancellation).await;

        if let Some(task) = self.poller_task.lock().await.take() {
            task.cancellation.cancel();
            if let Err(e) = task.handle.await {
                error!(error = %e, "Timeout poller task failed");
            }
        }
    }
}
