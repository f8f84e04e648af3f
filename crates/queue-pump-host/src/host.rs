//! Wiring of the main pump, the delayed delivery pump and the broker.

use async_trait::async_trait;
use queue_pump_core::{
    BindingDispatcher, Clock, CriticalErrorHandler, DeadLetterPolicy, DelayedDeliveryPump,
    HandlerError, InMemoryTimeoutStore, MessageContext, MessageDispatcher, MessageHandler,
    MessagePump, PumpError, SystemClock, TransactionMode,
};
use queue_pump_runtime::{InMemoryBroker, QueueAddress, QueueError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{HostConfig, HostConfigError};

#[cfg(test)]
#[path = "host_tests.rs"]
mod tests;

#[derive(Debug, Error)]
pub enum HostError {
    #[error(transparent)]
    Config(#[from] HostConfigError),

    #[error("Failed to create queue: {0}")]
    Queue(#[from] QueueError),

    #[error("Message pump failed: {0}")]
    Pump(#[from] PumpError),
}

/// Application handler of the demo host: logs every message it receives
#[derive(Debug, Default)]
pub struct LoggingMessageHandler {
    processed: AtomicU64,
}

impl LoggingMessageHandler {
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageHandler for LoggingMessageHandler {
    async fn handle(&self, message: &MessageContext) -> Result<(), HandlerError> {
        self.processed.fetch_add(1, Ordering::SeqCst);
        info!(
            message_id = %message.message_id,
            queue = %message.receive_address,
            headers = message.headers.len(),
            bytes = message.body.len(),
            "Received message"
        );
        Ok(())
    }
}

/// A running set of pumps sharing one broker
pub struct Host {
    config: HostConfig,
    broker: InMemoryBroker,
    dispatcher: Arc<dyn MessageDispatcher>,
    handler: Arc<LoggingMessageHandler>,
    pump: MessagePump,
    delayed: Option<DelayedDeliveryPump>,
}

impl Host {
    /// Create the queues and pumps described by `config`
    pub async fn build(
        config: HostConfig,
        critical: Arc<dyn CriticalErrorHandler>,
    ) -> Result<Self, HostError> {
        config.validate()?;

        let broker = InMemoryBroker::new(config.broker.clone());
        let transactional = config.pump.transaction_mode != TransactionMode::None;
        let input_address = config.input_address()?;
        let error_address = config.pump.error_queue_address()?;

        let input = broker.create_queue(&input_address, transactional)?;
        broker.create_queue(&error_address, true)?;

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let mut dispatcher =
            BindingDispatcher::new(Arc::new(broker.clone())).with_clock(Arc::clone(&clock));

        let timeouts = if config.enable_delayed_delivery {
            let address = config.delayed_delivery.timeouts_queue_address()?;
            let queue = broker.create_queue(&address, transactional)?;
            dispatcher = dispatcher.with_delayed_delivery(address);
            Some(queue)
        } else {
            None
        };
        let dispatcher: Arc<dyn MessageDispatcher> = Arc::new(dispatcher);

        let delayed = match timeouts {
            Some(queue) => Some(DelayedDeliveryPump::new(
                queue,
                Arc::clone(&dispatcher),
                Arc::new(InMemoryTimeoutStore::new()),
                Arc::clone(&clock),
                config.pump.clone(),
                &config.delayed_delivery,
                Arc::clone(&critical),
            )?),
            None => None,
        };

        let handler = Arc::new(LoggingMessageHandler::default());
        let policy = Arc::new(
            DeadLetterPolicy::new(
                Arc::clone(&dispatcher),
                error_address,
                config.pump.max_processing_attempts,
            )
            .with_clock(clock),
        );
        let pump = MessagePump::new(
            "main",
            input,
            Arc::clone(&dispatcher),
            config.pump.clone(),
            critical,
        );
        pump.initialize(config.concurrency, handler.clone(), policy)
            .await?;

        if let Some(delayed) = &delayed {
            delayed
                .initialize(config.delayed_delivery_concurrency)
                .await?;
        }

        Ok(Self {
            config,
            broker,
            dispatcher,
            handler,
            pump,
            delayed,
        })
    }

    pub fn broker(&self) -> &InMemoryBroker {
        &self.broker
    }

    pub fn dispatcher(&self) -> &Arc<dyn MessageDispatcher> {
        &self.dispatcher
    }

    pub fn handler(&self) -> &Arc<LoggingMessageHandler> {
        &self.handler
    }

    pub fn input_address(&self) -> &QueueAddress {
        self.pump.input_address()
    }

    pub async fn start(&self) -> Result<(), HostError> {
        if let Some(delayed) = &self.delayed {
            delayed.start().await?;
        }
        self.pump.start().await?;

        info!(
            queue = %self.pump.input_address(),
            concurrency = self.config.concurrency,
            delayed_delivery = self.delayed.is_some(),
            "Host started"
        );
        Ok(())
    }

    /// Stop all pumps and wait for in-flight messages.
    ///
    /// With a shutdown timeout configured, processing still running when it
    /// expires is asked to stop cooperatively.
    pub async fn shutdown(&self) {
        let signal = CancellationToken::new();
        let timer = self.config.shutdown_timeout().map(|timeout| {
            let signal = signal.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                warn!(
                    timeout_seconds = timeout.as_secs(),
                    "Shutdown timeout expired, cancelling in-flight processing"
                );
                signal.cancel();
            })
        });
        let signal = timer.as_ref().map(|_| signal);

        self.pump.stop_receive(signal.clone()).await;
        if let Some(delayed) = &self.delayed {
            delayed.stop_receive(signal).await;
        }

        if let Some(timer) = timer {
            timer.abort();
        }
        info!("Host stopped");
    }
}
