//! # Queue Pump Core
//!
//! Reliability layer between a message queue and application handlers.
//!
//! A [`MessagePump`] peeks its input queue, bounds concurrent processing with
//! a token pool and runs one [`ReceiveStrategy`] cycle per message. The
//! strategy receives inside the configured transaction mode, hands the
//! message to a [`MessageHandler`], and commits or aborts. Failed messages
//! are tracked in a [`FailureInfoStorage`] across redeliveries so that an
//! [`ErrorPolicy`] can decide between another attempt and the error queue.
//!
//! Sustained queue failures are escalated through circuit breakers to the
//! host's [`CriticalErrorHandler`].
//!
//! ## Delayed delivery
//!
//! Sends with a future delivery time are rerouted to a timeouts queue. A
//! [`DelayedDeliveryPump`] stores them and its [`TimeoutPoller`] dispatches
//! them once due.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use queue_pump_core::{
//!     BindingDispatcher, DeadLetterPolicy, LoggingCriticalErrorHandler, MessagePump,
//!     PumpSettings,
//! };
//! use queue_pump_runtime::{InMemoryBroker, QueueAddress};
//! use std::sync::Arc;
//!
//! # async fn example(handler: Arc<dyn queue_pump_core::MessageHandler>) -> anyhow::Result<()> {
//! let broker = InMemoryBroker::default();
//! let input = broker.create_queue(&QueueAddress::local("orders")?, true)?;
//! broker.create_queue(&QueueAddress::local("error")?, true)?;
//!
//! let settings = PumpSettings::default();
//! let dispatcher = Arc::new(BindingDispatcher::new(Arc::new(broker.clone())));
//! let policy = Arc::new(DeadLetterPolicy::new(
//!     dispatcher.clone(),
//!     settings.error_queue_address()?,
//!     settings.max_processing_attempts,
//! ));
//!
//! let pump = MessagePump::new(
//!     "orders",
//!     input,
//!     dispatcher,
//!     settings,
//!     Arc::new(LoggingCriticalErrorHandler),
//! );
//! pump.initialize(4, handler, policy).await?;
//! pump.start().await?;
//! // ...
//! pump.stop_receive(None).await;
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod clock;
pub mod config;
pub mod critical;
pub mod delayed;
pub mod dispatch;
pub mod error;
pub mod failure_info;
pub mod headers;
pub mod processing;
pub mod pump;
pub mod receive;
pub mod recoverability;
pub mod transaction;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitMetrics, CircuitState,
    RepeatedFailuresCircuitBreaker,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{DelayedDeliverySettings, PumpSettings, TransactionMode};
pub use critical::{CriticalErrorHandler, LoggingCriticalErrorHandler};
pub use delayed::{
    DelayedDeliveryHandler, DelayedDeliveryPump, InMemoryTimeoutStore, PollSummary, TimeoutItem,
    TimeoutPoller, TimeoutStore,
};
pub use dispatch::{BindingDispatcher, MessageDispatcher, TransportOperation};
pub use error::{DispatchError, HeaderError, PolicyError, PumpError, TimeoutStoreError};
pub use failure_info::{FailureInfoStorage, FailureRecord, DEFAULT_FAILURE_CACHE_CAPACITY};
pub use processing::{
    ContextBag, ErrorContext, ErrorHandleResult, ErrorPolicy, HandlerError, MessageContext,
    MessageHandler,
};
pub use pump::{MessagePump, MAX_CONCURRENCY};
pub use receive::{ReceiveOutcome, ReceiveStrategy, Received};
pub use recoverability::DeadLetterPolicy;
pub use transaction::{TransactionScope, TransportTransaction};
