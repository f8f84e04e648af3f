//! Receive strategies: one dequeue-process-complete cycle per call.
//!
//! Each strategy implements the same per-message protocol with different
//! transaction mechanics:
//!
//! 1. Begin a transaction (none, native, or ambient scope)
//! 2. Dequeue with a short timeout; nothing available ends the cycle as
//!    [`ReceiveOutcome::Skipped`]
//! 3. Decode headers; a message whose headers cannot be decoded is poison and
//!    is forwarded verbatim to the error queue
//! 4. Consult the failure record cache and let the error policy dispose of
//!    messages that failed before
//! 5. Hand the message to the application handler
//! 6. Commit on success, record the failure and abort otherwise
//!
//! Cancellation of in-flight processing aborts without consulting the policy.

use async_trait::async_trait;
use queue_pump_runtime::{
    Headers, NativeTransaction, QueueAddress, QueueBinding, QueueError, ReceivedMessage,
    SerializationError,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::TransactionMode;
use crate::critical::CriticalErrorHandler;
use crate::dispatch::{MessageDispatcher, TransportOperation};
use crate::error::{DispatchError, PumpError};
use crate::failure_info::FailureInfoStorage;
use crate::processing::{
    ContextBag, ErrorContext, ErrorHandleResult, ErrorPolicy, HandlerError, MessageContext,
    MessageHandler,
};
use crate::transaction::TransportTransaction;

mod native;
mod no_transaction;
mod scope;

pub use native::{NativeTransactionMode, NativeTransactionStrategy};
pub use no_transaction::NoTransactionStrategy;
pub use scope::TransactionScopeStrategy;

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;

// ============================================================================
// Outcomes
// ============================================================================

/// Terminal state of one receive cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// Nothing was dequeued
    Skipped,
    /// The message was consumed
    Committed,
    /// The message was returned to the queue (or lost without a transaction)
    Aborted,
}

/// A dequeue result classified by whether its headers can be read
#[derive(Debug)]
pub enum Received {
    NotFound,
    Poison {
        message: ReceivedMessage,
        error: SerializationError,
    },
    Message {
        message: ReceivedMessage,
        headers: Headers,
    },
}

impl Received {
    pub fn classify(dequeued: Option<ReceivedMessage>) -> Self {
        match dequeued {
            None => Self::NotFound,
            Some(message) => match message.headers() {
                Ok(headers) => Self::Message { message, headers },
                Err(error) => Self::Poison { message, error },
            },
        }
    }
}

/// One transactional dequeue-process-complete protocol
#[async_trait]
pub trait ReceiveStrategy: Send + Sync {
    async fn receive_message(
        &self,
        cancellation: &CancellationToken,
    ) -> Result<ReceiveOutcome, PumpError>;
}

/// Create the strategy for a transaction mode
pub fn create_strategy(
    mode: TransactionMode,
    pipeline: ReceivePipeline,
    scope_timeout: Duration,
) -> Arc<dyn ReceiveStrategy> {
    match mode {
        TransactionMode::None => Arc::new(NoTransactionStrategy::new(pipeline)),
        TransactionMode::ReceiveOnly => Arc::new(NativeTransactionStrategy::new(
            pipeline,
            NativeTransactionMode::ReceiveOnly,
        )),
        TransactionMode::SendsAtomicWithReceive => Arc::new(NativeTransactionStrategy::new(
            pipeline,
            NativeTransactionMode::SendsAtomicWithReceive,
        )),
        TransactionMode::TransactionScope => {
            Arc::new(TransactionScopeStrategy::new(pipeline, scope_timeout))
        }
    }
}

// ============================================================================
// Receive Pipeline
// ============================================================================

/// Collaborators shared by every receive strategy
#[derive(Clone)]
pub struct ReceivePipeline {
    pub input: Arc<dyn QueueBinding>,
    pub error_queue: QueueAddress,
    pub dispatcher: Arc<dyn MessageDispatcher>,
    pub failures: Arc<FailureInfoStorage>,
    pub handler: Arc<dyn MessageHandler>,
    pub policy: Arc<dyn ErrorPolicy>,
    pub critical: Arc<dyn CriticalErrorHandler>,
    pub receive_timeout: Duration,
}

impl ReceivePipeline {
    pub(crate) async fn dequeue(
        &self,
        transaction: Option<&dyn NativeTransaction>,
    ) -> Result<Received, QueueError> {
        let dequeued = self
            .input
            .dequeue(transaction, self.receive_timeout)
            .await?;
        Ok(Received::classify(dequeued))
    }

    /// Forward a message with unreadable headers to the error queue
    pub(crate) async fn forward_poison(
        &self,
        message: &ReceivedMessage,
        error: &SerializationError,
        transaction: &TransportTransaction,
    ) -> Result<(), DispatchError> {
        warn!(
            message_id = %message.message_id,
            error_queue = %self.error_queue,
            error = %error,
            "Message headers cannot be read, moving poison message to the error queue"
        );

        let operation = TransportOperation::verbatim(self.error_queue.clone(), message);
        transaction
            .run(self.dispatcher.dispatch(vec![operation], transaction))
            .await
    }

    pub(crate) fn message_context(
        &self,
        message: &ReceivedMessage,
        headers: Headers,
        transaction: TransportTransaction,
        context: ContextBag,
        cancellation: &CancellationToken,
    ) -> MessageContext {
        MessageContext {
            message_id: message.message_id.to_string(),
            headers,
            body: message.body.clone(),
            transaction,
            context,
            cancellation: cancellation.clone(),
            receive_address: self.input.address().clone(),
        }
    }

    /// Run the application handler inside the message's transaction
    pub(crate) async fn invoke_handler(
        &self,
        message: &MessageContext,
        timeout: Option<Duration>,
    ) -> Result<(), HandlerError> {
        let handle = message.transaction.run(self.handler.handle(message));

        match timeout {
            None => handle.await,
            Some(limit) => match tokio::time::timeout(limit, handle).await {
                Ok(result) => result,
                Err(_) => Err(HandlerError::Failed(anyhow::anyhow!(
                    "transaction scope timed out after {:?}",
                    limit
                ))),
            },
        }
    }

    /// Ask the error policy what to do with a failed message.
    ///
    /// A policy that fails is escalated to the critical error handler and
    /// the message is left for redelivery.
    pub(crate) async fn handle_error(&self, context: ErrorContext) -> ErrorHandleResult {
        let transaction = context.transaction.clone();
        match transaction.run(self.policy.on_error(&context)).await {
            Ok(result) => result,
            Err(e) => {
                let error = anyhow::Error::new(e);
                error!(
                    message_id = %context.message_id,
                    error = %error,
                    "Error handling policy failed"
                );
                self.critical.raise(
                    &format!(
                        "Failed to execute the error handling policy for message {}",
                        context.message_id
                    ),
                    &error,
                );
                ErrorHandleResult::RetryRequired
            }
        }
    }

    /// Commit or abort `native`, recording a failure for the message if the
    /// queue refuses
    async fn complete(
        &self,
        native: &Arc<dyn NativeTransaction>,
        message_id: &str,
        commit: bool,
        context: &ContextBag,
    ) -> Result<(), PumpError> {
        let (operation, result) = if commit {
            ("commit", native.commit().await)
        } else {
            ("abort", native.abort().await)
        };

        result.map_err(|source| {
            self.failures.record(
                message_id,
                anyhow::anyhow!("failed to {} transaction: {}", operation, source),
                context.clone(),
            );
            PumpError::CompletionFailed {
                operation,
                message_id: message_id.to_string(),
                source,
            }
        })
    }

    /// Protocol shared by every strategy that receives inside a native
    /// transaction
    pub(crate) async fn receive_in_transaction(
        &self,
        native: Arc<dyn NativeTransaction>,
        transaction: TransportTransaction,
        processing_timeout: Option<Duration>,
        cancellation: &CancellationToken,
    ) -> Result<ReceiveOutcome, PumpError> {
        let received = match self.dequeue(Some(native.as_ref())).await {
            Ok(received) => received,
            Err(e) => {
                if let Err(abort_error) = native.abort().await {
                    debug!(error = %abort_error, "Failed to abort transaction after dequeue error");
                }
                return Err(e.into());
            }
        };

        let (message, headers) = match received {
            Received::NotFound => {
                native.abort().await?;
                return Ok(ReceiveOutcome::Skipped);
            }
            Received::Poison { message, error } => {
                let message_id = message.message_id.to_string();
                if let Err(e) = self.forward_poison(&message, &error, &transaction).await {
                    self.complete(&native, &message_id, false, &ContextBag::new())
                        .await?;
                    return Err(e.into());
                }
                self.complete(&native, &message_id, true, &ContextBag::new())
                    .await?;
                return Ok(ReceiveOutcome::Committed);
            }
            Received::Message { message, headers } => (message, headers),
        };

        let message_id = message.message_id.to_string();

        if let Some(record) = self.failures.try_get(&message_id) {
            let result = self
                .handle_error(ErrorContext {
                    error: record.error,
                    message_id: message_id.clone(),
                    headers: headers.clone(),
                    body: message.body.clone(),
                    transaction: transaction.clone(),
                    attempts: record.attempts,
                    context: record.context.clone(),
                    receive_address: self.input.address().clone(),
                    can_redeliver: true,
                })
                .await;

            if result == ErrorHandleResult::Handled {
                self.complete(&native, &message_id, true, &record.context)
                    .await?;
                self.failures.clear(&message_id);
                return Ok(ReceiveOutcome::Committed);
            }
        }

        let context = ContextBag::new();
        let message_context =
            self.message_context(&message, headers, transaction, context.clone(), cancellation);

        match self.invoke_handler(&message_context, processing_timeout).await {
            Ok(()) => {
                self.complete(&native, &message_id, true, &context).await?;
                self.failures.clear(&message_id);
                debug!(message_id = %message_id, "Message processed");
                Ok(ReceiveOutcome::Committed)
            }
            Err(HandlerError::Cancelled) => {
                debug!(message_id = %message_id, "Processing cancelled, returning message to queue");
                self.complete(&native, &message_id, false, &context).await?;
                Ok(ReceiveOutcome::Aborted)
            }
            Err(HandlerError::Failed(_)) if cancellation.is_cancelled() => {
                debug!(message_id = %message_id, "Processing cancelled, returning message to queue");
                self.complete(&native, &message_id, false, &context).await?;
                Ok(ReceiveOutcome::Aborted)
            }
            Err(HandlerError::Failed(error)) => {
                let attempts = self.failures.record(&message_id, error, context.clone());
                debug!(
                    message_id = %message_id,
                    attempts,
                    "Message processing failed, returning message to queue"
                );
                // Failure already recorded; an abort error must not count twice
                native
                    .abort()
                    .await
                    .map_err(|source| PumpError::CompletionFailed {
                        operation: "abort",
                        message_id: message_id.clone(),
                        source,
                    })?;
                Ok(ReceiveOutcome::Aborted)
            }
        }
    }
}
