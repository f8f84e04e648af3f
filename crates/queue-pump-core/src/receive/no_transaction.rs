//! Receive without any transaction.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::{ReceiveOutcome, ReceivePipeline, ReceiveStrategy, Received};
use crate::error::PumpError;
use crate::processing::{ContextBag, ErrorContext, ErrorHandleResult, HandlerError};
use crate::transaction::TransportTransaction;

/// Destructive receive. A failed message cannot return to the queue, so the
/// error policy is consulted right away with redelivery ruled out.
pub struct NoTransactionStrategy {
    pipeline: ReceivePipeline,
}

impl NoTransactionStrategy {
    pub fn new(pipeline: ReceivePipeline) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl ReceiveStrategy for NoTransactionStrategy {
    async fn receive_message(
        &self,
        cancellation: &CancellationToken,
    ) -> Result<ReceiveOutcome, PumpError> {
        let pipeline = &self.pipeline;
        let transaction = TransportTransaction::None;

        let (message, headers) = match pipeline.dequeue(None).await? {
            Received::NotFound => return Ok(ReceiveOutcome::Skipped),
            Received::Poison { message, error } => {
                if let Err(e) = pipeline.forward_poison(&message, &error, &transaction).await {
                    error!(
                        message_id = %message.message_id,
                        error = %e,
                        "Failed to move poison message to the error queue, message lost"
                    );
                    return Err(e.into());
                }
                return Ok(ReceiveOutcome::Committed);
            }
            Received::Message { message, headers } => (message, headers),
        };

        let message_id = message.message_id.to_string();
        let context = ContextBag::new();
        let message_context = pipeline.message_context(
            &message,
            headers.clone(),
            transaction.clone(),
            context.clone(),
            cancellation,
        );

        let error = match pipeline.invoke_handler(&message_context, None).await {
            Ok(()) => {
                debug!(message_id = %message_id, "Message processed");
                return Ok(ReceiveOutcome::Committed);
            }
            Err(HandlerError::Cancelled) => {
                warn!(
                    message_id = %message_id,
                    "Processing cancelled without a transaction, message cannot be returned to the queue"
                );
                return Ok(ReceiveOutcome::Aborted);
            }
            Err(HandlerError::Failed(error)) => error,
        };

        let result = pipeline
            .handle_error(ErrorContext {
                error: std::sync::Arc::new(error),
                message_id: message_id.clone(),
                headers,
                body: message.body.clone(),
                transaction,
                attempts: 1,
                context,
                receive_address: pipeline.input.address().clone(),
                can_redeliver: false,
            })
            .await;

        match result {
            ErrorHandleResult::Handled => Ok(ReceiveOutcome::Committed),
            ErrorHandleResult::RetryRequired => {
                error!(
                    message_id = %message_id,
                    "Retry requested for a message received without a transaction, message lost"
                );
                Ok(ReceiveOutcome::Aborted)
            }
        }
    }
}
