//! Default error-handling policy: bounded retries, then the error queue.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use queue_pump_runtime::{Headers, QueueAddress};
use std::sync::Arc;
use tracing::warn;

use crate::clock::{Clock, SystemClock};
use crate::dispatch::{MessageDispatcher, TransportOperation};
use crate::error::PolicyError;
use crate::headers;
use crate::processing::{ErrorContext, ErrorHandleResult, ErrorPolicy};

#[cfg(test)]
#[path = "recoverability_tests.rs"]
mod tests;

/// Retries a failed message until it has been attempted `max_attempts`
/// times, then moves it to the error queue with diagnostic headers.
///
/// Messages that cannot be redelivered are moved on their first failure.
pub struct DeadLetterPolicy {
    dispatcher: Arc<dyn MessageDispatcher>,
    error_queue: QueueAddress,
    max_attempts: u32,
    clock: Arc<dyn Clock>,
}

impl DeadLetterPolicy {
    pub fn new(
        dispatcher: Arc<dyn MessageDispatcher>,
        error_queue: QueueAddress,
        max_attempts: u32,
    ) -> Self {
        Self {
            dispatcher,
            error_queue,
            max_attempts,
            clock: Arc::new(SystemClock),
        }
    }

    /// Stamp failure times from `clock` instead of the system clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn error_queue(&self) -> &QueueAddress {
        &self.error_queue
    }
}

/// Build the diagnostic headers attached to a dead-lettered message
pub fn failure_headers(context: &ErrorContext, failed_at: DateTime<Utc>) -> Headers {
    let mut headers = context.headers.clone();
    let error = context.error.as_ref();

    headers.insert(headers::EXCEPTION_MESSAGE.to_string(), error.to_string());
    headers.insert(
        headers::EXCEPTION_ROOT_CAUSE.to_string(),
        error.root_cause().to_string(),
    );
    headers.insert(headers::EXCEPTION_STACK_TRACE.to_string(), format!("{:?}", error));
    headers.insert(
        headers::FAILED_QUEUE.to_string(),
        context.receive_address.to_string(),
    );
    headers.insert(
        headers::TIME_OF_FAILURE.to_string(),
        headers::format_utc(failed_at),
    );
    headers.insert(
        headers::PROCESSING_ATTEMPTS.to_string(),
        context.attempts.to_string(),
    );

    headers
}

#[async_trait]
impl ErrorPolicy for DeadLetterPolicy {
    async fn on_error(&self, context: &ErrorContext) -> Result<ErrorHandleResult, PolicyError> {
        if context.can_redeliver && context.attempts < self.max_attempts {
            warn!(
                message_id = %context.message_id,
                attempts = context.attempts,
                max_attempts = self.max_attempts,
                error = %context.error,
                "Message processing failed, retrying"
            );
            return Ok(ErrorHandleResult::RetryRequired);
        }

        let operation = TransportOperation::new(
            self.error_queue.clone(),
            context.message_id.clone(),
            failure_headers(context, self.clock.now()),
            context.body.clone(),
        );
        self.dispatcher
            .dispatch(vec![operation], &context.transaction)
            .await?;

        warn!(
            message_id = %context.message_id,
            attempts = context.attempts,
            error_queue = %self.error_queue,
            error = %context.error,
            "Moved message to the error queue"
        );

        Ok(ErrorHandleResult::Handled)
    }
}
