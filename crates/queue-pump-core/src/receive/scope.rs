//! Receive inside an ambient transaction scope.

use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{ReceiveOutcome, ReceivePipeline, ReceiveStrategy};
use crate::error::PumpError;
use crate::transaction::{TransactionScope, TransportTransaction};

/// Dequeues inside a transaction scope that is ambient while the handler and
/// the error policy run.
///
/// Processing that outlives `timeout` is treated as a failure and the scope
/// is rolled back.
pub struct TransactionScopeStrategy {
    pipeline: ReceivePipeline,
    timeout: Duration,
}

impl TransactionScopeStrategy {
    pub fn new(pipeline: ReceivePipeline, timeout: Duration) -> Self {
        Self { pipeline, timeout }
    }
}

#[async_trait]
impl ReceiveStrategy for TransactionScopeStrategy {
    async fn receive_message(
        &self,
        cancellation: &CancellationToken,
    ) -> Result<ReceiveOutcome, PumpError> {
        let native = self.pipeline.input.begin_transaction().await?;
        let transaction = TransportTransaction::Scope(TransactionScope::new(native.clone()));

        self.pipeline
            .receive_in_transaction(native, transaction, Some(self.timeout), cancellation)
            .await
    }
}
