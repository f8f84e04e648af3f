//! Receive inside a native queue transaction.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::{ReceiveOutcome, ReceivePipeline, ReceiveStrategy};
use crate::error::PumpError;
use crate::transaction::TransportTransaction;

/// Which native transaction variant a strategy implements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeTransactionMode {
    ReceiveOnly,
    SendsAtomicWithReceive,
}

/// Dequeues inside a native transaction and exposes that transaction to the
/// handler, so outgoing sends commit or roll back with the receive.
pub struct NativeTransactionStrategy {
    pipeline: ReceivePipeline,
    mode: NativeTransactionMode,
}

impl NativeTransactionStrategy {
    pub fn new(pipeline: ReceivePipeline, mode: NativeTransactionMode) -> Self {
        Self { pipeline, mode }
    }

    pub fn mode(&self) -> NativeTransactionMode {
        self.mode
    }
}

#[async_trait]
impl ReceiveStrategy for NativeTransactionStrategy {
    async fn receive_message(
        &self,
        cancellation: &CancellationToken,
    ) -> Result<ReceiveOutcome, PumpError> {
        let native = self.pipeline.input.begin_transaction().await?;
        trace!(transaction_id = %native.id(), mode = ?self.mode, "Began receive transaction");

        let transaction = TransportTransaction::Native(native.clone());
        self.pipeline
            .receive_in_transaction(native, transaction, None, cancellation)
            .await
    }
}
