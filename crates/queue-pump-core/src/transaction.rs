//! Transport transactions and ambient transaction scopes.
//!
//! A [`TransportTransaction`] travels with a received message so that
//! outgoing sends can join the receive transaction. A [`TransactionScope`]
//! makes a native transaction ambient for the duration of a future, so code
//! that never sees the message context still enlists in it.

use queue_pump_runtime::NativeTransaction;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

#[cfg(test)]
#[path = "transaction_tests.rs"]
mod tests;

tokio::task_local! {
    static AMBIENT_SCOPE: TransactionScope;
}

// ============================================================================
// Transaction Scope
// ============================================================================

/// Ambient transaction wrapping a native transaction
#[derive(Clone)]
pub struct TransactionScope {
    transaction: Arc<dyn NativeTransaction>,
}

impl TransactionScope {
    pub fn new(transaction: Arc<dyn NativeTransaction>) -> Self {
        Self { transaction }
    }

    /// Get the scope active on the current task, if any
    pub fn current() -> Option<TransactionScope> {
        AMBIENT_SCOPE.try_with(|scope| scope.clone()).ok()
    }

    /// Run `future` with this scope as the ambient transaction
    pub async fn enter<F: Future>(&self, future: F) -> F::Output {
        AMBIENT_SCOPE.scope(self.clone(), future).await
    }

    pub fn transaction(&self) -> &Arc<dyn NativeTransaction> {
        &self.transaction
    }
}

impl fmt::Debug for TransactionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionScope")
            .field("transaction", &self.transaction.id())
            .finish()
    }
}

// ============================================================================
// Transport Transaction
// ============================================================================

/// Transaction context of one receive cycle
#[derive(Clone, Default)]
pub enum TransportTransaction {
    /// No transaction; sends happen immediately
    #[default]
    None,
    /// Native queue transaction passed explicitly
    Native(Arc<dyn NativeTransaction>),
    /// Ambient scope transaction
    Scope(TransactionScope),
}

impl TransportTransaction {
    /// Native transaction a send should enlist in.
    ///
    /// Falls back to the ambient scope of the current task when no
    /// transaction was passed explicitly.
    pub fn enlistment(&self) -> Option<Arc<dyn NativeTransaction>> {
        match self {
            Self::Native(transaction) => Some(Arc::clone(transaction)),
            Self::Scope(scope) => Some(Arc::clone(scope.transaction())),
            Self::None => TransactionScope::current().map(|scope| Arc::clone(scope.transaction())),
        }
    }

    /// Run `future` inside this transaction's ambient scope, if it has one
    pub async fn run<F: Future>(&self, future: F) -> F::Output {
        match self {
            Self::Scope(scope) => scope.enter(future).await,
            _ => future.await,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

impl fmt::Debug for TransportTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Native(transaction) => f.debug_tuple("Native").field(transaction.id()).finish(),
            Self::Scope(scope) => f.debug_tuple("Scope").field(scope).finish(),
        }
    }
}
