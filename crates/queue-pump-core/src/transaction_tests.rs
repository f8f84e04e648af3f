//! Tests for transport transactions and ambient scopes.

use super::*;
use queue_pump_runtime::{InMemoryBroker, QueueAddress, QueueBinding};

async fn native_transaction() -> (InMemoryBroker, Arc<dyn NativeTransaction>) {
    let broker = InMemoryBroker::default();
    let queue = broker
        .create_queue(&QueueAddress::local("input").unwrap(), true)
        .unwrap();
    let transaction = queue.begin_transaction().await.unwrap();
    (broker, transaction)
}

#[tokio::test]
async fn test_no_transaction_outside_scope_has_no_enlistment() {
    assert!(TransportTransaction::None.enlistment().is_none());
    assert!(TransactionScope::current().is_none());
}

#[tokio::test]
async fn test_native_transaction_is_enlisted() {
    let (_broker, transaction) = native_transaction().await;
    let transport = TransportTransaction::Native(transaction.clone());

    let enlisted = transport.enlistment().unwrap();
    assert_eq!(enlisted.id(), transaction.id());
}

/// Code running inside a scope sees it even without the transport transaction.
#[tokio::test]
async fn test_scope_is_ambient_inside_run() {
    let (_broker, transaction) = native_transaction().await;
    let transport = TransportTransaction::Scope(TransactionScope::new(transaction.clone()));

    let seen = transport
        .run(async { TransportTransaction::None.enlistment().map(|t| t.id().clone()) })
        .await;

    assert_eq!(seen.as_ref(), Some(transaction.id()));
    assert!(TransactionScope::current().is_none());
}

#[tokio::test]
async fn test_native_transaction_is_not_ambient() {
    let (_broker, transaction) = native_transaction().await;
    let transport = TransportTransaction::Native(transaction);

    let seen = transport
        .run(async { TransactionScope::current().is_some() })
        .await;

    assert!(!seen);
}
