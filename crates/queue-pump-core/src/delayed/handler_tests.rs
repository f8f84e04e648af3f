//! Tests for the delayed delivery handler.

use super::*;
use crate::clock::ManualClock;
use crate::delayed::store::InMemoryTimeoutStore;
use crate::dispatch::BindingDispatcher;
use crate::processing::ContextBag;
use crate::transaction::TransportTransaction;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use queue_pump_runtime::{Headers, InMemoryBroker, QueueAddress, QueueBinding};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn address(name: &str) -> QueueAddress {
    QueueAddress::local(name).unwrap()
}

struct Fixture {
    broker: InMemoryBroker,
    store: Arc<InMemoryTimeoutStore>,
    clock: Arc<ManualClock>,
    handler: DelayedDeliveryHandler,
}

impl Fixture {
    fn new() -> Self {
        let broker = InMemoryBroker::default();
        broker.create_queue(&address("timeouts"), true).unwrap();
        broker.create_queue(&address("reminders"), true).unwrap();

        let store = Arc::new(InMemoryTimeoutStore::new());
        let clock = Arc::new(ManualClock::default());
        let dispatcher: Arc<dyn MessageDispatcher> =
            Arc::new(BindingDispatcher::new(Arc::new(broker.clone())));
        let poller = Arc::new(TimeoutPoller::new(
            store.clone(),
            dispatcher.clone(),
            clock.clone(),
            Arc::new(crate::critical::LoggingCriticalErrorHandler),
            Duration::from_secs(60),
        ));
        let handler = DelayedDeliveryHandler::new(store.clone(), poller, dispatcher, clock.clone());

        Self {
            broker,
            store,
            clock,
            handler,
        }
    }

    fn timeout_message(&self, due: DateTime<Utc>, transaction: TransportTransaction) -> MessageContext {
        let mut headers = Headers::new();
        headers.insert("app.kind".to_string(), "reminder".to_string());
        TimeoutHeaders {
            destination: address("reminders"),
            due,
        }
        .apply(&mut headers);

        MessageContext {
            message_id: "timeout-1".to_string(),
            headers,
            body: Bytes::from_static(b"remind me"),
            transaction,
            context: ContextBag::new(),
            cancellation: CancellationToken::new(),
            receive_address: address("timeouts"),
        }
    }

    fn delivered(&self) -> usize {
        self.broker.message_count(&address("reminders"))
    }
}

mod routing {
    use super::*;

    #[tokio::test]
    async fn test_due_timeout_is_dispatched_immediately() {
        let fixture = Fixture::new();
        let message = fixture.timeout_message(fixture.clock.now(), TransportTransaction::None);

        fixture.handler.handle(&message).await.unwrap();

        assert_eq!(fixture.delivered(), 1);
        assert!(fixture.store.is_empty());

        let delivered = fixture.broker.messages(&address("reminders")).remove(0);
        let headers = delivered.headers().unwrap();
        assert_eq!(headers["app.kind"], "reminder");
        assert!(!headers.contains_key(crate::headers::TIMEOUT_DUE_UTC));
    }

    #[tokio::test]
    async fn test_future_timeout_is_stored() {
        let fixture = Fixture::new();
        let due = fixture.clock.now() + chrono::Duration::minutes(5);
        let message = fixture.timeout_message(due, TransportTransaction::None);

        fixture.handler.handle(&message).await.unwrap();

        assert_eq!(fixture.delivered(), 0);
        assert!(fixture.store.contains("timeout-1"));
        assert_eq!(fixture.store.next_due().await.unwrap(), Some(due));
    }

    #[tokio::test]
    async fn test_redelivered_timeout_is_stored_once() {
        let fixture = Fixture::new();
        let due = fixture.clock.now() + chrono::Duration::minutes(5);
        let message = fixture.timeout_message(due, TransportTransaction::None);

        fixture.handler.handle(&message).await.unwrap();
        fixture.handler.handle(&message).await.unwrap();

        assert_eq!(fixture.store.len(), 1);
    }

    #[tokio::test]
    async fn test_immediate_dispatch_joins_receive_transaction() {
        let fixture = Fixture::new();
        let timeouts = fixture.broker.queue(&address("timeouts")).unwrap();
        let tx = timeouts.begin_transaction().await.unwrap();
        let message = fixture.timeout_message(
            fixture.clock.now(),
            TransportTransaction::Native(tx.clone()),
        );

        fixture.handler.handle(&message).await.unwrap();
        assert_eq!(fixture.delivered(), 0);

        tx.commit().await.unwrap();
        assert_eq!(fixture.delivered(), 1);
    }
}

mod malformed {
    use super::*;

    #[tokio::test]
    async fn test_missing_timeout_headers_fail_processing() {
        let fixture = Fixture::new();
        let mut message = fixture.timeout_message(fixture.clock.now(), TransportTransaction::None);
        message.headers.remove(crate::headers::TIMEOUT_DESTINATION);

        let result = fixture.handler.handle(&message).await;

        assert!(matches!(result, Err(HandlerError::Failed(_))));
        assert_eq!(fixture.delivered(), 0);
        assert!(fixture.store.is_empty());
    }

    #[tokio::test]
    async fn test_unparseable_due_time_fails_processing() {
        let fixture = Fixture::new();
        let mut message = fixture.timeout_message(fixture.clock.now(), TransportTransaction::None);
        message.headers.insert(
            crate::headers::TIMEOUT_DUE_UTC.to_string(),
            "next tuesday".to_string(),
        );

        let result = fixture.handler.handle(&message).await;

        match result {
            Err(HandlerError::Failed(e)) => assert!(e.to_string().contains("DueUtc")),
            other => panic!("expected processing failure, got {:?}", other.err()),
        }
    }
}
