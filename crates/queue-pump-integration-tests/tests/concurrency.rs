//! Concurrency bounds, serialization and shutdown draining.

mod common;

use common::{eventually, test_settings, HandlerEvent, PumpFixture};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

async fn send_batch(fixture: &PumpFixture, prefix: &str, count: usize) {
    for i in 0..count {
        fixture.send(&format!("{}-{}", prefix, i)).await;
    }
}

// ============================================================================
// Bounded Processing
// ============================================================================

mod bounded {
    use super::*;

    #[tokio::test]
    async fn test_in_flight_messages_never_exceed_limit() {
        let fixture = PumpFixture::new(test_settings());
        fixture.handler.set_work_time(Duration::from_millis(10));
        fixture.start(3).await;

        send_batch(&fixture, "load", 30).await;

        assert!(eventually(|| fixture.handler.completed() == 30).await);
        fixture.pump.stop_receive(None).await;

        assert!(fixture.handler.max_active() <= 3);
        assert!(fixture.handler.max_active() >= 1);
    }

    #[tokio::test]
    async fn test_limit_holds_after_raising_and_lowering_concurrency() {
        let fixture = PumpFixture::new(test_settings());
        fixture.handler.set_work_time(Duration::from_millis(10));
        fixture.start(2).await;

        send_batch(&fixture, "first", 20).await;
        assert!(eventually(|| fixture.handler.completed() >= 5).await);
        assert!(fixture.handler.max_active() <= 2);

        fixture.pump.change_concurrency(5).await.unwrap();
        fixture.handler.reset_max_active();
        assert!(eventually(|| fixture.handler.completed() == 20).await);
        assert!(fixture.handler.max_active() <= 5);

        fixture.pump.change_concurrency(1).await.unwrap();
        fixture.handler.reset_max_active();
        send_batch(&fixture, "second", 10).await;
        assert!(eventually(|| fixture.handler.completed() == 30).await);
        fixture.pump.stop_receive(None).await;

        assert!(fixture.handler.max_active() <= 1);
        assert_eq!(fixture.count("input"), 0);
    }

    /// With a limit of one, each message finishes before the next begins.
    #[tokio::test]
    async fn test_single_slot_serializes_processing() {
        let fixture = PumpFixture::new(test_settings());
        fixture.handler.set_work_time(Duration::from_millis(2));
        fixture.start(1).await;

        send_batch(&fixture, "serial", 10).await;

        assert!(eventually(|| fixture.handler.completed() == 10).await);
        fixture.pump.stop_receive(None).await;

        let events = fixture.handler.events();
        assert_eq!(events.len(), 20);
        for pair in events.chunks(2) {
            match pair {
                [HandlerEvent::Began(started), HandlerEvent::Finished(finished)] => {
                    assert_eq!(started, finished)
                }
                other => panic!("interleaved processing: {:?}", other),
            }
        }
    }
}

// ============================================================================
// Draining
// ============================================================================

mod draining {
    use super::*;

    /// Stopping waits for every in-flight message and loses none: each
    /// message is either completed or still in the input queue.
    #[tokio::test]
    async fn test_stop_drains_in_flight_messages() {
        let fixture = PumpFixture::new(test_settings());
        fixture.handler.set_work_time(Duration::from_millis(50));
        fixture.start(4).await;

        send_batch(&fixture, "drain", 12).await;
        assert!(eventually(|| fixture.handler.active() > 0).await);

        fixture.pump.stop_receive(None).await;

        assert_eq!(fixture.handler.active(), 0);
        let events = fixture.handler.events();
        let began = events
            .iter()
            .filter(|e| matches!(e, HandlerEvent::Began(_)))
            .count();
        let finished = events
            .iter()
            .filter(|e| matches!(e, HandlerEvent::Finished(_)))
            .count();
        assert_eq!(began, finished);
        assert_eq!(fixture.handler.completed() + fixture.count("input"), 12);
        assert!(!fixture.pump.is_running().await);
    }

    #[tokio::test]
    async fn test_messages_left_after_stop_are_processed_on_restart() {
        let fixture = PumpFixture::new(test_settings());
        fixture.handler.set_work_time(Duration::from_millis(20));
        fixture.start(2).await;

        send_batch(&fixture, "resume", 10).await;
        assert!(eventually(|| fixture.handler.completed() >= 2).await);
        fixture.pump.stop_receive(None).await;
        let remaining = fixture.count("input");

        fixture.pump.start().await.unwrap();
        assert!(eventually(|| fixture.handler.completed() == 10).await);
        fixture.pump.stop_receive(None).await;

        assert_eq!(fixture.count("input"), 0);
        assert!(remaining <= 8);
    }

    /// Stopping with a signal waits as usual until the signal fires, then
    /// slow handlers are cancelled and their messages return to the queue
    /// without counting as failed attempts.
    #[tokio::test]
    async fn test_stop_signal_returns_slow_messages_to_queue() {
        let fixture = PumpFixture::new(test_settings());
        fixture.handler.set_work_time(Duration::from_secs(30));
        fixture.start(3).await;

        send_batch(&fixture, "slow", 3).await;
        assert!(eventually(|| fixture.handler.active() == 3).await);

        let signal = CancellationToken::new();
        let stopping = {
            let pump = fixture.pump.clone();
            let signal = signal.clone();
            tokio::spawn(async move { pump.stop_receive(Some(signal)).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!stopping.is_finished());

        signal.cancel();
        tokio::time::timeout(Duration::from_secs(2), stopping)
            .await
            .expect("stop did not return after the signal fired")
            .unwrap();

        assert_eq!(fixture.handler.cancelled(), 3);
        assert_eq!(fixture.handler.completed(), 0);
        assert_eq!(fixture.handler.active(), 0);
        assert_eq!(fixture.count("input"), 3);
        assert_eq!(fixture.count("error"), 0);
        assert!(fixture.pump.failures().is_empty());
    }
}
