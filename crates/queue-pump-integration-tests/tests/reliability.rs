//! Delivery guarantees across the pump, receive strategies and error policy.

mod common;

use common::{eventually, test_settings, PumpFixture};
use queue_pump_core::{headers, TransactionMode};

// ============================================================================
// At-Least-Once Delivery
// ============================================================================

mod at_least_once {
    use super::*;

    /// A message that fails fewer times than the attempt limit is handled
    /// once more after its last failure and never reaches the error queue.
    #[tokio::test]
    async fn test_transient_failures_are_retried_until_success() {
        let fixture = PumpFixture::new(test_settings());
        fixture.handler.fail_times("order-1", 2);
        fixture.start(1).await;

        fixture.send("order-1").await;

        assert!(eventually(|| fixture.handler.completed() == 1).await);
        fixture.pump.stop_receive(None).await;

        assert_eq!(fixture.handler.invocations("order-1"), 3);
        assert_eq!(fixture.count("input"), 0);
        assert_eq!(fixture.count("error"), 0);
    }

    /// The failure record carries the attempt count into the retry and is
    /// dropped once the message succeeds.
    #[tokio::test]
    async fn test_failure_record_tracks_attempts_and_clears_on_success() {
        let fixture = PumpFixture::new(test_settings());
        fixture.handler.fail_times("order-2", 2);
        fixture.start(1).await;

        fixture.send("order-2").await;

        assert!(eventually(|| fixture.handler.completed() == 1).await);
        fixture.pump.stop_receive(None).await;

        assert_eq!(fixture.handler.attempts_at_success("order-2"), Some(2));
        assert!(fixture.pump.failures().is_empty());
    }

    #[tokio::test]
    async fn test_receive_only_mode_retries_failed_messages() {
        let settings = queue_pump_core::PumpSettings {
            transaction_mode: TransactionMode::ReceiveOnly,
            ..test_settings()
        };
        let fixture = PumpFixture::new(settings);
        fixture.handler.fail_times("order-3", 1);
        fixture.start(2).await;

        fixture.send("order-3").await;

        assert!(eventually(|| fixture.handler.completed() == 1).await);
        fixture.pump.stop_receive(None).await;

        assert_eq!(fixture.handler.invocations("order-3"), 2);
        assert_eq!(fixture.count("input"), 0);
    }

    #[tokio::test]
    async fn test_scope_mode_retries_failed_messages() {
        let settings = queue_pump_core::PumpSettings {
            transaction_mode: TransactionMode::TransactionScope,
            ..test_settings()
        };
        let fixture = PumpFixture::new(settings);
        fixture.handler.fail_times("order-4", 1);
        fixture.start(2).await;

        fixture.send("order-4").await;

        assert!(eventually(|| fixture.handler.completed() == 1).await);
        fixture.pump.stop_receive(None).await;

        assert_eq!(fixture.handler.invocations("order-4"), 2);
        assert_eq!(fixture.count("input"), 0);
    }
}

// ============================================================================
// Exhausted Retries
// ============================================================================

mod exhausted_retries {
    use super::*;

    #[tokio::test]
    async fn test_message_moves_to_error_queue_after_max_attempts() {
        let fixture = PumpFixture::new(test_settings());
        fixture.handler.fail_times("broken", u32::MAX);
        fixture.start(1).await;

        fixture.send("broken").await;

        assert!(eventually(|| fixture.count("error") == 1).await);
        fixture.pump.stop_receive(None).await;

        assert_eq!(fixture.handler.invocations("broken"), 3);
        assert_eq!(fixture.count("input"), 0);
        assert!(fixture.pump.failures().is_empty());
    }

    #[tokio::test]
    async fn test_dead_lettered_message_carries_diagnostics() {
        let fixture = PumpFixture::new(test_settings());
        fixture.handler.fail_times("broken", u32::MAX);
        fixture.start(1).await;

        fixture.send("broken").await;

        assert!(eventually(|| fixture.count("error") == 1).await);
        fixture.pump.stop_receive(None).await;

        let dead = fixture.broker.messages(&common::address("error")).remove(0);
        let diagnostics = dead.headers().unwrap();

        assert_eq!(dead.body.as_ref(), b"broken");
        assert_eq!(
            diagnostics.get(headers::PROCESSING_ATTEMPTS).map(String::as_str),
            Some("3")
        );
        assert!(diagnostics[headers::EXCEPTION_MESSAGE].contains("scripted failure"));
        assert!(diagnostics[headers::FAILED_QUEUE].contains("input"));
        assert!(diagnostics.contains_key(headers::TIME_OF_FAILURE));
    }

    /// Without a native transaction a failed message cannot come back, so
    /// the policy moves it on its first failure.
    #[tokio::test]
    async fn test_no_transaction_mode_dead_letters_on_first_failure() {
        let settings = queue_pump_core::PumpSettings {
            transaction_mode: TransactionMode::None,
            ..test_settings()
        };
        let fixture = PumpFixture::new(settings);
        fixture.handler.fail_times("fragile", 1);
        fixture.start(1).await;

        fixture.send("fragile").await;

        assert!(eventually(|| fixture.count("error") == 1).await);
        fixture.pump.stop_receive(None).await;

        assert_eq!(fixture.handler.invocations("fragile"), 1);
        assert_eq!(fixture.handler.completed(), 0);
        assert_eq!(fixture.count("input"), 0);
    }
}

// ============================================================================
// Poison Messages
// ============================================================================

mod poison_messages {
    use super::*;

    /// Unreadable messages go straight to the error queue without reaching
    /// the handler, and healthy traffic around them is unaffected.
    #[tokio::test]
    async fn test_poison_message_is_isolated_under_concurrency() {
        let fixture = PumpFixture::new(test_settings());
        fixture.start(8).await;

        for i in 0..20 {
            fixture.send(&format!("healthy-{}", i)).await;
        }
        fixture.send_poison("poison").await;
        for i in 20..40 {
            fixture.send(&format!("healthy-{}", i)).await;
        }

        assert!(
            eventually(|| fixture.handler.completed() == 40 && fixture.count("error") == 1).await
        );
        fixture.pump.stop_receive(None).await;

        assert_eq!(fixture.handler.invocations("poison"), 0);
        assert_eq!(fixture.error_bodies(), vec!["poison".to_string()]);
        assert_eq!(fixture.count("input"), 0);
        assert!(fixture.critical.raised().is_empty());
    }
}
