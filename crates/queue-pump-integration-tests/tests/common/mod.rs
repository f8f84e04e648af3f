//! Common test utilities for queue-pump integration tests
//!
//! This module provides:
//! - A scripted application handler that fails chosen messages a set number
//!   of times and records what it observed
//! - A recording critical error handler
//! - A fixture wiring an in-memory broker, dispatcher and message pump

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use queue_pump_core::{
    BindingDispatcher, CriticalErrorHandler, DeadLetterPolicy, ErrorPolicy, FailureInfoStorage,
    HandlerError, MessageContext, MessageDispatcher, MessageHandler, MessagePump, PumpSettings,
    TransactionMode,
};
use queue_pump_runtime::{Headers, InMemoryBroker, Message, QueueAddress, QueueBinding};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::{sleep, Duration, Instant};

pub fn address(name: &str) -> QueueAddress {
    QueueAddress::local(name).unwrap()
}

/// Settings tuned for fast test turnaround
pub fn test_settings() -> PumpSettings {
    PumpSettings {
        transaction_mode: TransactionMode::SendsAtomicWithReceive,
        peek_timeout_ms: 20,
        delay_after_failure_ms: 0,
        max_processing_attempts: 3,
        ..PumpSettings::default()
    }
}

/// Poll `condition` until it holds or five seconds pass
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(5)).await;
    }
    condition()
}

// ============================================================================
// Scripted Handler
// ============================================================================

/// Event observed by the scripted handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerEvent {
    Began(String),
    Finished(String),
}

/// Application handler whose behaviour is scripted per message body
#[derive(Default)]
pub struct ScriptedHandler {
    /// Body -> number of failures before succeeding
    failures: Mutex<HashMap<String, u32>>,
    invocations: Mutex<HashMap<String, u32>>,
    events: Mutex<Vec<HandlerEvent>>,
    /// Attempt count found in the failure records when a message succeeded
    attempts_at_success: Mutex<HashMap<String, Option<u32>>>,
    failure_records: Mutex<Option<Arc<FailureInfoStorage>>>,
    work_time: Mutex<Duration>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    completed: AtomicUsize,
    cancelled: AtomicUsize,
}

impl ScriptedHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the message with `body` this many times before it succeeds
    pub fn fail_times(&self, body: &str, times: u32) {
        self.failures.lock().unwrap().insert(body.to_string(), times);
    }

    /// Keep each invocation busy for `duration`, or until its processing
    /// is cancelled
    pub fn set_work_time(&self, duration: Duration) {
        *self.work_time.lock().unwrap() = duration;
    }

    /// Inspect the pump's failure records at the moment of success
    pub fn observe_failures(&self, failures: Arc<FailureInfoStorage>) {
        *self.failure_records.lock().unwrap() = Some(failures);
    }

    pub fn invocations(&self, body: &str) -> u32 {
        self.invocations
            .lock()
            .unwrap()
            .get(body)
            .copied()
            .unwrap_or(0)
    }

    pub fn attempts_at_success(&self, body: &str) -> Option<u32> {
        self.attempts_at_success
            .lock()
            .unwrap()
            .get(body)
            .copied()
            .flatten()
    }

    pub fn events(&self) -> Vec<HandlerEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn reset_max_active(&self) {
        self.max_active.store(self.active(), Ordering::SeqCst);
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn should_fail(&self, body: &str) -> bool {
        let mut failures = self.failures.lock().unwrap();
        match failures.get_mut(body) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl MessageHandler for ScriptedHandler {
    async fn handle(&self, message: &MessageContext) -> Result<(), HandlerError> {
        let body = String::from_utf8_lossy(&message.body).into_owned();
        *self
            .invocations
            .lock()
            .unwrap()
            .entry(body.clone())
            .or_insert(0) += 1;
        self.events
            .lock()
            .unwrap()
            .push(HandlerEvent::Began(body.clone()));

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);

        let work_time = *self.work_time.lock().unwrap();
        if !work_time.is_zero() {
            tokio::select! {
                _ = sleep(work_time) => {}
                _ = message.cancellation.cancelled() => {
                    self.events
                        .lock()
                        .unwrap()
                        .push(HandlerEvent::Finished(body.clone()));
                    self.active.fetch_sub(1, Ordering::SeqCst);
                    self.cancelled.fetch_add(1, Ordering::SeqCst);
                    return Err(HandlerError::Cancelled);
                }
            }
        }

        let fail = self.should_fail(&body);
        if !fail {
            let records = self.failure_records.lock().unwrap().clone();
            if let Some(records) = records {
                let attempts = records.try_get(&message.message_id).map(|r| r.attempts);
                self.attempts_at_success
                    .lock()
                    .unwrap()
                    .insert(body.clone(), attempts);
            }
        }

        self.events
            .lock()
            .unwrap()
            .push(HandlerEvent::Finished(body.clone()));
        self.active.fetch_sub(1, Ordering::SeqCst);

        if fail {
            return Err(anyhow::anyhow!("scripted failure for '{}'", body).into());
        }
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Critical Errors
// ============================================================================

#[derive(Default)]
pub struct RecordingCritical {
    raised: Mutex<Vec<String>>,
}

impl RecordingCritical {
    pub fn raised(&self) -> Vec<String> {
        self.raised.lock().unwrap().clone()
    }
}

impl CriticalErrorHandler for RecordingCritical {
    fn raise(&self, description: &str, _error: &anyhow::Error) {
        self.raised.lock().unwrap().push(description.to_string());
    }
}

// ============================================================================
// Pump Fixture
// ============================================================================

pub struct PumpFixture {
    pub broker: InMemoryBroker,
    pub dispatcher: Arc<dyn MessageDispatcher>,
    pub critical: Arc<RecordingCritical>,
    pub handler: Arc<ScriptedHandler>,
    pub pump: Arc<MessagePump>,
}

impl PumpFixture {
    pub fn new(settings: PumpSettings) -> Self {
        let broker = InMemoryBroker::default();
        let transactional = settings.transaction_mode != TransactionMode::None;
        broker
            .create_queue(&address("input"), transactional)
            .unwrap();
        broker.create_queue(&address("error"), true).unwrap();

        let dispatcher: Arc<dyn MessageDispatcher> =
            Arc::new(BindingDispatcher::new(Arc::new(broker.clone())));
        let critical = Arc::new(RecordingCritical::default());
        let input = broker.queue(&address("input")).unwrap();
        let pump = Arc::new(MessagePump::new(
            "integration",
            input,
            dispatcher.clone(),
            settings,
            critical.clone(),
        ));
        let handler = ScriptedHandler::new();
        handler.observe_failures(pump.failures().clone());

        Self {
            broker,
            dispatcher,
            critical,
            handler,
            pump,
        }
    }

    /// Error policy dead-lettering after the configured attempts
    pub fn policy(&self) -> Arc<dyn ErrorPolicy> {
        Arc::new(DeadLetterPolicy::new(
            self.dispatcher.clone(),
            address("error"),
            self.pump.settings().max_processing_attempts,
        ))
    }

    pub async fn start(&self, concurrency: usize) {
        self.pump
            .initialize(concurrency, self.handler.clone(), self.policy())
            .await
            .unwrap();
        self.pump.start().await.unwrap();
    }

    pub async fn send(&self, body: &str) {
        let message = Message::new(Bytes::from(body.to_string()))
            .with_headers(&Headers::new())
            .unwrap();
        self.input().send(message, None).await.unwrap();
    }

    /// Send a message whose header block cannot be decoded
    pub async fn send_poison(&self, body: &str) {
        let message = Message::new(Bytes::from(body.to_string()))
            .with_extension(Bytes::from_static(b"\x00not a header block"));
        self.input().send(message, None).await.unwrap();
    }

    pub fn input(&self) -> Arc<dyn QueueBinding> {
        self.broker.queue(&address("input")).unwrap()
    }

    pub fn count(&self, queue: &str) -> usize {
        self.broker.message_count(&address(queue))
    }

    pub fn error_bodies(&self) -> Vec<String> {
        self.broker
            .messages(&address("error"))
            .iter()
            .map(|m| String::from_utf8_lossy(&m.body).into_owned())
            .collect()
    }
}
