//! Timeout poller: wakes when the earliest stored timeout falls due and
//! dispatches everything that is due.
//!
//! The poller only schedules. Items are removed from storage after they were
//! dispatched; a failed dispatch leaves the item for the next wake-up, so
//! delivery is at-least-once. Storage failures feed a dedicated circuit
//! breaker that escalates sustained outages.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::circuit_breaker::{
    timeout_storage_circuit_breaker_config, CircuitBreaker, RepeatedFailuresCircuitBreaker,
};
use crate::clock::Clock;
use crate::critical::CriticalErrorHandler;
use crate::dispatch::MessageDispatcher;
use crate::error::TimeoutStoreError;
use crate::transaction::TransportTransaction;

use super::store::TimeoutStore;

#[cfg(test)]
#[path = "poller_tests.rs"]
mod tests;

/// Wait before retrying items whose dispatch failed
const FAILED_DISPATCH_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Result of one pass over the due timeouts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub dispatched: usize,
    pub failed: usize,
}

pub struct TimeoutPoller {
    store: Arc<dyn TimeoutStore>,
    dispatcher: Arc<dyn MessageDispatcher>,
    clock: Arc<dyn Clock>,
    breaker: RepeatedFailuresCircuitBreaker,
    max_sleep: Duration,
    wake: Notify,
    next_wake: Mutex<Option<DateTime<Utc>>>,
}

impl TimeoutPoller {
    pub fn new(
        store: Arc<dyn TimeoutStore>,
        dispatcher: Arc<dyn MessageDispatcher>,
        clock: Arc<dyn Clock>,
        critical: Arc<dyn CriticalErrorHandler>,
        max_sleep: Duration,
    ) -> Self {
        Self {
            store,
            dispatcher,
            clock,
            breaker: RepeatedFailuresCircuitBreaker::new(
                timeout_storage_circuit_breaker_config(),
                critical,
            ),
            max_sleep,
            wake: Notify::new(),
            next_wake: Mutex::new(None),
        }
    }

    pub fn breaker(&self) -> &RepeatedFailuresCircuitBreaker {
        &self.breaker
    }

    /// Tell the poller a timeout is due at `due`.
    ///
    /// Wakes the poller only when `due` is earlier than its planned wake-up.
    /// While a pass is running there is no planned wake-up, so the
    /// notification is kept and the pass is followed by another.
    pub fn notify(&self, due: DateTime<Utc>) {
        let mut next_wake = self
            .next_wake
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if next_wake.map_or(true, |planned| due < planned) {
            *next_wake = Some(due);
            self.wake.notify_one();
        }
    }

    fn set_next_wake(&self, at: Option<DateTime<Utc>>) {
        *self
            .next_wake
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = at;
    }

    /// Dispatch every item that is due now and remove the ones that went out
    pub async fn dispatch_due(&self) -> Result<PollSummary, TimeoutStoreError> {
        let now = self.clock.now();
        let due = self.store.fetch_due(now).await?;
        let mut summary = PollSummary::default();

        for item in due {
            let result = self
                .dispatcher
                .dispatch(vec![item.to_operation()], &TransportTransaction::None)
                .await;

            match result {
                Ok(()) => {
                    self.store.remove(&item.id).await?;
                    summary.dispatched += 1;
                    debug!(
                        timeout_id = %item.id,
                        destination = %item.destination,
                        "Dispatched due timeout"
                    );
                }
                Err(e) => {
                    summary.failed += 1;
                    warn!(
                        timeout_id = %item.id,
                        destination = %item.destination,
                        error = %e,
                        "Failed to dispatch due timeout, keeping it for the next attempt"
                    );
                }
            }
        }

        Ok(summary)
    }

    /// How long to sleep before the next pass
    async fn sleep_duration(&self, summary: PollSummary) -> Result<Duration, TimeoutStoreError> {
        let next_due = self.store.next_due().await?;
        let until_due = match next_due {
            Some(due) => (due - self.clock.now()).to_std().unwrap_or(Duration::ZERO),
            None => self.max_sleep,
        };

        let mut sleep = until_due.min(self.max_sleep);
        if summary.failed > 0 {
            sleep = sleep.max(FAILED_DISPATCH_RETRY_DELAY.min(self.max_sleep));
        }
        Ok(sleep)
    }

    async fn poll_once(&self) -> Result<Duration, TimeoutStoreError> {
        let summary = self.dispatch_due().await?;
        if summary.dispatched > 0 {
            info!(
                dispatched = summary.dispatched,
                failed = summary.failed,
                "Dispatched due timeouts"
            );
        }
        self.sleep_duration(summary).await
    }

    /// Poll until `cancellation` fires
    pub async fn run(&self, cancellation: CancellationToken) {
        info!(max_sleep = ?self.max_sleep, "Timeout poller started");

        loop {
            self.set_next_wake(None);

            let sleep = match self.poll_once().await {
                Ok(sleep) => {
                    self.breaker.success();
                    sleep
                }
                Err(e) => {
                    warn!(error = %e, "Timeout storage failed");
                    let error = anyhow::Error::new(e);
                    tokio::select! {
                        _ = cancellation.cancelled() => break,
                        _ = self.breaker.failure(&error) => {}
                    }
                    continue;
                }
            };

            let planned = chrono::Duration::from_std(sleep)
                .ok()
                .and_then(|s| self.clock.now().checked_add_signed(s));
            self.set_next_wake(planned);

            tokio::select! {
                _ = cancellation.cancelled() => break,
                _ = self.wake.notified() => debug!("Timeout poller woken early"),
                _ = tokio::time::sleep(sleep) => {}
            }
        }

        info!("Timeout poller stopped");
    }
}
