//! Message pump: peek loop, bounded concurrency and lifecycle.
//!
//! The pump runs one polling task per instance. Each successful peek acquires
//! a token from the concurrency pool and spawns one receive cycle that holds
//! the token until it finishes. Peek and receive failures feed two separate
//! circuit breakers.
//!
//! Shutdown stops the polling task first and then waits for the pool to
//! return to full size. In-flight work is never aborted; a caller-supplied
//! cancellation token is forwarded to it so handlers can stop cooperatively.

use queue_pump_runtime::{PeekOutcome, QueueAddress, QueueBinding};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::sync::{AcquireError, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::circuit_breaker::{
    peek_circuit_breaker_config, receive_circuit_breaker_config, CircuitBreaker, CircuitMetrics,
    RepeatedFailuresCircuitBreaker,
};
use crate::config::PumpSettings;
use crate::critical::CriticalErrorHandler;
use crate::dispatch::MessageDispatcher;
use crate::error::PumpError;
use crate::failure_info::FailureInfoStorage;
use crate::processing::{ErrorPolicy, MessageHandler};
use crate::receive::{create_strategy, ReceivePipeline, ReceiveStrategy};

#[cfg(test)]
#[path = "pump_tests.rs"]
mod tests;

/// Largest concurrency limit a pump accepts.
///
/// Bounded by both the `u32` permit count of a drain and the semaphore's own
/// limit, which is smaller on 32-bit targets.
pub const MAX_CONCURRENCY: usize = if Semaphore::MAX_PERMITS < u32::MAX as usize {
    Semaphore::MAX_PERMITS
} else {
    u32::MAX as usize
};

// ============================================================================
// Concurrency Pool
// ============================================================================

/// Fixed-size token pool bounding concurrent receive cycles
struct ConcurrencyPool {
    semaphore: Arc<Semaphore>,
    size: u32,
}

impl ConcurrencyPool {
    fn new(size: u32) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(size as usize)),
            size,
        }
    }

    /// Wait until every token has been returned
    async fn drain(&self) -> Result<(), AcquireError> {
        let _all = self.semaphore.acquire_many(self.size).await?;
        Ok(())
    }
}

fn validate_limit(limit: usize) -> Result<u32, PumpError> {
    u32::try_from(limit)
        .ok()
        .filter(|l| *l > 0 && limit <= MAX_CONCURRENCY)
        .ok_or(PumpError::InvalidConcurrency {
            limit,
            max: MAX_CONCURRENCY,
        })
}

// ============================================================================
// Pump State
// ============================================================================

struct Running {
    /// Stops the polling task
    stop: CancellationToken,
    /// Observed by in-flight receive cycles
    processing: CancellationToken,
    poller: JoinHandle<()>,
    peek_breaker: RepeatedFailuresCircuitBreaker,
    receive_breaker: RepeatedFailuresCircuitBreaker,
}

struct PumpInner {
    id: String,
    input: Arc<dyn QueueBinding>,
    dispatcher: Arc<dyn MessageDispatcher>,
    settings: PumpSettings,
    critical: Arc<dyn CriticalErrorHandler>,
    failures: Arc<FailureInfoStorage>,
    pool: Mutex<ConcurrencyPool>,
    strategy: StdMutex<Option<Arc<dyn ReceiveStrategy>>>,
    running: Mutex<Option<Running>>,
}

impl PumpInner {
    /// Acquire a token from the current pool.
    ///
    /// Holding the pool lock while waiting keeps a concurrency change from
    /// swapping pools until this token is granted.
    async fn acquire(&self) -> Result<OwnedSemaphorePermit, AcquireError> {
        let pool = self.pool.lock().await;
        pool.semaphore.clone().acquire_owned().await
    }
}

// ============================================================================
// Message Pump
// ============================================================================

/// Pumps messages from one input queue to a handler
pub struct MessagePump {
    inner: Arc<PumpInner>,
}

impl MessagePump {
    pub fn new(
        id: impl Into<String>,
        input: Arc<dyn QueueBinding>,
        dispatcher: Arc<dyn MessageDispatcher>,
        settings: PumpSettings,
        critical: Arc<dyn CriticalErrorHandler>,
    ) -> Self {
        let failures = Arc::new(FailureInfoStorage::new(settings.failure_cache_capacity));
        Self {
            inner: Arc::new(PumpInner {
                id: id.into(),
                input,
                dispatcher,
                settings,
                critical,
                failures,
                pool: Mutex::new(ConcurrencyPool::new(1)),
                strategy: StdMutex::new(None),
                running: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn input_address(&self) -> &QueueAddress {
        self.inner.input.address()
    }

    pub fn settings(&self) -> &PumpSettings {
        &self.inner.settings
    }

    /// Failure records shared by every receive cycle of this pump
    pub fn failures(&self) -> &Arc<FailureInfoStorage> {
        &self.inner.failures
    }

    /// Validate the input queue and prepare the receive strategy.
    ///
    /// Fails when the queue is remote, when the transaction mode needs a
    /// transactional queue and the queue is not, or when the settings are
    /// inconsistent. None of these failures are worth retrying.
    pub async fn initialize(
        &self,
        concurrency_limit: usize,
        handler: Arc<dyn MessageHandler>,
        policy: Arc<dyn ErrorPolicy>,
    ) -> Result<(), PumpError> {
        let inner = &self.inner;
        let limit = validate_limit(concurrency_limit)?;
        inner.settings.validate()?;

        let input = &inner.input;
        if !input.is_local() {
            return Err(PumpError::QueueNotLocal {
                address: input.address().to_string(),
            });
        }

        let mode = inner.settings.transaction_mode;
        if mode.requires_transactional_queue() && !input.is_transactional() {
            return Err(PumpError::QueueNotTransactional {
                address: input.address().to_string(),
                mode,
            });
        }

        let pipeline = ReceivePipeline {
            input: Arc::clone(input),
            error_queue: inner.settings.error_queue_address()?,
            dispatcher: Arc::clone(&inner.dispatcher),
            failures: Arc::clone(&inner.failures),
            handler,
            policy,
            critical: Arc::clone(&inner.critical),
            receive_timeout: inner.settings.receive_timeout(),
        };
        let strategy = create_strategy(mode, pipeline, inner.settings.transaction_scope_timeout());

        *inner.strategy.lock().unwrap_or_else(PoisonError::into_inner) = Some(strategy);
        *inner.pool.lock().await = ConcurrencyPool::new(limit);

        info!(
            pump = %inner.id,
            queue = %input.address(),
            transaction_mode = %mode,
            concurrency = limit,
            "Message pump initialized"
        );
        Ok(())
    }

    /// Start the polling task; returns once it has been launched
    pub async fn start(&self) -> Result<(), PumpError> {
        let inner = &self.inner;
        let strategy = inner
            .strategy
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(PumpError::NotInitialized)?;

        let mut running = inner.running.lock().await;
        if running.is_some() {
            return Err(PumpError::AlreadyRunning);
        }

        if inner.settings.purge_on_startup {
            let purged = inner.input.purge().await?;
            warn!(
                pump = %inner.id,
                queue = %inner.input.address(),
                purged,
                "Purged input queue on startup"
            );
        }

        let peek_breaker = RepeatedFailuresCircuitBreaker::new(
            peek_circuit_breaker_config(&inner.settings),
            Arc::clone(&inner.critical),
        );
        let receive_breaker = RepeatedFailuresCircuitBreaker::new(
            receive_circuit_breaker_config(&inner.settings),
            Arc::clone(&inner.critical),
        );

        let stop = CancellationToken::new();
        let processing = CancellationToken::new();
        let poller = tokio::spawn(poll_loop(
            Arc::clone(inner),
            strategy,
            peek_breaker.clone(),
            receive_breaker.clone(),
            stop.clone(),
            processing.clone(),
        ));

        *running = Some(Running {
            stop,
            processing,
            poller,
            peek_breaker,
            receive_breaker,
        });

        info!(pump = %inner.id, queue = %inner.input.address(), "Message pump started");
        Ok(())
    }

    /// Check if the polling task is running
    pub async fn is_running(&self) -> bool {
        self.inner.running.lock().await.is_some()
    }

    /// Peek breaker metrics while the pump is running
    pub async fn peek_circuit_metrics(&self) -> Option<CircuitMetrics> {
        let running = self.inner.running.lock().await;
        running.as_ref().map(|r| r.peek_breaker.metrics())
    }

    /// Receive breaker metrics while the pump is running
    pub async fn receive_circuit_metrics(&self) -> Option<CircuitMetrics> {
        let running = self.inner.running.lock().await;
        running.as_ref().map(|r| r.receive_breaker.metrics())
    }

    /// Replace the concurrency pool.
    ///
    /// Tokens held from the old pool stay valid, but no new tokens are
    /// granted until all of them have been returned.
    pub async fn change_concurrency(&self, new_limit: usize) -> Result<(), PumpError> {
        let limit = validate_limit(new_limit)?;

        let mut pool = self.inner.pool.lock().await;
        let old = std::mem::replace(&mut *pool, ConcurrencyPool::new(limit));

        if old.drain().await.is_err() {
            debug!(pump = %self.inner.id, "Previous concurrency pool was closed");
        }
        old.semaphore.close();

        info!(
            pump = %self.inner.id,
            old_limit = old.size,
            new_limit = limit,
            "Concurrency limit changed"
        );
        Ok(())
    }

    /// Stop receiving and wait for in-flight processing to finish.
    ///
    /// With no `cancellation` token this waits for in-flight handlers to
    /// complete on their own, however long that takes. When the token fires,
    /// in-flight handlers are asked to stop through their cancellation token
    /// and the drain continues until they return.
    pub async fn stop_receive(&self, cancellation: Option<CancellationToken>) {
        let inner = &self.inner;
        let Some(running) = inner.running.lock().await.take() else {
            return;
        };

        running.stop.cancel();
        if let Err(e) = running.poller.await {
            error!(pump = %inner.id, error = %e, "Polling task failed");
        }

        // A concurrency change may hold the pool while it drains, so the
        // signal is watched from the moment the lock is requested
        let drain = async {
            let pool = inner.pool.lock().await;
            let drained = pool.drain().await;
            drained
        };
        tokio::pin!(drain);

        let drained = match cancellation {
            Some(signal) => {
                tokio::select! {
                    result = &mut drain => result,
                    _ = signal.cancelled() => {
                        info!(pump = %inner.id, "Cancelling in-flight message processing");
                        running.processing.cancel();
                        drain.await
                    }
                }
            }
            None => drain.await,
        };

        if drained.is_err() {
            warn!(pump = %inner.id, "Concurrency pool closed while draining");
        }

        info!(pump = %inner.id, queue = %inner.input.address(), "Message pump stopped");
    }
}

// ============================================================================
// Polling Loop
// ============================================================================

async fn poll_loop(
    inner: Arc<PumpInner>,
    strategy: Arc<dyn ReceiveStrategy>,
    peek_breaker: RepeatedFailuresCircuitBreaker,
    receive_breaker: RepeatedFailuresCircuitBreaker,
    stop: CancellationToken,
    processing: CancellationToken,
) {
    let peek_timeout = inner.settings.peek_timeout();

    loop {
        let peeked = tokio::select! {
            _ = stop.cancelled() => break,
            result = inner.input.peek(peek_timeout) => result,
        };

        match peeked {
            Ok(PeekOutcome::Empty) => continue,
            Ok(PeekOutcome::Available) => peek_breaker.success(),
            Err(e) => {
                warn!(
                    pump = %inner.id,
                    queue = %inner.input.address(),
                    error = %e,
                    "Failed to peek input queue"
                );
                let error = anyhow::Error::new(e);
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = peek_breaker.failure(&error) => continue,
                }
            }
        }

        let permit = tokio::select! {
            _ = stop.cancelled() => break,
            permit = inner.acquire() => permit,
        };
        let Ok(permit) = permit else {
            // The pool was closed under us; the next iteration uses the new one
            continue;
        };

        let strategy = Arc::clone(&strategy);
        let breaker = receive_breaker.clone();
        let token = processing.clone();
        let pump_id = inner.id.clone();

        tokio::spawn(async move {
            let _permit = permit;
            match strategy.receive_message(&token).await {
                Ok(outcome) => {
                    breaker.success();
                    debug!(pump = %pump_id, outcome = ?outcome, "Receive cycle finished");
                }
                Err(e) => {
                    warn!(pump = %pump_id, error = %e, "Receive cycle failed");
                    breaker.failure(&anyhow::Error::new(e)).await;
                }
            }
        });
    }

    debug!(pump = %inner.id, "Polling loop stopped");
}
