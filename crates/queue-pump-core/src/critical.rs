//! Critical error escalation.
//!
//! Sustained infrastructure failures and failures of the error-handling policy
//! itself are never swallowed. They are reported through a
//! [`CriticalErrorHandler`] supplied by the host, which typically raises an
//! alarm or stops the process.

use tracing::error;

/// Receives critical errors raised by circuit breakers and policy failures.
///
/// Implementations must not panic and must return promptly.
pub trait CriticalErrorHandler: Send + Sync {
    fn raise(&self, description: &str, error: &anyhow::Error);
}

impl<F> CriticalErrorHandler for F
where
    F: Fn(&str, &anyhow::Error) + Send + Sync,
{
    fn raise(&self, description: &str, error: &anyhow::Error) {
        self(description, error)
    }
}

/// Critical error handler that only logs
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingCriticalErrorHandler;

impl CriticalErrorHandler for LoggingCriticalErrorHandler {
    fn raise(&self, description: &str, error: &anyhow::Error) {
        error!(error = %error, "Critical error: {}", description);
    }
}
