//! Reserved transport header names and helpers.
//!
//! Transport metadata shares the flat header mapping with application
//! headers. Every transport header starts with [`RESERVED_PREFIX`]; application
//! code must not use that prefix.

use chrono::{DateTime, SecondsFormat, Utc};
use queue_pump_runtime::{Headers, QueueAddress};

use crate::error::HeaderError;

#[cfg(test)]
#[path = "headers_tests.rs"]
mod tests;

pub const RESERVED_PREFIX: &str = "QueuePump.";

/// Logical message id stamped by the dispatcher
pub const MESSAGE_ID: &str = "QueuePump.MessageId";

pub const TIMEOUT_DESTINATION: &str = "QueuePump.Timeout.Destination";
pub const TIMEOUT_DUE_UTC: &str = "QueuePump.Timeout.DueUtc";

pub const EXCEPTION_MESSAGE: &str = "QueuePump.ExceptionInfo.Message";
pub const EXCEPTION_ROOT_CAUSE: &str = "QueuePump.ExceptionInfo.RootCause";
pub const EXCEPTION_STACK_TRACE: &str = "QueuePump.ExceptionInfo.StackTrace";
pub const FAILED_QUEUE: &str = "QueuePump.FailedQ";
pub const TIME_OF_FAILURE: &str = "QueuePump.TimeOfFailure";
pub const PROCESSING_ATTEMPTS: &str = "QueuePump.ProcessingAttempts";

/// Check if a header key belongs to the transport
pub fn is_reserved(key: &str) -> bool {
    key.starts_with(RESERVED_PREFIX)
}

/// Format a UTC time as an RFC 3339 header value
pub fn format_utc(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 header value into UTC
pub fn parse_utc(key: &str, value: &str) -> Result<DateTime<Utc>, HeaderError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| HeaderError::Invalid {
            key: key.to_string(),
            message: e.to_string(),
        })
}

fn required<'a>(headers: &'a Headers, key: &str) -> Result<&'a str, HeaderError> {
    headers
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| HeaderError::Missing {
            key: key.to_string(),
        })
}

// ============================================================================
// Timeout Headers
// ============================================================================

/// Destination and due time of a deferred message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutHeaders {
    pub destination: QueueAddress,
    pub due: DateTime<Utc>,
}

impl TimeoutHeaders {
    /// Read the timeout headers from a message
    pub fn extract(headers: &Headers) -> Result<Self, HeaderError> {
        let destination = required(headers, TIMEOUT_DESTINATION)?
            .parse::<QueueAddress>()
            .map_err(|e| HeaderError::Invalid {
                key: TIMEOUT_DESTINATION.to_string(),
                message: e.to_string(),
            })?;
        let due = parse_utc(TIMEOUT_DUE_UTC, required(headers, TIMEOUT_DUE_UTC)?)?;

        Ok(Self { destination, due })
    }

    /// Write the timeout headers into `headers`
    pub fn apply(&self, headers: &mut Headers) {
        headers.insert(TIMEOUT_DESTINATION.to_string(), self.destination.to_string());
        headers.insert(TIMEOUT_DUE_UTC.to_string(), format_utc(self.due));
    }

    /// Remove the timeout headers, leaving every other header untouched
    pub fn strip(headers: &mut Headers) {
        headers.remove(TIMEOUT_DESTINATION);
        headers.remove(TIMEOUT_DUE_UTC);
    }
}
