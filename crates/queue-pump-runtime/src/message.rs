//! Message types for queue operations including core domain identifiers.

use crate::error::{SerializationError, ValidationError};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

/// Flat string-to-string header mapping carried in a message's extension block
pub type Headers = HashMap<String, String>;

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Machine aliases that always refer to the local machine
const LOCAL_MACHINE_ALIASES: [&str; 3] = [".", "localhost", "127.0.0.1"];

/// Validated queue address in `queue@machine` form.
///
/// The machine part is optional; an address without one refers to the
/// local machine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QueueAddress {
    queue: String,
    machine: Option<String>,
}

impl QueueAddress {
    /// Create new queue address with validation
    pub fn new(queue: impl Into<String>, machine: Option<String>) -> Result<Self, ValidationError> {
        let queue = queue.into();

        // Validate length
        if queue.is_empty() || queue.len() > 124 {
            return Err(ValidationError::OutOfRange {
                field: "queue".to_string(),
                message: "must be 1-124 characters".to_string(),
            });
        }

        // Validate characters (ASCII alphanumeric, hyphens, underscores, periods)
        if !queue
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            return Err(ValidationError::InvalidFormat {
                field: "queue".to_string(),
                message: "only ASCII alphanumeric, hyphens, underscores and periods allowed"
                    .to_string(),
            });
        }

        if queue.starts_with('.') || queue.ends_with('.') {
            return Err(ValidationError::InvalidFormat {
                field: "queue".to_string(),
                message: "no leading or trailing periods".to_string(),
            });
        }

        let machine = match machine {
            Some(m) if m.trim().is_empty() => None,
            Some(m) => {
                if !m
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
                {
                    return Err(ValidationError::InvalidFormat {
                        field: "machine".to_string(),
                        message: "only ASCII alphanumeric, hyphens and periods allowed"
                            .to_string(),
                    });
                }
                Some(m)
            }
            None => None,
        };

        Ok(Self { queue, machine })
    }

    /// Create an address for a queue on the local machine
    pub fn local(queue: impl Into<String>) -> Result<Self, ValidationError> {
        Self::new(queue, None)
    }

    /// Get the queue part of the address
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Get the machine part of the address, if any
    pub fn machine(&self) -> Option<&str> {
        self.machine.as_deref()
    }

    /// Check whether this address refers to a queue on `local_machine`
    pub fn is_local_to(&self, local_machine: &str) -> bool {
        match &self.machine {
            None => true,
            Some(machine) => {
                LOCAL_MACHINE_ALIASES
                    .iter()
                    .any(|alias| machine.eq_ignore_ascii_case(alias))
                    || machine.eq_ignore_ascii_case(local_machine)
            }
        }
    }
}

impl std::fmt::Display for QueueAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.machine {
            Some(machine) => write!(f, "{}@{}", self.queue, machine),
            None => write!(f, "{}", self.queue),
        }
    }
}

impl FromStr for QueueAddress {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('@') {
            Some((queue, machine)) => Self::new(queue, Some(machine.to_string())),
            None => Self::new(s, None),
        }
    }
}

impl TryFrom<String> for QueueAddress {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<QueueAddress> for String {
    fn from(value: QueueAddress) -> Self {
        value.to_string()
    }
}

/// Native identifier assigned to a message by the queue
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate new random message ID
    pub fn new() -> Self {
        let id = uuid::Uuid::new_v4();
        Self(id.to_string())
    }

    /// Get message ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Required {
                field: "message_id".to_string(),
            });
        }

        Ok(Self(s.to_string()))
    }
}

/// Timestamp wrapper for consistent time handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current time
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Create timestamp from DateTime
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S UTC"))
    }
}

impl FromStr for Timestamp {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dt = s.parse::<DateTime<Utc>>()?;
        Ok(Self::from_datetime(dt))
    }
}

// ============================================================================
// Header Block Encoding
// ============================================================================

/// Serialize headers into the extension block carried by a native message
pub fn encode_headers(headers: &Headers) -> Result<Bytes, SerializationError> {
    let encoded = serde_json::to_vec(headers)?;
    Ok(Bytes::from(encoded))
}

/// Extract headers from a native extension block.
///
/// An empty block yields an empty mapping. Anything that is not a flat
/// string-to-string object is rejected.
pub fn decode_headers(extension: &[u8]) -> Result<Headers, SerializationError> {
    if extension.is_empty() {
        return Ok(Headers::new());
    }

    let text = std::str::from_utf8(extension).map_err(|_| SerializationError::InvalidUtf8)?;
    let headers: Headers = serde_json::from_str(text)?;
    Ok(headers)
}

// ============================================================================
// Message Types
// ============================================================================

/// A message to be sent to a queue
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub body: Bytes,
    /// Serialized header block
    pub extension: Bytes,
    pub label: String,
    /// Key used by the queue to drop repeated sends of the same message
    pub deduplication_id: Option<String>,
}

impl Message {
    /// Create new message with body
    pub fn new(body: Bytes) -> Self {
        Self {
            body,
            extension: Bytes::new(),
            label: String::new(),
            deduplication_id: None,
        }
    }

    /// Attach headers, encoding them into the extension block
    pub fn with_headers(mut self, headers: &Headers) -> Result<Self, SerializationError> {
        self.extension = encode_headers(headers)?;
        Ok(self)
    }

    /// Attach a raw extension block as-is
    pub fn with_extension(mut self, extension: Bytes) -> Self {
        self.extension = extension;
        self
    }

    /// Set the message label
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Set the deduplication key
    pub fn with_deduplication_id(mut self, id: impl Into<String>) -> Self {
        self.deduplication_id = Some(id.into());
        self
    }

    /// Total payload size used for size limit checks
    pub fn size(&self) -> usize {
        self.body.len() + self.extension.len()
    }
}

/// A message dequeued from a queue
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedMessage {
    pub message_id: MessageId,
    pub body: Bytes,
    pub extension: Bytes,
    pub label: String,
    /// Number of times this message has been handed out, starting at 1
    pub delivery_count: u32,
    pub arrived_at: Timestamp,
}

impl ReceivedMessage {
    /// Convert back to Message (for forwarding verbatim)
    pub fn message(&self) -> Message {
        Message {
            body: self.body.clone(),
            extension: self.extension.clone(),
            label: self.label.clone(),
            deduplication_id: None,
        }
    }

    /// Extract the header block
    pub fn headers(&self) -> Result<Headers, SerializationError> {
        decode_headers(&self.extension)
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
