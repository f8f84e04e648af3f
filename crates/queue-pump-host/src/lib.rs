//! # Queue-Pump Host
//!
//! Runs a message pump, and optionally the delayed delivery pump with its
//! timeout poller, against an in-memory broker.
//!
//! The binary loads [`HostConfig`], installs logging, builds a [`Host`] and
//! waits for Ctrl+C or SIGTERM before draining the pumps.

pub mod config;
pub mod host;
pub mod telemetry;

pub use config::{HostConfig, HostConfigError, LoggingConfig, CONFIG_FILE_ENV};
pub use host::{Host, HostError, LoggingMessageHandler};
pub use telemetry::{init_tracing, DEFAULT_LOG_FILTER};
