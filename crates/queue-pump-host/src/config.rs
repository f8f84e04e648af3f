//! Host configuration.
//!
//! Sources are applied in order, later sources overriding earlier ones:
//!
//! 1. `/etc/queue-pump/host.yaml`: system-wide defaults
//! 2. `./config/host.yaml`: deployment-local override
//! 3. An explicit file from `--config` or `QP_CONFIG_FILE`
//! 4. Environment variables prefixed `QP__` with `__` separators, e.g.
//!    `QP__CONCURRENCY=8` or `QP__PUMP__ERROR_QUEUE=failed`
//!
//! Every field is defaulted, so a host without any configuration runs with
//! built-in values. A malformed file or an environment variable of the wrong
//! type is a hard error.

use queue_pump_core::{DelayedDeliverySettings, PumpError, PumpSettings};
use queue_pump_runtime::{InMemoryConfig, QueueAddress};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

/// Environment variable naming an explicit configuration file
pub const CONFIG_FILE_ENV: &str = "QP_CONFIG_FILE";

/// Prefix for configuration environment variables
pub const ENV_PREFIX: &str = "QP";

#[derive(Debug, Error)]
pub enum HostConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Invalid pump configuration: {0}")]
    Pump(#[from] PumpError),
}

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Emit JSON log lines instead of human-readable text
    pub json: bool,
}

/// Complete host configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Queue the main pump receives from
    pub input_queue: String,

    /// Concurrency limit of the main pump
    pub concurrency: usize,

    /// Settings shared by the main and delayed delivery pumps
    pub pump: PumpSettings,

    /// Run the delayed delivery pump and timeout poller
    pub enable_delayed_delivery: bool,

    /// Concurrency limit of the delayed delivery pump
    pub delayed_delivery_concurrency: usize,

    pub delayed_delivery: DelayedDeliverySettings,

    /// Broker limits
    pub broker: InMemoryConfig,

    pub logging: LoggingConfig,

    /// Time to wait for in-flight messages on shutdown before asking them to
    /// stop. Unset means wait for as long as processing takes.
    pub shutdown_timeout_seconds: Option<u64>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            input_queue: "input".to_string(),
            concurrency: 4,
            pump: PumpSettings::default(),
            enable_delayed_delivery: true,
            delayed_delivery_concurrency: 1,
            delayed_delivery: DelayedDeliverySettings::default(),
            broker: InMemoryConfig::default(),
            logging: LoggingConfig::default(),
            shutdown_timeout_seconds: Some(30),
        }
    }
}

impl HostConfig {
    /// Load configuration from files and the environment.
    ///
    /// `explicit` takes precedence over `QP_CONFIG_FILE`. An explicit file
    /// must exist; the well-known locations are optional.
    pub fn load(explicit: Option<&Path>) -> Result<Self, HostConfigError> {
        let mut builder = config::Config::builder()
            .add_source(
                config::File::with_name("/etc/queue-pump/host")
                    .required(false)
                    .format(config::FileFormat::Yaml),
            )
            .add_source(
                config::File::with_name("config/host")
                    .required(false)
                    .format(config::FileFormat::Yaml),
            );

        let from_env = std::env::var(CONFIG_FILE_ENV)
            .ok()
            .filter(|path| !path.is_empty());
        let explicit = explicit
            .map(|p| p.to_string_lossy().into_owned())
            .or(from_env);

        if let Some(path) = explicit {
            info!(path = %path, "Loading configuration from explicit path");
            builder = builder.add_source(
                config::File::with_name(&path)
                    .required(true)
                    .format(config::FileFormat::Yaml),
            );
        }

        let config: HostConfig = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the host cannot run with
    pub fn validate(&self) -> Result<(), HostConfigError> {
        self.input_address()?;
        self.pump.validate()?;

        if self.concurrency == 0 {
            return Err(HostConfigError::Invalid {
                message: "concurrency must be greater than zero".to_string(),
            });
        }

        if self.enable_delayed_delivery {
            self.delayed_delivery.timeouts_queue_address()?;
            if self.delayed_delivery_concurrency == 0 {
                return Err(HostConfigError::Invalid {
                    message: "delayed_delivery_concurrency must be greater than zero".to_string(),
                });
            }
            if self.delayed_delivery.poller_max_sleep_seconds == 0 {
                return Err(HostConfigError::Invalid {
                    message: "delayed_delivery.poller_max_sleep_seconds must be greater than zero"
                        .to_string(),
                });
            }
        }

        Ok(())
    }

    pub fn input_address(&self) -> Result<QueueAddress, HostConfigError> {
        self.input_queue
            .parse()
            .map_err(|e| HostConfigError::Invalid {
                message: format!("input_queue '{}': {}", self.input_queue, e),
            })
    }

    pub fn shutdown_timeout(&self) -> Option<Duration> {
        self.shutdown_timeout_seconds.map(Duration::from_secs)
    }
}
