//! # Queue-Pump Host
//!
//! Binary entry point: loads configuration, initialises logging, starts the
//! pumps and drains them on shutdown.

use clap::Parser;
use queue_pump_core::LoggingCriticalErrorHandler;
use queue_pump_host::{init_tracing, Host, HostConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// Queue-Pump host - reliable message pumping on an in-memory broker
#[derive(Parser)]
#[command(name = "queue-pump-host")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Runs Queue-Pump message pumps")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "QP_CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Enable JSON logging, overriding the configuration file
    #[arg(long)]
    json_logs: bool,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C), shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match HostConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(3);
        }
    };

    if let Err(e) = init_tracing(cli.json_logs || config.logging.json) {
        eprintln!("Failed to initialise logging: {}", e);
    }

    if cli.check {
        info!("Configuration is valid");
        return;
    }

    info!("Starting Queue-Pump host");

    let host = match Host::build(config, Arc::new(LoggingCriticalErrorHandler)).await {
        Ok(host) => host,
        Err(e) => {
            error!(error = %e, "Failed to build host");
            std::process::exit(1);
        }
    };

    if let Err(e) = host.start().await {
        error!(error = %e, "Failed to start host");
        std::process::exit(2);
    }

    shutdown_signal().await;
    host.shutdown().await;
}
