//! Courier webhook delivery CLI.
//!
//! Loads layered configuration, initializes tracing, and runs one command.
//! Exits non-zero when any delivery fails or the probed endpoint is
//! unreachable.

mod cli;
mod config;

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, warn};

use crate::{
    cli::Cli,
    config::{Config, LogFormat, CONFIG_FILE},
};

/// Exit code used when the process is interrupted.
const INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(|| CONFIG_FILE.into());
    let config = Config::load_from(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path.display()))?;

    init_tracing(&config)?;
    debug!(
        max_attempts = config.max_attempts,
        timeout_ms = config.timeout_ms,
        batch_concurrency = config.batch_concurrency,
        "Configuration loaded"
    );

    tokio::select! {
        outcome = cli::run(cli.command, &config) => {
            let succeeded = outcome?;
            Ok(if succeeded { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        },
        () = shutdown_signal() => {
            warn!("interrupted before completion, results discarded");
            Ok(ExitCode::from(INTERRUPTED))
        },
    }
}

/// Initializes tracing with environment-based configuration.
///
/// Logs go to stderr so stdout carries only command output.
fn init_tracing(config: &Config) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.rust_log))
        .context("Invalid log filter")?;

    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr).with_current_span(true))
            .try_init(),
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init(),
    }
    .context("Failed to initialize tracing")
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => debug!("Received CTRL+C signal"),
        () = terminate => debug!("Received SIGTERM signal"),
    }
}
