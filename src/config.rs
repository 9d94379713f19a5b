//! Configuration for the courier command-line front end.

use std::{path::Path, time::Duration};

use anyhow::{Context, Result};
use courier_delivery::{
    client::default_user_agent, ClientConfig, DeliveryConfig, DEFAULT_RETRY_CODES,
    DEFAULT_SUCCESS_CODES,
};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Default configuration file, read from the working directory when present.
pub const CONFIG_FILE: &str = "courier.toml";

/// Prefix of environment variable overrides.
pub const ENV_PREFIX: &str = "COURIER_";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Complete CLI configuration with defaults, file, and environment
/// overrides.
///
/// Configuration is loaded in priority order:
/// 1. Environment variables prefixed `COURIER_` (highest priority)
/// 2. Configuration file (`courier.toml`)
/// 3. Built-in defaults (lowest priority)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Attempts per delivery.
    ///
    /// Environment variable: `COURIER_MAX_ATTEMPTS`
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Running delay the first backoff grows from, in milliseconds.
    ///
    /// Environment variable: `COURIER_INITIAL_DELAY_MS`
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Backoff cap in milliseconds.
    ///
    /// Environment variable: `COURIER_MAX_DELAY_MS`
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Backoff growth factor.
    ///
    /// Environment variable: `COURIER_BACKOFF_FACTOR`
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    /// Per-attempt timeout in milliseconds.
    ///
    /// Environment variable: `COURIER_TIMEOUT_MS`
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Jitter as a fraction of the initial delay.
    ///
    /// Environment variable: `COURIER_JITTER_FACTOR`
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
    /// Status codes counted as delivered.
    #[serde(default = "default_success_codes")]
    pub success_codes: Vec<u16>,
    /// Client error codes that are retried.
    #[serde(default = "default_retry_codes")]
    pub retry_codes: Vec<u16>,
    /// Deliveries a batch runs at once.
    ///
    /// Environment variable: `COURIER_BATCH_CONCURRENCY`
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,
    /// Endpoint probe timeout in milliseconds.
    ///
    /// Environment variable: `COURIER_PROBE_TIMEOUT_MS`
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Service name used in the user agent.
    ///
    /// Environment variable: `COURIER_SERVICE_NAME`
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// Log output format.
    ///
    /// Environment variable: `COURIER_LOG_FORMAT`
    #[serde(default)]
    pub log_format: LogFormat,
    /// Log filter used when `RUST_LOG` is unset.
    ///
    /// Environment variable: `COURIER_RUST_LOG`
    #[serde(default = "default_log_filter")]
    pub rust_log: String,
}

impl Config {
    /// Loads configuration from defaults, `courier.toml`, and environment.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    /// Loads configuration using `path` as the configuration file.
    ///
    /// A missing file is not an error.
    pub fn load_from(path: &Path) -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX));

        let config: Self = figment.extract().context("Failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Converts to the delivery engine configuration.
    pub fn to_delivery_config(&self) -> DeliveryConfig {
        DeliveryConfig {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff_factor: self.backoff_factor,
            timeout: Duration::from_millis(self.timeout_ms),
            success_codes: self.success_codes.iter().copied().collect(),
            retry_codes: self.retry_codes.iter().copied().collect(),
            jitter_factor: self.jitter_factor,
        }
    }

    /// Converts to HTTP client configuration.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig { user_agent: default_user_agent(&self.service_name), ..ClientConfig::default() }
    }

    /// Probe timeout as a duration.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Validates configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.batch_concurrency == 0 {
            anyhow::bail!("batch_concurrency must be greater than 0");
        }

        if self.probe_timeout_ms == 0 {
            anyhow::bail!("probe_timeout_ms must be greater than 0");
        }

        if self.service_name.trim().is_empty() {
            anyhow::bail!("service_name must not be empty");
        }

        self.to_delivery_config().validate().context("Invalid delivery settings")?;

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_factor: default_backoff_factor(),
            timeout_ms: default_timeout_ms(),
            jitter_factor: default_jitter_factor(),
            success_codes: default_success_codes(),
            retry_codes: default_retry_codes(),
            batch_concurrency: default_batch_concurrency(),
            probe_timeout_ms: default_probe_timeout_ms(),
            service_name: default_service_name(),
            log_format: LogFormat::default(),
            rust_log: default_log_filter(),
        }
    }
}

fn default_max_attempts() -> u32 {
    courier_delivery::DEFAULT_MAX_ATTEMPTS
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    300_000
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_timeout_ms() -> u64 {
    courier_delivery::DEFAULT_TIMEOUT_MS
}

fn default_jitter_factor() -> f64 {
    0.1
}

fn default_success_codes() -> Vec<u16> {
    DEFAULT_SUCCESS_CODES.to_vec()
}

fn default_retry_codes() -> Vec<u16> {
    DEFAULT_RETRY_CODES.to_vec()
}

fn default_batch_concurrency() -> usize {
    courier_delivery::DEFAULT_BATCH_CONCURRENCY
}

fn default_probe_timeout_ms() -> u64 {
    5_000
}

fn default_service_name() -> String {
    "courier".to_string()
}

fn default_log_filter() -> String {
    "info,courier=debug".to_string()
}
