//! Per-orchestrator delivery configuration.
//!
//! A `DeliveryConfig` is immutable once handed to an orchestrator. Updates
//! replace the whole value; a delivery keeps the snapshot it started with.

use std::{collections::BTreeSet, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::{DeliveryError, Result};

/// Status codes treated as success unless overridden.
pub const DEFAULT_SUCCESS_CODES: [u16; 4] = [200, 201, 202, 204];

/// Status codes treated as retryable unless overridden.
pub const DEFAULT_RETRY_CODES: [u16; 11] =
    [408, 429, 500, 502, 503, 504, 520, 521, 522, 523, 524];

/// Retry, backoff and timeout settings for webhook delivery.
///
/// Defaults: 5 attempts, 1s initial delay, 300s maximum delay, factor 2,
/// 30s per-attempt timeout and ±10% jitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,

    /// Starting value of the running backoff delay.
    pub initial_delay: Duration,

    /// Cap applied to the backoff delay before jitter.
    pub max_delay: Duration,

    /// Multiplier applied to the running delay after every retry.
    pub backoff_factor: f64,

    /// Hard timeout for a single HTTP attempt.
    pub timeout: Duration,

    /// Status codes that complete a delivery successfully.
    pub success_codes: BTreeSet<u16>,

    /// 4xx status codes that are retried instead of failing terminally.
    pub retry_codes: BTreeSet<u16>,

    /// Jitter range as a fraction (0.0 to 1.0) of `initial_delay`.
    pub jitter_factor: f64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: crate::DEFAULT_MAX_ATTEMPTS,
            initial_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(300_000),
            backoff_factor: 2.0,
            timeout: Duration::from_millis(crate::DEFAULT_TIMEOUT_MS),
            success_codes: DEFAULT_SUCCESS_CODES.into_iter().collect(),
            retry_codes: DEFAULT_RETRY_CODES.into_iter().collect(),
            jitter_factor: 0.1,
        }
    }
}

impl DeliveryConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` describing the first
    /// violated constraint.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(DeliveryError::configuration("max_attempts must be at least 1"));
        }

        if self.initial_delay > self.max_delay {
            return Err(DeliveryError::configuration(format!(
                "initial_delay ({}ms) cannot exceed max_delay ({}ms)",
                self.initial_delay.as_millis(),
                self.max_delay.as_millis()
            )));
        }

        if !self.backoff_factor.is_finite() || self.backoff_factor <= 1.0 {
            return Err(DeliveryError::configuration(format!(
                "backoff_factor must be a finite number greater than 1, got {}",
                self.backoff_factor
            )));
        }

        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(DeliveryError::configuration(format!(
                "jitter_factor must be between 0.0 and 1.0, got {}",
                self.jitter_factor
            )));
        }

        if self.timeout.is_zero() {
            return Err(DeliveryError::configuration("timeout must be greater than zero"));
        }

        if self.success_codes.is_empty() {
            return Err(DeliveryError::configuration("success_codes must not be empty"));
        }

        if let Some(code) =
            self.success_codes.iter().chain(&self.retry_codes).find(|code| !(100..=599).contains(*code))
        {
            return Err(DeliveryError::configuration(format!(
                "status code {code} is outside the HTTP range 100-599"
            )));
        }

        if let Some(code) = self.success_codes.intersection(&self.retry_codes).next() {
            return Err(DeliveryError::configuration(format!(
                "status code {code} cannot be both a success and a retry code"
            )));
        }

        Ok(())
    }

    /// Returns a copy with a different attempt budget.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Returns a copy with different backoff delays.
    pub fn with_delays(mut self, initial_delay: Duration, max_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self.max_delay = max_delay;
        self
    }

    /// Returns a copy with a different per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns a copy with a different jitter factor.
    pub fn with_jitter_factor(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor;
        self
    }

    /// Returns a copy with a different success code set.
    pub fn with_success_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.success_codes = codes.into_iter().collect();
        self
    }

    /// Returns a copy with a different retry code set.
    pub fn with_retry_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.retry_codes = codes.into_iter().collect();
        self
    }

    /// Largest symmetric jitter offset the scheduler may add.
    pub fn jitter_range(&self) -> Duration {
        let factor = self.jitter_factor.clamp(0.0, 1.0);
        Duration::try_from_secs_f64(self.initial_delay.as_secs_f64() * factor)
            .unwrap_or(self.initial_delay)
    }
}
