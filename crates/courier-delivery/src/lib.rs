//! Webhook delivery engine.
//!
//! Delivers JSON payloads to HTTP endpoints with retries:
//!
//! - [`DeliveryClient`] performs single attempts and endpoint probes
//! - [`classify`] maps each response to success, retry or terminal
//! - [`BackoffScheduler`] spaces retries with capped exponential backoff
//! - [`DeliveryOrchestrator`] drives one delivery to a final result
//! - [`BatchCoordinator`] fans many deliveries out in bounded rounds
//!
//! Delivery never returns `Err` for remote failures. Every attempt is
//! recorded on the [`DeliveryResult`] and reported to the configured
//! [`courier_core::EventHandler`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod batch;
pub mod classify;
pub mod client;
pub mod config;
pub mod error;
pub mod instrument;
pub mod orchestrator;
pub mod result;
pub mod retry;

pub use batch::BatchCoordinator;
pub use classify::{classify, AttemptClass};
pub use client::{
    AttemptExecutor, AttemptRequest, ClientConfig, DeliveryClient, ProbeResult,
    DEFAULT_PROBE_TIMEOUT,
};
pub use config::{DeliveryConfig, DEFAULT_RETRY_CODES, DEFAULT_SUCCESS_CODES};
pub use error::{DeliveryError, ErrorCategory, Result};
pub use orchestrator::{DeliveryOrchestrator, DeliveryRequest, DeliveryStats};
pub use result::{Attempt, DeliveryResult, DeliveryState, ResponseBody};
pub use retry::BackoffScheduler;

/// Default attempts per delivery.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default per-attempt timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Default number of deliveries a batch runs at once.
pub const DEFAULT_BATCH_CONCURRENCY: usize = 5;
