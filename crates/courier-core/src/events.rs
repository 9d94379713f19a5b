//! Observability events for decoupled metrics integration.
//!
//! The delivery engine reports what happened through `DeliveryEvent`s and
//! never learns who is listening. Metrics exporters, audit sinks and test
//! recorders implement `EventHandler`.
//!
//! # Event Flow
//!
//! ```text
//!                 AttemptCompleted / DeliveryCompleted
//! ┌──────────────────────┐    ComplianceViolation   ┌────────────────────┐
//! │ DeliveryOrchestrator │ ───────────────────────▶ │ MulticastHandler   │
//! │ (Producer)           │                          │ (Event Dispatcher) │
//! └──────────────────────┘                          └────────────────────┘
//!                                                             │
//!                                              ┌──────────────┴────────────┐
//!                                              ▼                           ▼
//!                                   ┌────────────────────┐     ┌────────────────────┐
//!                                   │ TracingEventHandler│     │ Metrics exporter   │
//!                                   └────────────────────┘     └────────────────────┘
//! ```

use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::models::DeliveryId;

/// Events emitted by the delivery engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeliveryEvent {
    /// One HTTP attempt finished.
    AttemptCompleted(AttemptCompletedEvent),

    /// A delivery reached a terminal state.
    DeliveryCompleted(DeliveryCompletedEvent),

    /// A critical delivery exhausted its attempts.
    ComplianceViolation(ComplianceViolationEvent),
}

impl DeliveryEvent {
    /// Returns the delivery id the event refers to.
    pub fn delivery_id(&self) -> &DeliveryId {
        match self {
            Self::AttemptCompleted(event) => &event.delivery_id,
            Self::DeliveryCompleted(event) => &event.delivery_id,
            Self::ComplianceViolation(event) => &event.delivery_id,
        }
    }
}

/// Coarse outcome of a single attempt, used as a metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptOutcome {
    /// The endpoint answered with a success code.
    Success,
    /// Anything else: retryable, terminal or transport failure.
    Error,
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Emitted after every attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptCompletedEvent {
    /// Delivery the attempt belongs to.
    pub delivery_id: DeliveryId,

    /// Attempt number (1-based).
    pub attempt_number: u32,

    /// Success or error.
    pub outcome: AttemptOutcome,

    /// HTTP status, absent for transport failures.
    pub status: Option<u16>,

    /// Wall time spent on the attempt.
    pub elapsed_ms: u64,

    /// Size of the request body in bytes.
    pub payload_size: usize,
}

/// Emitted exactly once per delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryCompletedEvent {
    /// Delivery that finished.
    pub delivery_id: DeliveryId,

    /// Whether the delivery succeeded.
    pub success: bool,

    /// Status of the last attempt, if it produced one.
    pub final_status: Option<u16>,

    /// Terminal error message for failed deliveries.
    pub error: Option<String>,

    /// Number of attempts made.
    pub attempts: u32,

    /// Total time from first attempt to completion.
    pub total_elapsed_ms: u64,

    /// When the delivery finished.
    pub completed_at: DateTime<Utc>,
}

impl DeliveryCompletedEvent {
    /// Returns the final status code or the error text, whichever applies.
    pub fn status_or_error(&self) -> String {
        match (self.final_status, &self.error) {
            (Some(status), _) => status.to_string(),
            (None, Some(error)) => error.clone(),
            (None, None) => "unknown".to_string(),
        }
    }
}

/// Emitted when a critical delivery fails permanently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceViolationEvent {
    /// Delivery that failed.
    pub delivery_id: DeliveryId,

    /// Violation kind, e.g. `critical_delivery_failure`.
    pub kind: String,

    /// Severity label.
    pub severity: String,

    /// Compliance framework the violation is filed under.
    pub framework: String,
}

/// Trait for handling delivery events.
///
/// Implementations must not block delivery processing. Failures inside a
/// handler are logged by the handler itself and never propagated back to
/// the engine.
#[async_trait::async_trait]
pub trait EventHandler: Send + Sync + std::fmt::Debug {
    /// Handles a delivery event.
    async fn handle_event(&self, event: DeliveryEvent);
}

/// No-op event handler that discards all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpEventHandler;

impl NoOpEventHandler {
    /// Creates a new no-op event handler.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl EventHandler for NoOpEventHandler {
    async fn handle_event(&self, _event: DeliveryEvent) {}
}

/// Writes every event as a structured log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventHandler;

impl TracingEventHandler {
    /// Creates a new tracing event handler.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl EventHandler for TracingEventHandler {
    async fn handle_event(&self, event: DeliveryEvent) {
        match event {
            DeliveryEvent::AttemptCompleted(attempt) => {
                info!(
                    delivery_id = %attempt.delivery_id,
                    attempt = attempt.attempt_number,
                    outcome = %attempt.outcome,
                    status = attempt.status,
                    elapsed_ms = attempt.elapsed_ms,
                    payload_size = attempt.payload_size,
                    "delivery attempt recorded"
                );
            },
            DeliveryEvent::DeliveryCompleted(outcome) if outcome.success => {
                info!(
                    delivery_id = %outcome.delivery_id,
                    status = %outcome.status_or_error(),
                    attempts = outcome.attempts,
                    total_elapsed_ms = outcome.total_elapsed_ms,
                    "delivery outcome recorded"
                );
            },
            DeliveryEvent::DeliveryCompleted(outcome) => {
                warn!(
                    delivery_id = %outcome.delivery_id,
                    status = %outcome.status_or_error(),
                    attempts = outcome.attempts,
                    total_elapsed_ms = outcome.total_elapsed_ms,
                    "delivery outcome recorded"
                );
            },
            DeliveryEvent::ComplianceViolation(violation) => {
                error!(
                    delivery_id = %violation.delivery_id,
                    kind = %violation.kind,
                    severity = %violation.severity,
                    framework = %violation.framework,
                    "compliance violation recorded"
                );
            },
        }
    }
}

/// Forwards events to every registered subscriber concurrently.
#[derive(Debug, Clone, Default)]
pub struct MulticastEventHandler {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl MulticastEventHandler {
    /// Creates a new multicast handler with no subscribers.
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    /// Adds a subscriber to receive delivery events.
    pub fn add_subscriber(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    /// Returns the number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.handlers.len()
    }
}

#[async_trait::async_trait]
impl EventHandler for MulticastEventHandler {
    async fn handle_event(&self, event: DeliveryEvent) {
        let futures = self.handlers.iter().map(|handler| {
            let event = event.clone();
            async move {
                handler.handle_event(event).await;
            }
        });

        futures::future::join_all(futures).await;
    }
}
