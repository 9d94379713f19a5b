//! Delivery orchestration: the attempt loop.
//!
//! ```text
//! ┌──────────────────────┐   ┌──────────────────┐   ┌─────────────┐
//! │ DeliveryOrchestrator │──▶│ AttemptExecutor  │──▶│ Destination │
//! └──────────────────────┘   └──────────────────┘   └─────────────┘
//!        │       │
//!        │       ├──▶ classify()          success / retry / terminal
//!        │       └──▶ BackoffScheduler    delay before next attempt
//!        ▼
//! ┌──────────────────────┐
//! │ EventHandler         │  attempt + outcome + compliance events
//! └──────────────────────┘
//! ```
//!
//! Attempts for one delivery are strictly sequential. The orchestrator holds
//! no per-delivery state; everything a delivery needs lives on the stack of
//! its `deliver` call, so any number of deliveries may run concurrently on
//! one instance.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use arc_swap::ArcSwap;
use bytes::Bytes;
use courier_core::{
    AttemptCompletedEvent, AttemptOutcome, Clock, ComplianceViolationEvent,
    DeliveryCompletedEvent, DeliveryContext, DeliveryEvent, DeliveryId, EventHandler, RealClock,
    TracingEventHandler,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::{
    classify::{classify, AttemptClass},
    client::{AttemptExecutor, AttemptRequest, ClientConfig, DeliveryClient},
    config::DeliveryConfig,
    error::{DeliveryError, ErrorCategory, Result},
    result::{Attempt, DeliveryResult, DeliveryState},
    retry::BackoffScheduler,
};

/// Error recorded when every permitted attempt was retryable.
pub const EXHAUSTED_MESSAGE: &str = "all delivery attempts failed";

/// Violation kind reported for critical deliveries that exhaust retries.
pub const CRITICAL_FAILURE_KIND: &str = "critical_delivery_failure";

/// Severity attached to critical delivery failures.
pub const CRITICAL_FAILURE_SEVERITY: &str = "critical";

/// Compliance framework critical delivery failures are filed under.
pub const CRITICAL_FAILURE_FRAMEWORK: &str = "SOC2";

/// One delivery to perform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRequest {
    /// Caller-assigned delivery id.
    #[serde(alias = "id")]
    pub delivery_id: DeliveryId,
    /// Destination URL.
    pub url: String,
    /// JSON payload, sent verbatim on every attempt.
    pub payload: serde_json::Value,
    /// Caller-supplied headers.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Optional correlation context.
    #[serde(default)]
    pub context: Option<DeliveryContext>,
}

impl DeliveryRequest {
    /// Creates a request without extra headers or context.
    pub fn new(
        delivery_id: impl Into<DeliveryId>,
        url: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            delivery_id: delivery_id.into(),
            url: url.into(),
            payload,
            headers: HashMap::new(),
            context: None,
        }
    }

    /// Adds a caller header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Replaces the caller headers.
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    /// Attaches a correlation context.
    pub fn with_context(mut self, context: DeliveryContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Whether this delivery is escalated on exhaustion.
    pub fn is_critical(&self) -> bool {
        self.context.as_ref().is_some_and(|context| context.priority.is_critical())
    }
}

/// Counters across all deliveries issued by one orchestrator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryStats {
    /// Deliveries currently running.
    pub in_flight: u64,
    /// Deliveries that succeeded.
    pub succeeded: u64,
    /// Deliveries that failed.
    pub failed: u64,
    /// HTTP attempts made.
    pub attempts: u64,
}

#[derive(Debug, Default)]
struct StatsCounters {
    in_flight: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    attempts: AtomicU64,
}

/// Drives deliveries through execute, classify and backoff.
///
/// Construct one per configuration domain and share it by reference or
/// `Arc`; there is no global instance.
#[derive(Debug)]
pub struct DeliveryOrchestrator {
    executor: Arc<dyn AttemptExecutor>,
    config: ArcSwap<DeliveryConfig>,
    clock: Arc<dyn Clock>,
    event_handler: Arc<dyn EventHandler>,
    stats: StatsCounters,
}

impl DeliveryOrchestrator {
    /// Creates an orchestrator with injected collaborators.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if `config` is invalid.
    pub fn new(
        config: DeliveryConfig,
        executor: Arc<dyn AttemptExecutor>,
        clock: Arc<dyn Clock>,
        event_handler: Arc<dyn EventHandler>,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            executor,
            config: ArcSwap::from_pointee(config),
            clock,
            event_handler,
            stats: StatsCounters::default(),
        })
    }

    /// Creates an orchestrator backed by a real HTTP client, the system
    /// clock, and structured-log event reporting.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` is invalid or the HTTP client cannot be
    /// built.
    pub fn with_http_client(config: DeliveryConfig, client_config: ClientConfig) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(RealClock::new());
        let client = DeliveryClient::new(client_config, clock.clone())?;
        Self::new(config, Arc::new(client), clock, Arc::new(TracingEventHandler::new()))
    }

    /// Returns the current configuration snapshot.
    pub fn config(&self) -> Arc<DeliveryConfig> {
        self.config.load_full()
    }

    /// Replaces the configuration.
    ///
    /// Deliveries already running keep the snapshot they started with.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` and keeps the current
    /// configuration if `config` is invalid.
    pub fn update_config(&self, config: DeliveryConfig) -> Result<()> {
        config.validate()?;
        info!(
            max_attempts = config.max_attempts,
            timeout_ms = config.timeout.as_millis(),
            "delivery configuration replaced"
        );
        self.config.store(Arc::new(config));
        Ok(())
    }

    /// Returns a snapshot of the delivery counters.
    pub fn stats(&self) -> DeliveryStats {
        DeliveryStats {
            in_flight: self.stats.in_flight.load(Ordering::Acquire),
            succeeded: self.stats.succeeded.load(Ordering::Acquire),
            failed: self.stats.failed.load(Ordering::Acquire),
            attempts: self.stats.attempts.load(Ordering::Acquire),
        }
    }

    /// Delivers one payload, retrying per the current configuration.
    ///
    /// Never fails: every outcome, including exhaustion and unserializable
    /// payloads, is represented in the returned `DeliveryResult`.
    pub async fn deliver(&self, request: DeliveryRequest) -> DeliveryResult {
        let config = self.config.load_full();
        let span = info_span!(
            "webhook_delivery",
            delivery_id = %request.delivery_id,
            url = %request.url,
            max_attempts = config.max_attempts
        );

        let result = {
            let _in_flight = InFlightGuard::enter(&self.stats.in_flight);
            self.run(&config, &request).instrument(span).await
        };

        if result.success {
            self.stats.succeeded.fetch_add(1, Ordering::AcqRel);
        } else {
            self.stats.failed.fetch_add(1, Ordering::AcqRel);
        }

        result
    }

    async fn run(&self, config: &DeliveryConfig, request: &DeliveryRequest) -> DeliveryResult {
        let start_time = self.clock.now();
        let delivery_id = &request.delivery_id;
        let mut state = DeliveryState::Pending;

        let body = match serde_json::to_vec(&request.payload) {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                let error = DeliveryError::serialization(e.to_string());
                warn!(error = %error, category = %ErrorCategory::from(&error), "delivery rejected");
                state = transition(delivery_id, state, DeliveryState::Failed);
                let error = Some(error.to_string());
                return self.finalize(request, Vec::new(), state, error, false, start_time).await;
            },
        };

        let headers = merge_context_headers(&request.headers, request.context.as_ref());
        let mut scheduler = BackoffScheduler::new(config);
        let mut attempts: Vec<Attempt> = Vec::new();
        let mut error = None;
        let mut exhausted = false;

        for attempt_number in 1..=config.max_attempts {
            state = transition(delivery_id, state, DeliveryState::Attempting);

            let attempt_request = AttemptRequest {
                delivery_id: delivery_id.clone(),
                url: request.url.clone(),
                headers: headers.clone(),
                body: body.clone(),
                payload: request.payload.clone(),
                attempt_number,
                timeout: config.timeout,
            };

            let attempt = self.executor.execute(&attempt_request).await;
            self.stats.attempts.fetch_add(1, Ordering::AcqRel);

            let class = classify(config, attempt.response_status);
            self.report_attempt(delivery_id, &attempt, class, body.len()).await;

            let status = attempt.response_status;
            let category = attempt.error_category();
            let transport_error = attempt.error.clone();
            attempts.push(attempt);

            match class {
                AttemptClass::Success => {
                    state = transition(delivery_id, state, DeliveryState::Succeeded);
                    break;
                },
                AttemptClass::Terminal => {
                    warn!(
                        attempt = attempt_number,
                        status,
                        category = ?category,
                        "non-retryable response, giving up"
                    );
                    error = Some(match status {
                        Some(code) => format!("non-retryable status {code}"),
                        None => "non-retryable failure".to_string(),
                    });
                    state = transition(delivery_id, state, DeliveryState::Failed);
                    break;
                },
                AttemptClass::Retry if attempt_number < config.max_attempts => {
                    state = transition(delivery_id, state, DeliveryState::Retrying);
                    let delay = scheduler.next_delay();
                    warn!(
                        attempt = attempt_number,
                        status,
                        error = transport_error.as_deref(),
                        delay_ms = delay.as_millis(),
                        "retryable failure, backing off"
                    );
                    self.clock.sleep(delay).await;
                },
                AttemptClass::Retry => {
                    warn!(attempt = attempt_number, status, "retry budget exhausted");
                    error = Some(EXHAUSTED_MESSAGE.to_string());
                    exhausted = true;
                    state = transition(delivery_id, state, DeliveryState::Failed);
                },
            }
        }

        self.finalize(request, attempts, state, error, exhausted, start_time).await
    }

    async fn finalize(
        &self,
        request: &DeliveryRequest,
        attempts: Vec<Attempt>,
        state: DeliveryState,
        error: Option<String>,
        exhausted: bool,
        start_time: std::time::Instant,
    ) -> DeliveryResult {
        let success = state == DeliveryState::Succeeded;
        let final_status = attempts.last().and_then(|attempt| attempt.response_status);
        let total_elapsed = self.clock.now().saturating_duration_since(start_time);

        let result = DeliveryResult {
            delivery_id: request.delivery_id.clone(),
            success,
            attempts,
            final_status,
            total_elapsed,
            error: if success { None } else { error },
            final_state: state,
        };

        if success {
            info!(
                attempts = result.attempt_count(),
                status = result.final_status,
                total_elapsed_ms = result.total_elapsed_ms(),
                "webhook delivered successfully"
            );
        } else {
            warn!(
                attempts = result.attempt_count(),
                status = result.final_status,
                error = result.error.as_deref(),
                total_elapsed_ms = result.total_elapsed_ms(),
                "webhook delivery failed"
            );
        }

        self.event_handler
            .handle_event(DeliveryEvent::DeliveryCompleted(DeliveryCompletedEvent {
                delivery_id: result.delivery_id.clone(),
                success,
                final_status: result.final_status,
                error: result.error.clone(),
                attempts: result.attempt_count(),
                total_elapsed_ms: result.total_elapsed_ms(),
                completed_at: self.clock.now_utc(),
            }))
            .await;

        if exhausted && request.is_critical() {
            self.event_handler
                .handle_event(DeliveryEvent::ComplianceViolation(ComplianceViolationEvent {
                    delivery_id: result.delivery_id.clone(),
                    kind: CRITICAL_FAILURE_KIND.to_string(),
                    severity: CRITICAL_FAILURE_SEVERITY.to_string(),
                    framework: CRITICAL_FAILURE_FRAMEWORK.to_string(),
                }))
                .await;
        }

        result
    }

    async fn report_attempt(
        &self,
        delivery_id: &DeliveryId,
        attempt: &Attempt,
        class: AttemptClass,
        payload_size: usize,
    ) {
        let outcome = match class {
            AttemptClass::Success => AttemptOutcome::Success,
            AttemptClass::Retry | AttemptClass::Terminal => AttemptOutcome::Error,
        };

        debug!(attempt = attempt.attempt_number, class = %class, "attempt classified");

        self.event_handler
            .handle_event(DeliveryEvent::AttemptCompleted(AttemptCompletedEvent {
                delivery_id: delivery_id.clone(),
                attempt_number: attempt.attempt_number,
                outcome,
                status: attempt.response_status,
                elapsed_ms: attempt.elapsed_ms(),
                payload_size,
            }))
            .await;
    }
}

/// Counts a delivery as in flight until dropped, including when the
/// `deliver` future is cancelled.
struct InFlightGuard<'a>(&'a AtomicU64);

impl<'a> InFlightGuard<'a> {
    fn enter(counter: &'a AtomicU64) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Moves the state machine forward, logging the transition.
fn transition(delivery_id: &DeliveryId, from: DeliveryState, to: DeliveryState) -> DeliveryState {
    debug_assert!(from.can_transition_to(to), "illegal transition {from} -> {to}");
    debug!(%delivery_id, from = %from, to = %to, "delivery state transition");
    to
}

/// Overlays context-derived headers on the caller headers.
///
/// Context headers replace caller headers with the same name regardless of
/// case.
fn merge_context_headers(
    caller: &HashMap<String, String>,
    context: Option<&DeliveryContext>,
) -> HashMap<String, String> {
    let mut headers = caller.clone();

    if let Some(context) = context {
        for (name, value) in context.headers() {
            headers.retain(|existing, _| !existing.eq_ignore_ascii_case(name));
            headers.insert(name.to_string(), value);
        }
    }

    headers
}
