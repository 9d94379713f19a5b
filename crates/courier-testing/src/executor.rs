//! Scripted attempt executor for orchestration tests.
//!
//! Replaces the HTTP client with per-delivery scripts so retry, batch and
//! concurrency behavior can be tested without sockets. Also records every
//! call and the peak number of attempts in flight.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex, MutexGuard,
    },
    time::Duration,
};

use chrono::Utc;
use courier_core::DeliveryId;
use courier_delivery::{Attempt, AttemptExecutor, AttemptRequest, DeliveryError, ResponseBody};

/// What a scripted attempt produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedOutcome {
    /// The endpoint answered with this status.
    Status(u16),
    /// The attempt hit its timeout.
    Timeout,
    /// The connection failed with this message.
    Network(String),
}

/// Start or end of one executed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionEvent {
    /// An attempt for this delivery began.
    Started(DeliveryId),
    /// An attempt for this delivery returned.
    Finished(DeliveryId),
}

/// `AttemptExecutor` that replays scripted outcomes.
///
/// Each delivery id has its own queue of outcomes. Once a queue is empty,
/// or for deliveries without a script, the fallback outcome is used.
#[derive(Debug)]
pub struct ScriptedExecutor {
    scripts: Mutex<HashMap<DeliveryId, VecDeque<ScriptedOutcome>>>,
    fallback: ScriptedOutcome,
    latency: Duration,
    calls: Mutex<Vec<AttemptRequest>>,
    log: Mutex<Vec<ExecutionEvent>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedExecutor {
    /// Creates an executor answering every attempt with `fallback`.
    pub fn new(fallback: ScriptedOutcome) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            fallback,
            latency: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            log: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Creates an executor answering every attempt with `status`.
    pub fn always(status: u16) -> Self {
        Self::new(ScriptedOutcome::Status(status))
    }

    /// Queues outcomes for one delivery.
    #[must_use]
    pub fn script(
        self,
        delivery_id: impl Into<DeliveryId>,
        outcomes: impl IntoIterator<Item = ScriptedOutcome>,
    ) -> Self {
        lock(&self.scripts).entry(delivery_id.into()).or_default().extend(outcomes);
        self
    }

    /// Queues status codes for one delivery.
    #[must_use]
    pub fn script_statuses(self, delivery_id: impl Into<DeliveryId>, statuses: &[u16]) -> Self {
        let outcomes = statuses.iter().copied().map(ScriptedOutcome::Status);
        self.script(delivery_id, outcomes.collect::<Vec<_>>())
    }

    /// Makes every attempt take `latency` of real time.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Every attempt request received, in call order.
    pub fn calls(&self) -> Vec<AttemptRequest> {
        lock(&self.calls).clone()
    }

    /// Number of attempts executed.
    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    /// Attempts executed for one delivery.
    pub fn calls_for(&self, delivery_id: &DeliveryId) -> Vec<AttemptRequest> {
        lock(&self.calls).iter().filter(|call| &call.delivery_id == delivery_id).cloned().collect()
    }

    /// Start and end events of every attempt, in the order they happened.
    pub fn execution_log(&self) -> Vec<ExecutionEvent> {
        lock(&self.log).clone()
    }

    /// Highest number of attempts that were in flight at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_outcome(&self, delivery_id: &DeliveryId) -> ScriptedOutcome {
        lock(&self.scripts)
            .get_mut(delivery_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait::async_trait]
impl AttemptExecutor for ScriptedExecutor {
    async fn execute(&self, request: &AttemptRequest) -> Attempt {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        lock(&self.calls).push(request.clone());
        lock(&self.log).push(ExecutionEvent::Started(request.delivery_id.clone()));

        let outcome = self.next_outcome(&request.delivery_id);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let mut attempt = Attempt {
            attempt_number: request.attempt_number,
            timestamp: Utc::now(),
            url: request.url.clone(),
            request_headers: request.headers.clone(),
            request_body: request.payload.clone(),
            response_status: None,
            response_headers: None,
            response_body: None,
            elapsed: Some(self.latency),
            error: None,
            network_error: false,
        };

        match outcome {
            ScriptedOutcome::Status(status) => {
                attempt.response_status = Some(status);
                attempt.response_headers = Some(HashMap::new());
                attempt.response_body = Some(ResponseBody::Text(String::new()));
            },
            ScriptedOutcome::Timeout => {
                attempt.error = Some(DeliveryError::timeout(request.timeout).to_string());
                attempt.network_error = true;
            },
            ScriptedOutcome::Network(message) => {
                attempt.error = Some(DeliveryError::network(message).to_string());
                attempt.network_error = true;
            },
        }

        lock(&self.log).push(ExecutionEvent::Finished(request.delivery_id.clone()));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        attempt
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
