//! Wiring for orchestrator tests.
//!
//! Builds a `DeliveryOrchestrator` on a `TestClock` with a recording event
//! handler, so backoff never waits in real time and every reported event can
//! be inspected.

use std::{sync::Arc, time::Duration};

use courier_core::TestClock;
use courier_delivery::{
    AttemptExecutor, BatchCoordinator, ClientConfig, DeliveryClient, DeliveryConfig,
    DeliveryOrchestrator,
};

use crate::events::RecordingEventHandler;

/// Configuration with fixed delays and a short timeout.
///
/// Jitter is disabled so recorded sleeps are exact: 20ms, 40ms, 80ms...
pub fn fast_config() -> DeliveryConfig {
    DeliveryConfig::default()
        .with_delays(Duration::from_millis(10), Duration::from_secs(1))
        .with_jitter_factor(0.0)
        .with_timeout(Duration::from_millis(500))
}

/// Orchestrator plus the test doubles it was built with.
#[derive(Debug, Clone)]
pub struct DeliveryHarness {
    /// The orchestrator under test.
    pub orchestrator: Arc<DeliveryOrchestrator>,
    /// Virtual clock recording backoff sleeps.
    pub clock: TestClock,
    /// Every event the orchestrator reported.
    pub events: Arc<RecordingEventHandler>,
}

impl DeliveryHarness {
    /// Builds an orchestrator around `executor`.
    ///
    /// # Panics
    ///
    /// Panics if `config` is invalid.
    pub fn new(config: DeliveryConfig, executor: Arc<dyn AttemptExecutor>) -> Self {
        let clock = TestClock::new();
        let events = Arc::new(RecordingEventHandler::new());
        let orchestrator =
            DeliveryOrchestrator::new(config, executor, Arc::new(clock.clone()), events.clone())
                .expect("test configuration must be valid");

        Self { orchestrator: Arc::new(orchestrator), clock, events }
    }

    /// Builds an orchestrator around a real HTTP client.
    ///
    /// # Panics
    ///
    /// Panics if `config` is invalid or the client cannot be built.
    pub fn http(config: DeliveryConfig) -> Self {
        let clock = TestClock::new();
        let client = DeliveryClient::new(ClientConfig::default(), Arc::new(clock.clone()))
            .expect("http client must build");
        let events = Arc::new(RecordingEventHandler::new());
        let orchestrator = DeliveryOrchestrator::new(
            config,
            Arc::new(client),
            Arc::new(clock.clone()),
            events.clone(),
        )
        .expect("test configuration must be valid");

        Self { orchestrator: Arc::new(orchestrator), clock, events }
    }

    /// Batch coordinator over this harness's orchestrator.
    ///
    /// # Panics
    ///
    /// Panics if `concurrency` is zero.
    pub fn batch(&self, concurrency: usize) -> BatchCoordinator {
        BatchCoordinator::new(self.orchestrator.clone(), concurrency)
            .expect("batch concurrency must be positive")
    }

    /// Backoff delays slept so far.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.clock.recorded_sleeps()
    }
}
