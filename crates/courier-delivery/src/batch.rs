//! Bounded-concurrency batch delivery.
//!
//! Requests are split into consecutive rounds of at most `concurrency`
//! items. All deliveries in a round run concurrently and the next round
//! starts only after every delivery in the current one has finished, so a
//! slow delivery holds back its whole round.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, info_span, Instrument};

use crate::{
    error::{DeliveryError, Result},
    instrument::timed,
    orchestrator::{DeliveryOrchestrator, DeliveryRequest},
    result::DeliveryResult,
};

/// Delivers many requests with at most `concurrency` in flight.
#[derive(Debug, Clone)]
pub struct BatchCoordinator {
    orchestrator: Arc<DeliveryOrchestrator>,
    concurrency: usize,
}

impl BatchCoordinator {
    /// Creates a coordinator running at most `concurrency` deliveries at once.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if `concurrency` is zero.
    pub fn new(orchestrator: Arc<DeliveryOrchestrator>, concurrency: usize) -> Result<Self> {
        if concurrency == 0 {
            return Err(DeliveryError::configuration("batch concurrency must be at least 1"));
        }

        Ok(Self { orchestrator, concurrency })
    }

    /// Creates a coordinator with the default concurrency.
    pub fn with_default_concurrency(orchestrator: Arc<DeliveryOrchestrator>) -> Self {
        Self { orchestrator, concurrency: crate::DEFAULT_BATCH_CONCURRENCY }
    }

    /// Maximum deliveries in flight.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// The orchestrator deliveries are run on.
    pub fn orchestrator(&self) -> &Arc<DeliveryOrchestrator> {
        &self.orchestrator
    }

    /// Number of rounds needed for `count` requests.
    pub fn rounds_for(&self, count: usize) -> usize {
        count.div_ceil(self.concurrency)
    }

    /// Delivers every request and returns results in input order.
    ///
    /// A failed delivery never affects the others.
    pub async fn deliver_all(&self, requests: Vec<DeliveryRequest>) -> Vec<DeliveryResult> {
        let total = requests.len();
        let rounds = self.rounds_for(total);
        let span = info_span!("webhook_batch", total, concurrency = self.concurrency, rounds);

        async move {
            let mut results = Vec::with_capacity(total);

            for (index, round) in requests.chunks(self.concurrency).enumerate() {
                let deliveries =
                    round.iter().cloned().map(|request| self.orchestrator.deliver(request));

                let (round_results, elapsed) = timed("batch_round", join_all(deliveries)).await;
                debug!(
                    round = index + 1,
                    size = round_results.len(),
                    elapsed_ms = elapsed.as_millis(),
                    "batch round finished"
                );

                results.extend(round_results);
            }

            let succeeded = results.iter().filter(|result| result.success).count();
            info!(succeeded, failed = total - succeeded, "batch delivery finished");

            results
        }
        .instrument(span)
        .await
    }
}
