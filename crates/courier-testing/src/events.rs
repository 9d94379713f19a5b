//! Event recording for asserting on reported delivery events.

use std::sync::Mutex;

use courier_core::{
    AttemptCompletedEvent, ComplianceViolationEvent, DeliveryCompletedEvent, DeliveryEvent,
    DeliveryId, EventHandler,
};

/// Event handler that keeps every event it receives, in order.
#[derive(Debug, Default)]
pub struct RecordingEventHandler {
    events: Mutex<Vec<DeliveryEvent>>,
}

impl RecordingEventHandler {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every recorded event.
    pub fn events(&self) -> Vec<DeliveryEvent> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    /// Recorded events for one delivery.
    pub fn events_for(&self, delivery_id: &DeliveryId) -> Vec<DeliveryEvent> {
        self.events().into_iter().filter(|event| event.delivery_id() == delivery_id).collect()
    }

    /// Recorded attempt events.
    pub fn attempts(&self) -> Vec<AttemptCompletedEvent> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                DeliveryEvent::AttemptCompleted(attempt) => Some(attempt),
                _ => None,
            })
            .collect()
    }

    /// Recorded delivery outcome events.
    pub fn outcomes(&self) -> Vec<DeliveryCompletedEvent> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                DeliveryEvent::DeliveryCompleted(outcome) => Some(outcome),
                _ => None,
            })
            .collect()
    }

    /// Recorded compliance violations.
    pub fn violations(&self) -> Vec<ComplianceViolationEvent> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                DeliveryEvent::ComplianceViolation(violation) => Some(violation),
                _ => None,
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl EventHandler for RecordingEventHandler {
    async fn handle_event(&self, event: DeliveryEvent) {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).push(event);
    }
}
