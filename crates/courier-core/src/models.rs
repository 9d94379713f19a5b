//! Delivery identifiers, priority classes and correlation context.
//!
//! A `DeliveryContext` enriches outbound requests with correlation headers.
//! It never influences retry decisions; only the compliance reporting path
//! looks at the priority class.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

/// Header carrying the agent identifier from a delivery context.
pub const AGENT_ID_HEADER: &str = "X-Agent-ID";
/// Header carrying the workflow identifier from a delivery context.
pub const WORKFLOW_ID_HEADER: &str = "X-Workflow-ID";
/// Header carrying the event type from a delivery context.
pub const EVENT_TYPE_HEADER: &str = "X-Event-Type";
/// Header carrying the priority class from a delivery context.
pub const PRIORITY_HEADER: &str = "X-Priority";

/// Caller-assigned identifier of one delivery.
///
/// Delivery ids are opaque strings chosen by the caller so they can be
/// correlated with upstream records. `DeliveryId::new` mints a random one
/// for callers that do not care.
///
/// # Example
///
/// ```
/// use courier_core::DeliveryId;
/// let id = DeliveryId::from("order-created-42");
/// assert_eq!(id.as_str(), "order-created-42");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeliveryId(pub String);

impl DeliveryId {
    /// Creates a new random delivery id.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Parses a caller-supplied id, rejecting empty or whitespace-only input.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(CoreError::InvalidDeliveryId("delivery id must not be empty".to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for DeliveryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeliveryId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for DeliveryId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Priority class of a delivery.
///
/// Only `Critical` changes behaviour: a critical delivery that exhausts its
/// attempts is additionally reported as a compliance violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Background traffic.
    Low,
    /// Default priority.
    #[default]
    Normal,
    /// Time-sensitive traffic.
    High,
    /// Deliveries whose failure must be escalated.
    Critical,
}

impl Priority {
    /// Returns the lowercase wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Whether failures at this priority are escalated.
    pub fn is_critical(self) -> bool {
        matches!(self, Self::Critical)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "normal" | "medium" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(CoreError::InvalidPriority(other.to_string())),
        }
    }
}

/// Correlation metadata folded into request headers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryContext {
    /// Delivery this context belongs to.
    pub delivery_id: DeliveryId,
    /// Agent that produced the event, if any.
    #[serde(default)]
    pub agent_id: Option<String>,
    /// Workflow the event belongs to, if any.
    #[serde(default)]
    pub workflow_id: Option<String>,
    /// Event type label, if any.
    #[serde(default)]
    pub event_type: Option<String>,
    /// Priority class.
    #[serde(default)]
    pub priority: Priority,
    /// When the context was created.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl DeliveryContext {
    /// Creates a context with normal priority and no correlation ids.
    pub fn new(delivery_id: DeliveryId) -> Self {
        Self {
            delivery_id,
            agent_id: None,
            workflow_id: None,
            event_type: None,
            priority: Priority::Normal,
            created_at: Utc::now(),
        }
    }

    /// Sets the agent id.
    pub fn with_agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    /// Sets the workflow id.
    pub fn with_workflow_id(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = Some(workflow_id.into());
        self
    }

    /// Sets the event type.
    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// Sets the priority class.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Returns the headers derived from this context.
    ///
    /// The priority header is always present; the others only when the
    /// corresponding field is set.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = Vec::with_capacity(4);
        if let Some(agent_id) = &self.agent_id {
            headers.push((AGENT_ID_HEADER, agent_id.clone()));
        }
        if let Some(workflow_id) = &self.workflow_id {
            headers.push((WORKFLOW_ID_HEADER, workflow_id.clone()));
        }
        if let Some(event_type) = &self.event_type {
            headers.push((EVENT_TYPE_HEADER, event_type.clone()));
        }
        headers.push((PRIORITY_HEADER, self.priority.to_string()));
        headers
    }
}
