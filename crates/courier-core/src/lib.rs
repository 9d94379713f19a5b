//! Core domain models and event types.
//!
//! Provides strongly-typed delivery primitives, the observability event
//! model, and the clock abstraction shared by the delivery engine and its
//! callers. Every other crate in the workspace depends on these types.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod events;
pub mod models;
pub mod time;

pub use error::{CoreError, Result};
pub use events::{
    AttemptCompletedEvent, AttemptOutcome, ComplianceViolationEvent, DeliveryCompletedEvent,
    DeliveryEvent, EventHandler, MulticastEventHandler, NoOpEventHandler, TracingEventHandler,
};
pub use models::{DeliveryContext, DeliveryId, Priority};
pub use time::{Clock, RealClock, TestClock};
