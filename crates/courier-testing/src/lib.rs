//! Test infrastructure for the delivery engine.
//!
//! Provides a wiremock-backed endpoint, a scripted `AttemptExecutor`, an
//! event recorder, and a harness wiring them to an orchestrator on a
//! virtual clock.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod events;
pub mod executor;
pub mod harness;
pub mod http;

pub use events::RecordingEventHandler;
pub use executor::{ExecutionEvent, ScriptedExecutor, ScriptedOutcome};
pub use harness::{fast_config, DeliveryHarness};
pub use http::{header_value, json_body, unreachable_url, MockServer, WEBHOOK_PATH};
