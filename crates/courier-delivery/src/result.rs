//! Attempt records, response bodies and delivery results.
//!
//! An `Attempt` is created once per try and never modified afterwards. A
//! `DeliveryResult` owns the ordered list of attempts for one `deliver`
//! call and is finalized exactly once.

use std::{collections::HashMap, fmt, time::Duration};

use chrono::{DateTime, Utc};
use courier_core::DeliveryId;
use serde::{Deserialize, Serialize};

use crate::error::ErrorCategory;

/// Response bodies above this size are recorded truncated and not parsed.
pub const MAX_RESPONSE_BODY_SIZE: usize = 64 * 1024;

/// Prefix kept from oversized bodies.
const TRUNCATED_PREFIX_SIZE: usize = 1024;

/// Parsed response body.
///
/// Parsing never fails: bodies that are neither valid JSON (when the
/// response claims JSON) nor valid UTF-8 text become `Unparseable`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum ResponseBody {
    /// Body parsed as JSON.
    Json(serde_json::Value),
    /// Raw text body.
    Text(String),
    /// Body could not be parsed.
    Unparseable,
}

impl ResponseBody {
    /// Parses raw body bytes according to the response content type.
    pub fn parse(content_type: Option<&str>, bytes: &[u8]) -> Self {
        if bytes.len() > MAX_RESPONSE_BODY_SIZE {
            let prefix = String::from_utf8_lossy(&bytes[..TRUNCATED_PREFIX_SIZE]);
            return Self::Text(format!("{prefix}... (truncated)"));
        }

        let is_json = content_type
            .map(|value| value.to_ascii_lowercase().contains("application/json"))
            .unwrap_or(false);

        if is_json {
            return serde_json::from_slice(bytes).map_or(Self::Unparseable, Self::Json);
        }

        match std::str::from_utf8(bytes) {
            Ok(text) => Self::Text(text.to_string()),
            Err(_) => Self::Unparseable,
        }
    }

    /// Returns the JSON value, if the body was JSON.
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the text, if the body was plain text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// Record of one HTTP attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    /// Attempt number (1-based).
    pub attempt_number: u32,
    /// When the attempt started.
    pub timestamp: DateTime<Utc>,
    /// Target URL.
    pub url: String,
    /// Headers sent with the request.
    pub request_headers: HashMap<String, String>,
    /// Request body as sent.
    pub request_body: serde_json::Value,
    /// Response status, absent for transport failures.
    pub response_status: Option<u16>,
    /// Response headers, absent for transport failures.
    pub response_headers: Option<HashMap<String, String>>,
    /// Parsed response body, absent for transport failures.
    pub response_body: Option<ResponseBody>,
    /// Time from sending the request to reading the full response.
    pub elapsed: Option<Duration>,
    /// Transport error message.
    pub error: Option<String>,
    /// Whether the attempt failed below HTTP (DNS, connect, reset, timeout).
    pub network_error: bool,
}

impl Attempt {
    /// Returns the failure category for metrics, `None` if the attempt got a
    /// response in the 2xx range.
    pub fn error_category(&self) -> Option<ErrorCategory> {
        match self.response_status {
            Some(200..=299) => None,
            status => Some(ErrorCategory::from_status(status)),
        }
    }

    /// Elapsed time in whole milliseconds, zero when unknown.
    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed.map_or(0, |elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
    }
}

/// Lifecycle of a delivery.
///
/// ```text
/// Pending ─▶ Attempting ─┬─▶ Succeeded
///               ▲        ├─▶ Failed
///               │        ▼
///               └──── Retrying
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    /// Created, no attempt made yet.
    Pending,
    /// An HTTP attempt is in flight.
    Attempting,
    /// Waiting out a backoff delay.
    Retrying,
    /// A success code was received.
    Succeeded,
    /// Terminal status or attempts exhausted.
    Failed,
}

impl DeliveryState {
    /// Whether no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Attempting)
                | (Self::Pending, Self::Failed)
                | (Self::Attempting, Self::Succeeded)
                | (Self::Attempting, Self::Retrying)
                | (Self::Attempting, Self::Failed)
                | (Self::Retrying, Self::Attempting)
        )
    }
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Attempting => write!(f, "attempting"),
            Self::Retrying => write!(f, "retrying"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Final outcome of one delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryResult {
    /// Delivery identifier.
    pub delivery_id: DeliveryId,
    /// Whether a success code was received.
    pub success: bool,
    /// Attempts in the order they were made.
    pub attempts: Vec<Attempt>,
    /// Status of the last attempt, if it produced one.
    pub final_status: Option<u16>,
    /// Time from the start of the call to finalization.
    pub total_elapsed: Duration,
    /// Terminal error message for failed deliveries.
    pub error: Option<String>,
    /// Terminal state of the delivery.
    pub final_state: DeliveryState,
}

impl DeliveryResult {
    /// Number of attempts made.
    pub fn attempt_count(&self) -> u32 {
        u32::try_from(self.attempts.len()).unwrap_or(u32::MAX)
    }

    /// The last attempt, if any was made.
    pub fn last_attempt(&self) -> Option<&Attempt> {
        self.attempts.last()
    }

    /// Total elapsed time in whole milliseconds.
    pub fn total_elapsed_ms(&self) -> u64 {
        u64::try_from(self.total_elapsed.as_millis()).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn json_body_parsed_when_content_type_matches() {
        let body = ResponseBody::parse(Some("application/json; charset=utf-8"), br#"{"ok":true}"#);
        assert_eq!(body, ResponseBody::Json(json!({"ok": true})));
    }

    #[test]
    fn invalid_json_is_unparseable() {
        let body = ResponseBody::parse(Some("application/json"), b"{not json");
        assert_eq!(body, ResponseBody::Unparseable);

        let empty = ResponseBody::parse(Some("application/json"), b"");
        assert_eq!(empty, ResponseBody::Unparseable);
    }

    #[test]
    fn non_json_content_is_text() {
        let body = ResponseBody::parse(Some("text/plain"), br#"{"looks":"like json"}"#);
        assert_eq!(body.as_text(), Some(r#"{"looks":"like json"}"#));

        let no_type = ResponseBody::parse(None, b"OK");
        assert_eq!(no_type.as_text(), Some("OK"));
    }

    #[test]
    fn invalid_utf8_is_unparseable() {
        let body = ResponseBody::parse(Some("text/plain"), &[0xff, 0xfe, 0xfd]);
        assert_eq!(body, ResponseBody::Unparseable);
    }

    #[test]
    fn oversized_body_truncated() {
        let bytes = vec![b'a'; MAX_RESPONSE_BODY_SIZE + 1];
        let body = ResponseBody::parse(Some("application/json"), &bytes);

        let text = body.as_text().unwrap();
        assert!(text.ends_with("... (truncated)"));
        assert_eq!(text.len(), TRUNCATED_PREFIX_SIZE + "... (truncated)".len());
    }

    #[test]
    fn state_machine_transitions() {
        use DeliveryState::*;

        assert!(Pending.can_transition_to(Attempting));
        assert!(Attempting.can_transition_to(Retrying));
        assert!(Retrying.can_transition_to(Attempting));
        assert!(Attempting.can_transition_to(Succeeded));
        assert!(Attempting.can_transition_to(Failed));

        assert!(!Retrying.can_transition_to(Succeeded));
        assert!(!Succeeded.can_transition_to(Attempting));
        assert!(!Failed.can_transition_to(Retrying));

        assert!(Succeeded.is_terminal());
        assert!(Failed.is_terminal());
        assert!(!Retrying.is_terminal());
    }

    #[test]
    fn response_body_serializes_tagged() {
        let value = serde_json::to_value(ResponseBody::Text("hi".to_string())).unwrap();
        assert_eq!(value, json!({"kind": "text", "value": "hi"}));

        let unparseable = serde_json::to_value(ResponseBody::Unparseable).unwrap();
        assert_eq!(unparseable, json!({"kind": "unparseable"}));
    }
}
