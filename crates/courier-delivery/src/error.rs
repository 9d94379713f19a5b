//! Error types for webhook delivery.
//!
//! Only two kinds of failure ever leave this crate as `Err`: invalid
//! configuration at construction time and HTTP client setup failures.
//! Everything that can go wrong while a delivery runs is turned into data on
//! the `Attempt` and `DeliveryResult`, using the `Display` text of the
//! transport variants below as the recorded message.

use std::{fmt, time::Duration};

use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Error types for webhook delivery operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// Network-level connectivity failure.
    #[error("network connection failed: {message}")]
    NetworkError {
        /// Error message describing the network failure
        message: String,
    },

    /// HTTP request timeout exceeded.
    #[error("request timeout after {timeout_ms}ms")]
    Timeout {
        /// Timeout that expired, in milliseconds
        timeout_ms: u64,
    },

    /// Payload could not be serialized.
    #[error("payload serialization failed: {message}")]
    SerializationError {
        /// Serializer error message
        message: String,
    },

    /// Invalid delivery or client configuration.
    #[error("invalid delivery configuration: {message}")]
    ConfigurationError {
        /// Configuration error message
        message: String,
    },
}

impl DeliveryError {
    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout: Duration) -> Self {
        Self::Timeout { timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX) }
    }

    /// Creates a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError { message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError { message: message.into() }
    }

    /// Whether this error happened on the wire rather than in our own setup.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::NetworkError { .. } | Self::Timeout { .. })
    }
}

/// Category of delivery failure for metrics and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Connection, DNS or timeout failures.
    Network,
    /// HTTP client errors (4xx).
    Client,
    /// HTTP server errors (5xx).
    Server,
    /// Rate limiting (429).
    RateLimit,
    /// Payload or configuration problems.
    Configuration,
    /// Status codes outside the 4xx/5xx ranges.
    Unexpected,
}

impl ErrorCategory {
    /// Categorises a failed attempt by its status, if any.
    pub fn from_status(status: Option<u16>) -> Self {
        match status {
            None => Self::Network,
            Some(429) => Self::RateLimit,
            Some(400..=499) => Self::Client,
            Some(500..=599) => Self::Server,
            Some(_) => Self::Unexpected,
        }
    }
}

impl From<&DeliveryError> for ErrorCategory {
    fn from(error: &DeliveryError) -> Self {
        match error {
            DeliveryError::NetworkError { .. } | DeliveryError::Timeout { .. } => Self::Network,
            DeliveryError::SerializationError { .. } | DeliveryError::ConfigurationError { .. } => {
                Self::Configuration
            },
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Client => write!(f, "client"),
            Self::Server => write!(f, "server"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Configuration => write!(f, "configuration"),
            Self::Unexpected => write!(f, "unexpected"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_identified_correctly() {
        assert!(DeliveryError::network("connection refused").is_transport());
        assert!(DeliveryError::timeout(Duration::from_secs(30)).is_transport());

        assert!(!DeliveryError::configuration("max_attempts must be at least 1").is_transport());
        assert!(!DeliveryError::serialization("key must be a string").is_transport());
    }

    #[test]
    fn error_categories_mapped_correctly() {
        assert_eq!(ErrorCategory::from(&DeliveryError::network("reset")), ErrorCategory::Network);
        assert_eq!(
            ErrorCategory::from(&DeliveryError::configuration("bad")),
            ErrorCategory::Configuration
        );
        assert_eq!(ErrorCategory::from_status(None), ErrorCategory::Network);
        assert_eq!(ErrorCategory::from_status(Some(404)), ErrorCategory::Client);
        assert_eq!(ErrorCategory::from_status(Some(429)), ErrorCategory::RateLimit);
        assert_eq!(ErrorCategory::from_status(Some(503)), ErrorCategory::Server);
        assert_eq!(ErrorCategory::from_status(Some(302)), ErrorCategory::Unexpected);
    }

    #[test]
    fn error_display_format() {
        let error = DeliveryError::timeout(Duration::from_millis(30_000));
        assert_eq!(error.to_string(), "request timeout after 30000ms");

        assert_eq!(ErrorCategory::RateLimit.to_string(), "rate_limit");
    }
}
