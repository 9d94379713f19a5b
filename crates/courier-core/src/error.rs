//! Error types for core domain parsing and validation.

use thiserror::Error;

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type for domain-level validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Priority string did not match a known priority class.
    #[error("Invalid priority: {0}")]
    InvalidPriority(String),

    /// Delivery identifier was empty or malformed.
    #[error("Invalid delivery id: {0}")]
    InvalidDeliveryId(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_includes_offending_value() {
        let error = CoreError::InvalidPriority("urgent-ish".to_string());
        assert_eq!(error.to_string(), "Invalid priority: urgent-ish");
    }
}
