//! Status classification for retry decisions.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::DeliveryConfig;

/// What the orchestrator should do after an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptClass {
    /// Delivery is complete.
    Success,
    /// Possibly transient; try again if budget remains.
    Retry,
    /// Not worth retrying; stop now.
    Terminal,
}

impl fmt::Display for AttemptClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Retry => write!(f, "retry"),
            Self::Terminal => write!(f, "terminal"),
        }
    }
}

/// Classifies an attempt by its HTTP status.
///
/// A missing status means the request never got an answer and is always
/// retried. Configured success codes win over everything else. Client
/// errors only retry when listed in `retry_codes`; server errors always
/// retry. Anything left over (1xx, 3xx, unlisted 2xx) fails closed.
pub fn classify(config: &DeliveryConfig, status: Option<u16>) -> AttemptClass {
    let Some(status) = status else {
        return AttemptClass::Retry;
    };

    if config.success_codes.contains(&status) {
        return AttemptClass::Success;
    }

    match status {
        400..=499 if config.retry_codes.contains(&status) => AttemptClass::Retry,
        400..=499 => AttemptClass::Terminal,
        500.. => AttemptClass::Retry,
        _ => AttemptClass::Terminal,
    }
}
