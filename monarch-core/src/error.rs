//! # Error Types
//!
//! Errors raised at the seams of the election protocol.
//!
//! The state machine itself never hands these to its callers: a failed read
//! is treated as "no record", a failed publish as "not delivered", and the
//! protocol heals through re-election. They exist so that store and bus
//! adapters can report what went wrong and so the failures can be logged.

use thiserror::Error;

/// Errors produced by record stores, broadcast buses and configuration.
///
/// # Examples
///
/// ```rust
/// use monarch_core::MonarchError;
///
/// let error = MonarchError::store("quota exceeded");
/// assert!(error.is_transient());
/// ```
#[derive(Error, Debug)]
pub enum MonarchError {
    /// Reading or writing the shared record store failed
    #[error("Store error: {reason}")]
    Store { reason: String },

    /// Publishing to or subscribing on the broadcast bus failed
    #[error("Bus error: {reason}")]
    Bus { reason: String },

    /// A record or message could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid elector configuration
    #[error("Configuration error: {reason}")]
    Config { reason: String },

    /// No async runtime is available to drive the elector
    #[error("Runtime error: {reason}")]
    Runtime { reason: String },

    /// Unexpected internal error
    #[error("Internal error: {reason}")]
    Internal { reason: String },
}

/// Result type for Monarch operations.
pub type MonarchResult<T> = Result<T, MonarchError>;

impl MonarchError {
    pub fn store(reason: impl Into<String>) -> Self {
        Self::Store {
            reason: reason.into(),
        }
    }

    pub fn bus(reason: impl Into<String>) -> Self {
        Self::Bus {
            reason: reason.into(),
        }
    }

    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    pub fn runtime(reason: impl Into<String>) -> Self {
        Self::Runtime {
            reason: reason.into(),
        }
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// Whether the condition may clear up on its own.
    ///
    /// Store and bus failures are expected to be intermittent; the protocol
    /// simply tries again on the next timer or message.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store { .. } | Self::Bus { .. })
    }
}

impl From<anyhow::Error> for MonarchError {
    fn from(err: anyhow::Error) -> Self {
        MonarchError::Internal {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            MonarchError::store("disk full").to_string(),
            "Store error: disk full"
        );
        assert_eq!(
            MonarchError::config("min > max").to_string(),
            "Configuration error: min > max"
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(MonarchError::store("x").is_transient());
        assert!(MonarchError::bus("x").is_transient());
        assert!(!MonarchError::config("x").is_transient());
        assert!(!MonarchError::internal("x").is_transient());
    }

    #[test]
    fn test_from_anyhow() {
        let err: MonarchError = anyhow::anyhow!("boom").into();
        assert!(matches!(err, MonarchError::Internal { ref reason } if reason == "boom"));
    }
}
