//! Error types for the tunnel core.
//!
//! Parser failures are not errors (they yield `None`); what remains are the
//! lifecycle failures surfaced to the caller of `start()` and the storage
//! failures that are logged and otherwise ignored.

use std::io;

use thiserror::Error;

/// Errors surfaced by the tunnel lifecycle and its packet source.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// A single attempt to apply network settings failed.
    #[error("network configuration failed: {0}")]
    Configuration(String),

    /// Every configuration attempt failed; no further retry is scheduled.
    #[error("network configuration failed after {attempts} attempts: {last}")]
    ConfigurationExhausted { attempts: u32, last: String },

    /// The packet source is gone (device closed, capture file exhausted).
    #[error("packet source unavailable: {0}")]
    SourceUnavailable(String),

    /// `stop()` was called while `start()` was applying settings or waiting
    /// to retry.
    #[error("start cancelled by stop request")]
    Cancelled,
}

impl TunnelError {
    /// Whether `start()` should schedule another configuration attempt.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::SourceUnavailable(_))
    }
}

/// Errors from the shared defaults store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on shared store: {0}")]
    Io(#[from] io::Error),

    #[error("malformed shared store contents: {0}")]
    Serde(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(TunnelError::Configuration("boom".into()).is_retryable());
        assert!(!TunnelError::Cancelled.is_retryable());
        assert!(!TunnelError::ConfigurationExhausted { attempts: 4, last: "x".into() }.is_retryable());
    }

    #[test]
    fn test_exhausted_message() {
        let err = TunnelError::ConfigurationExhausted { attempts: 4, last: "no route".into() };
        assert_eq!(err.to_string(), "network configuration failed after 4 attempts: no route");
    }

    #[test]
    fn test_store_error_from_io_and_serde() {
        let io = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        assert!(matches!(StoreError::from(io), StoreError::Io(_)));

        let serde = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = StoreError::from(serde);
        assert!(err.to_string().starts_with("malformed shared store contents"));
    }
}
