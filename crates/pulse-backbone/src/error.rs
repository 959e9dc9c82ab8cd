//! Backbone error type.

use thiserror::Error;

/// Backbone adapter error.
///
/// [`BackboneError::Unavailable`] is non-fatal by contract: local fan-out
/// still proceeds and remote fan-out is skipped for the outage window.
#[derive(Debug, Error)]
pub enum BackboneError {
    /// The bus is not running; remote fan-out is skipped.
    #[error("backbone unavailable")]
    Unavailable,

    /// Event serialization failed.
    #[error("event serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The underlying store rejected a publish.
    #[error("backbone transport error: {0}")]
    Transport(String),

    /// Subscribing to the store failed.
    #[error("backbone subscribe failed: {0}")]
    Subscribe(String),
}

impl From<redis::RedisError> for BackboneError {
    fn from(err: redis::RedisError) -> Self {
        Self::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_message() {
        assert_eq!(BackboneError::Unavailable.to_string(), "backbone unavailable");
    }

    #[test]
    fn serialize_error_converts() {
        let err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let backbone: BackboneError = err.into();
        assert!(matches!(backbone, BackboneError::Serialize(_)));
    }

    #[test]
    fn transport_message_carries_detail() {
        let err = BackboneError::Transport("connection reset".into());
        assert!(err.to_string().contains("connection reset"));
    }
}
