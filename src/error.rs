//! Error types for the broker

use thiserror::Error;

/// Result type for broker operations
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Errors raised by the broker and its transport
///
/// Transport, timeout and frame decode errors are fatal to the single
/// connection they occur on. `MalformedPayload` and `Argument` errors only
/// affect the message being handled.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("frame decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("event {event:?}: payload must be an array, got {found}")]
    MalformedPayload { event: String, found: &'static str },

    #[error("payload argument {index}: {reason}")]
    Argument { index: usize, reason: String },

    #[error("registry control task stopped")]
    RegistryStopped,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl BrokerError {
    /// True for errors that spoil one message but not the connection
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            BrokerError::MalformedPayload { .. } | BrokerError::Argument { .. }
        )
    }

    /// Wrap any displayable transport failure
    pub fn transport(err: impl std::fmt::Display) -> Self {
        BrokerError::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argument_error_message() {
        let err = BrokerError::Argument {
            index: 2,
            reason: "missing".to_string(),
        };
        assert_eq!(err.to_string(), "payload argument 2: missing");
    }

    #[test]
    fn test_recoverable_errors() {
        let shape = BrokerError::MalformedPayload {
            event: "chat".to_string(),
            found: "object",
        };
        assert!(shape.is_recoverable());
        assert!(!BrokerError::Transport("reset".into()).is_recoverable());
    }

    #[test]
    fn test_decode_error_from_serde() {
        let err: BrokerError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, BrokerError::Decode(_)));
    }
}
