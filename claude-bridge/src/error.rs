//! Error types for the Claude bridge

use thiserror::Error;

/// Main error type for the Claude bridge
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Invalid or contradictory settings, raised before any runtime invocation
    #[error("Configuration error: {0}")]
    Config(String),

    /// The agent runtime could not be started or failed while producing messages
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// A runtime message did not match the expected wire shape
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Session error: {0}")]
    Session(String),

    /// Durable session cache read or write failed
    ///
    /// Callers inside the bridge swallow this variant; it only surfaces from the
    /// cache port itself so that tests can observe it.
    #[error("Session cache error: {0}")]
    Cache(String),

    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    #[error("Invocation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// Whether this error represents a cancelled invocation rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, BridgeError::Cancelled)
    }
}

/// Convenience type alias for Results using BridgeError
pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_error_display() {
        let err = BridgeError::Config("api_key and auth_token are exclusive".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: api_key and auth_token are exclusive"
        );

        let err = BridgeError::Runtime("process exited".to_string());
        assert_eq!(err.to_string(), "Runtime error: process exited");

        let err = BridgeError::Protocol("missing type".to_string());
        assert_eq!(err.to_string(), "Protocol error: missing type");

        let err = BridgeError::Cache("disk full".to_string());
        assert_eq!(err.to_string(), "Session cache error: disk full");

        let err = BridgeError::Cancelled;
        assert_eq!(err.to_string(), "Invocation cancelled");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let bridge_error: BridgeError = io_error.into();

        match bridge_error {
            BridgeError::Io(_) => {}
            _ => panic!("Expected Io variant"),
        }
    }

    #[test]
    fn test_serde_error_conversion() {
        let serde_error = serde_json::from_str::<serde_json::Value>("{invalid json").unwrap_err();
        let bridge_error: BridgeError = serde_error.into();

        match bridge_error {
            BridgeError::Serialization(_) => {}
            _ => panic!("Expected Serialization variant"),
        }
    }

    #[test]
    fn test_is_cancelled() {
        assert!(BridgeError::Cancelled.is_cancelled());
        assert!(!BridgeError::Internal("x".to_string()).is_cancelled());
    }
}
