//! Error types for jrpc2
//!
//! This module defines the error type used for everything that never
//! crosses the wire: transport failures, framing violations, decode
//! failures, and internal bookkeeping errors. Wire-level JSON-RPC errors
//! (the `{code, message, data}` object a peer actually receives) live in
//! [`crate::codes`] instead; a `JrpcError` is promoted to one of those at
//! the boundary where a response is constructed.

use thiserror::Error;

/// Main error type for jrpc2 internals.
#[derive(Error, Debug)]
pub enum JrpcError {
    /// The underlying byte channel returned an I/O error.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A record violated the active framing's contract (bad length
    /// prefix, missing header, embedded delimiter, oversized record, etc).
    #[error("framing error: {0}")]
    Framing(String),

    /// JSON parsing or (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Config could not be loaded or parsed.
    #[error("config error: {0}")]
    Config(#[from] serde_yaml::Error),

    /// The peer closed the channel (clean EOF).
    #[error("peer closed the channel")]
    Closed,

    /// An operation was attempted that the current state machine state
    /// does not permit (e.g. `start()` on an already-running server).
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A call timed out waiting for a response.
    #[error("request timed out: method={method}")]
    Timeout {
        /// The method that timed out.
        method: String,
    },

    /// The caller's context was cancelled before a response arrived.
    #[error("request cancelled")]
    Cancelled,

    /// The caller's context deadline elapsed before a response arrived.
    #[error("request deadline exceeded")]
    DeadlineExceeded,

    /// A pending call was abandoned because the client or server closed.
    #[error("call abandoned: {0}")]
    Incomplete(String),

    /// The peer returned a JSON-RPC error object for a request.
    #[error("remote error {code}: {message}")]
    Remote {
        /// The numeric JSON-RPC error code.
        code: i32,
        /// The error message.
        message: String,
        /// Optional structured error data.
        data: Option<serde_json::Value>,
    },

    /// Auth token construction or verification failed.
    #[error("auth error: {0}")]
    Auth(String),

    /// Generic internal error, used for conditions that should be
    /// unreachable given the invariants of the surrounding code.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias for jrpc2 operations.
pub type Result<T> = std::result::Result<T, JrpcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "nope");
        let err: JrpcError = io_error.into();
        assert!(matches!(err, JrpcError::Io(_)));
    }

    #[test]
    fn test_serialization_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{bad").unwrap_err();
        let err: JrpcError = json_err.into();
        assert!(matches!(err, JrpcError::Serialization(_)));
    }

    #[test]
    fn test_config_error_conversion() {
        let yaml_err = serde_yaml::from_str::<serde_yaml::Value>("invalid: : yaml").unwrap_err();
        let err: JrpcError = yaml_err.into();
        assert!(matches!(err, JrpcError::Config(_)));
    }

    #[test]
    fn test_timeout_display() {
        let err = JrpcError::Timeout {
            method: "Math.Add".to_string(),
        };
        assert!(err.to_string().contains("Math.Add"));
    }

    #[test]
    fn test_remote_display() {
        let err = JrpcError::Remote {
            code: -32601,
            message: "method not found".to_string(),
            data: None,
        };
        assert!(err.to_string().contains("-32601"));
        assert!(err.to_string().contains("method not found"));
    }

    #[test]
    fn test_cancelled_and_deadline_display() {
        assert_eq!(JrpcError::Cancelled.to_string(), "request cancelled");
        assert_eq!(
            JrpcError::DeadlineExceeded.to_string(),
            "request deadline exceeded"
        );
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<JrpcError>();
    }
}
