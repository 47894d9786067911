//! Error types for outbound client calls.

use thiserror::Error;

use crate::message::MessageRef;

// =============================================================================
// API Errors
// =============================================================================

/// Error type for outbound client calls.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// The client is not connected to its transport.
    #[error("client is not connected")]
    NotConnected,
    /// The call timed out.
    #[error("API call timed out")]
    Timeout,
    /// The caller gave up waiting: the event deadline elapsed or shutdown began.
    #[error("API call cancelled")]
    Cancelled,
    /// The remote side rejected the call.
    #[error("API error ({code}): {message}")]
    Rejected { code: i64, message: String },
    /// The referenced message no longer exists.
    #[error("message {0} not found")]
    MessageNotFound(MessageRef),
    /// Failed to serialize/deserialize.
    #[error("serialization error: {0}")]
    SerializationError(String),
    /// Transport-level failure.
    #[error("transport error: {0}")]
    Transport(String),
    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for outbound client calls.
pub type ApiResult<T> = Result<T, ApiError>;
