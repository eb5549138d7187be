// Error types for conversation streaming

use thiserror::Error;

/// Result type alias for chat operations
pub type Result<T> = std::result::Result<T, ChatError>;

/// Errors that can end a send attempt.
///
/// None of these are retried automatically; the caller re-invokes the send.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Establishing the live subscription failed
    #[error("Subscription error: {0}")]
    Subscription(String),

    /// Issuing the prompt or resume request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Fetching persisted thread logs failed
    #[error("Thread logs error: {0}")]
    ThreadLogs(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The session was released before its turn completed
    #[error("Session revoked before the turn completed")]
    Revoked,

    /// Resume requested without an active thread
    #[error("No active thread to resume")]
    NoThread,

    /// Payload (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ChatError {
    /// Create a subscription error
    pub fn subscription(msg: impl Into<String>) -> Self {
        ChatError::Subscription(msg.into())
    }

    /// Create a request error
    pub fn request(msg: impl Into<String>) -> Self {
        ChatError::Request(msg.into())
    }

    /// Create a thread logs error
    pub fn thread_logs(msg: impl Into<String>) -> Self {
        ChatError::ThreadLogs(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        ChatError::Configuration(msg.into())
    }
}
