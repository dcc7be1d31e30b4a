//! Error types for netframe
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using NetframeError
pub type Result<T> = std::result::Result<T, NetframeError>;

/// Error type returned by user callbacks
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Unified error type for netframe operations
#[derive(Debug, Error)]
pub enum NetframeError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Codec Errors
    // -------------------------------------------------------------------------
    #[error("Pop of {requested} bytes exceeds the {remaining} unread payload bytes")]
    OutOfRange { requested: usize, remaining: usize },

    #[error("Truncated frame: expected {expected} bytes, got {actual}")]
    TruncatedFrame { expected: usize, actual: usize },

    #[error("Payload of {len} bytes does not fit the 32-bit size field")]
    PayloadTooLarge { len: usize },

    // -------------------------------------------------------------------------
    // Connection Errors
    // -------------------------------------------------------------------------
    #[error("Connection lost")]
    ConnectionLost,

    #[error("Timed out waiting for a message")]
    Timeout,

    // -------------------------------------------------------------------------
    // Usage Errors
    // -------------------------------------------------------------------------
    #[error("Client is not connected")]
    NotConnected,

    #[error("Client is already connected")]
    AlreadyConnected,

    #[error("Client was already shut down")]
    AlreadyShutDown,

    #[error("Already started")]
    AlreadyStarted,

    #[error("Not started")]
    NotStarted,

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    // -------------------------------------------------------------------------
    // Worker Errors
    // -------------------------------------------------------------------------
    #[error("Worker error: {0}")]
    Worker(String),
}

impl NetframeError {
    /// True for errors caused by calling the API in the wrong state
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            NetframeError::NotConnected
                | NetframeError::AlreadyConnected
                | NetframeError::AlreadyShutDown
                | NetframeError::AlreadyStarted
                | NetframeError::NotStarted
        )
    }
}
