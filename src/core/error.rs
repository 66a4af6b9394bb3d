//! Error types for the remote GPIO client.
//!
//! The taxonomy separates connection-fatal failures (transport, protocol,
//! timeout) from per-command daemon errors and synchronous caller misuse.

use std::time::Duration;

/// Convenience result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors produced by the client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Socket connect/read/write failure. Fatal to the connection.
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed or undecodable bytes on the wire. The stream cannot be
    /// resynchronized, so this is fatal to the connection.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// No response within the configured deadline. The daemon offers no
    /// per-request cancellation, so the connection is torn down.
    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    /// Negative status returned by the daemon for one command. Local to
    /// that command; the connection stays up.
    #[error("daemon error {code}: {message}")]
    Daemon { code: i32, message: String },

    /// Caller misuse detected before any I/O (duplicate GPIO registration,
    /// GPIO outside the permitted mask, bad frame geometry).
    #[error("validation error: {0}")]
    Validation(String),

    /// Invalid or inconsistent configuration.
    #[error("config error: {0}")]
    Config(String),

    /// Operation requires a connection but none is established.
    #[error("not connected")]
    NotConnected,
}

impl ClientError {
    /// Shorthand for a transport error with a formatted message.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Shorthand for a protocol error with a formatted message.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Shorthand for a validation error with a formatted message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Whether this error tears down the connection. Transport, protocol
    /// and timeout errors are connection-fatal; daemon and validation
    /// errors are local to the operation.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Protocol(_) | Self::Timeout(_)
        )
    }
}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        Self::Transport(e.to_string())
    }
}
