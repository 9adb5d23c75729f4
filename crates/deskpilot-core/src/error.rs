//! Error types for deskpilot-core.
//!
//! Messages are lowercase and carry the session name or endpoint when one is
//! available, e.g. `"connect failed: 10.0.0.5:5901: connection refused"` or
//! `"session not found: bios-lab"`.

use std::time::Duration;

use thiserror::Error;

/// Result type alias using deskpilot's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by sessions, the registry, polling loops and scenarios.
#[derive(Error, Debug, Clone)]
pub enum Error {
    // ========================================================================
    // Session lifecycle
    // ========================================================================
    /// Connecting to the remote display server failed.
    #[error("connect failed: {endpoint}: {reason}")]
    Connection { endpoint: String, reason: String },

    /// An operation was attempted while the session was not connected.
    #[error("session not connected: {0}")]
    NotConnected(String),

    /// The transport broke mid-session; the session is now disconnected.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// Capture failed without the transport being declared dead.
    #[error("capture failed: {0}")]
    Capture(String),

    // ========================================================================
    // Input
    // ========================================================================
    /// A character in typed text has no key event mapping.
    #[error("unsupported character: {0:?}")]
    UnsupportedCharacter(char),

    /// A key name resolved to a token the backend cannot send.
    #[error("unsupported key: {0}")]
    UnsupportedKey(String),

    // ========================================================================
    // Lookup / budgets
    // ========================================================================
    /// A polling loop or bounded operation exceeded its budget.
    #[error("{operation} timed out after {elapsed:?}")]
    Timeout { operation: String, elapsed: Duration },

    /// Registry lookup miss.
    #[error("session not found: {0}")]
    NotFound(String),

    // ========================================================================
    // Everything else
    // ========================================================================
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Frame encoding failed.
    #[error("frame encoding failed: {0}")]
    Codec(String),

    #[error("config {operation} failed: {reason}")]
    Config { operation: String, reason: String },

    /// A blocking worker task panicked or was cancelled.
    #[error("worker task failed: {0}")]
    Worker(String),
}

impl Error {
    pub fn connection(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Connection {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, elapsed: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed,
        }
    }

    pub fn config(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Config {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidArgument(reason.into())
    }

    /// Whether this error moves a session to `Disconnected`.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::ConnectionLost(_) | Error::Worker(_))
    }

    /// Whether a polling loop should stop instead of counting a failed poll.
    pub fn ends_polling(&self) -> bool {
        matches!(self, Error::NotConnected(_) | Error::ConnectionLost(_))
    }

    /// Stable machine-readable code for structured responses.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Connection { .. } => "connection_error",
            Error::NotConnected(_) => "not_connected",
            Error::ConnectionLost(_) => "connection_lost",
            Error::Capture(_) => "transport_error",
            Error::UnsupportedCharacter(_) => "unsupported_character",
            Error::UnsupportedKey(_) => "unsupported_key",
            Error::Timeout { .. } => "timeout",
            Error::NotFound(_) => "not_found",
            Error::InvalidArgument(_) => "invalid_argument",
            Error::Codec(_) => "codec_error",
            Error::Config { .. } => "config_error",
            Error::Worker(_) => "worker_error",
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Worker(err.to_string())
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::Codec(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(Error::ConnectionLost("eof".into()).is_fatal());
        assert!(!Error::Capture("short read".into()).is_fatal());
        assert!(!Error::NotConnected("lab".into()).is_fatal());
        assert!(!Error::UnsupportedCharacter('\u{7}').is_fatal());
    }

    #[test]
    fn test_polling_termination() {
        assert!(Error::NotConnected("lab".into()).ends_polling());
        assert!(Error::ConnectionLost("reset".into()).ends_polling());
        assert!(!Error::timeout("capture", Duration::from_secs(10)).ends_polling());
    }

    #[test]
    fn test_messages_carry_context() {
        let err = Error::connection("10.0.0.5:5901", "connection refused");
        assert_eq!(err.to_string(), "connect failed: 10.0.0.5:5901: connection refused");
        assert_eq!(err.code(), "connection_error");
        assert_eq!(Error::NotFound("lab".into()).to_string(), "session not found: lab");
    }
}
