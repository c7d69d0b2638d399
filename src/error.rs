//! Error types for the Werewolf Arena session client.
//!
//! None of these cross the public [`SessionClient`](crate::SessionClient)
//! boundary: the client logs them and reports outcomes through lifecycle
//! events and boolean returns. They are public so that custom
//! [`Transport`](crate::Transport) and [`Connector`](crate::Connector)
//! implementations can return them.

use thiserror::Error;

/// Errors that can occur inside the session client and its transports.
#[derive(Debug, Error)]
pub enum SessionError {
    /// An open attempt failed (network failure, refusal, handshake error).
    #[error("connect error: {0}")]
    Connect(String),

    /// The session identifier is empty or a placeholder value.
    #[error("invalid session id: {0:?}")]
    InvalidSessionId(String),

    /// A message was sent while no connection was open.
    #[error("cannot send message, not connected")]
    SendWithoutConnection,

    /// Every automatic reconnect attempt failed.
    #[error("max reconnection attempts reached ({attempts})")]
    RetryExhausted {
        /// Number of reconnect attempts performed before giving up.
        attempts: u32,
    },

    /// Failed to send a message through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a message from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was already closed.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a wire envelope.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An open attempt did not complete within the connect timeout.
    #[error("operation timed out")]
    Timeout,

    /// The background session loop has stopped.
    #[error("session client shut down")]
    ClientShutDown,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for session client operations.
pub type Result<T> = std::result::Result<T, SessionError>;

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn retry_exhausted_message_names_attempts() {
        let err = SessionError::RetryExhausted { attempts: 5 };
        assert_eq!(err.to_string(), "max reconnection attempts reached (5)");
    }

    #[test]
    fn serde_errors_convert() {
        let raw = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err();
        let err: SessionError = raw.into();
        assert!(matches!(err, SessionError::Serialization(_)));
    }
}
