//! Transport abstraction for the arena session endpoint.
//!
//! A connection is split into two traits:
//!
//! - [`Connector`] performs one open attempt against a session endpoint and
//!   yields a connected transport. The session loop calls it once per
//!   attempt and may drop the returned future to abort the attempt.
//! - [`Transport`] is one open, bidirectional text message channel. It owns
//!   no retry policy; when it ends, it reports how through
//!   [`recv`](Transport::recv).
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use werewolf_arena_client::error::SessionError;
//! use werewolf_arena_client::protocol::SessionId;
//! use werewolf_arena_client::transport::{Connector, Transport};
//!
//! struct MyTransport { /* ... */ }
//! struct MyConnector;
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, message: String) -> Result<(), SessionError> {
//!         // Send the JSON text message over your transport
//!         todo!()
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, SessionError>> {
//!         // None = the server closed the session on purpose
//!         // Some(Err(_)) = the connection failed
//!         todo!()
//!     }
//!
//!     async fn close(&mut self) -> Result<(), SessionError> {
//!         todo!()
//!     }
//! }
//!
//! #[async_trait]
//! impl Connector for MyConnector {
//!     type Transport = MyTransport;
//!
//!     async fn open(
//!         &self,
//!         endpoint: &str,
//!         session_id: &SessionId,
//!     ) -> Result<MyTransport, SessionError> {
//!         todo!()
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::SessionError;
use crate::protocol::SessionId;

/// One open, bidirectional text message connection to a session endpoint.
///
/// # Close reasons
///
/// How a connection ends decides whether it is retried:
///
/// - `recv()` returning `None` means the server closed the session on
///   purpose. The client goes to `Disconnected` and does not reconnect.
/// - `recv()` returning `Some(Err(_))` means the connection failed. The
///   client schedules a reconnect while attempts remain.
///
/// # Cancel Safety
///
/// The [`recv`](Transport::recv) method **MUST** be cancel-safe because it is used
/// inside `tokio::select!`. If `recv` is cancelled before completion, calling it
/// again must not lose data.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send a JSON text message to the server.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::TransportSend`] if the message could not be sent,
    /// or [`SessionError::TransportClosed`] after [`close`](Transport::close).
    async fn send(&mut self, message: String) -> Result<(), SessionError>;

    /// Receive the next JSON text message from the server.
    ///
    /// Returns:
    /// - `Some(Ok(text))`: a complete message was received
    /// - `Some(Err(e))`: the connection failed
    /// - `None`: the server closed the session on purpose
    async fn recv(&mut self) -> Option<Result<String, SessionError>>;

    /// Close the connection. Calling it again after it succeeded is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the close handshake fails. Implementations should
    /// still release resources in that case.
    async fn close(&mut self) -> Result<(), SessionError>;
}

/// Opens connections to a session endpoint.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// The transport produced by a successful open.
    type Transport: Transport;

    /// Attempt to open a connection to `endpoint` for `session_id`.
    ///
    /// Suspends until the connection is open or has failed. The caller
    /// enforces the connect timeout and may drop the future to abort.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Connect`] (or [`SessionError::Io`]) on
    /// network failure, protocol failure or refusal.
    async fn open(
        &self,
        endpoint: &str,
        session_id: &SessionId,
    ) -> Result<Self::Transport, SessionError>;
}
