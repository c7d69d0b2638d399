//! # Werewolf Arena Client
//!
//! Resilient real-time session client for Werewolf Arena game servers.
//!
//! A [`SessionClient`] keeps one session connection alive. It reconnects
//! with linear backoff after network failures, stops at a bounded number of
//! attempts, and routes server messages and lifecycle notifications to
//! per-event handlers.
//!
//! ## Features
//!
//! - **Transport-agnostic**: implement [`Connector`] and [`Transport`] for any backend
//! - **WebSocket built-in**: default `transport-websocket` feature provides [`WebSocketConnector`]
//! - **Stale-safe**: every open attempt is epoch-tagged, so a `disconnect` always wins
//! - **Status bridge**: mirror connection state into an application store via [`StatusBridge`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use werewolf_arena_client::{SessionClient, SessionConfig};
//!
//! # async fn run() {
//! let client = SessionClient::websocket(SessionConfig::from_env());
//! client.on("game_update", |event| println!("{event:?}"));
//!
//! if client.connect("abc").await {
//!     client.send("vote", serde_json::json!({ "target": 3 }));
//! }
//! # }
//! ```

pub mod client;
pub mod close_codes;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod protocol;
pub mod reconnect;
pub mod status;
pub mod transport;
pub mod transports;

// Re-export primary types for ergonomic imports.
pub use client::{SessionClient, SessionConfig};
pub use close_codes::CloseCode;
pub use dispatcher::EventDispatcher;
pub use error::SessionError;
pub use event::{CloseReason, RetryProgress, SessionEvent};
pub use protocol::{Envelope, SessionId};
pub use reconnect::{ConnectionState, ReconnectController, RetryPolicy};
pub use status::{StatusBridge, StatusStore};
pub use transport::{Connector, Transport};

#[cfg(feature = "transport-websocket")]
pub use transports::{WebSocketConnector, WebSocketTransport};
