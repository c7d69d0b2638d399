//! # Live Session Example
//!
//! Demonstrates a complete Werewolf Arena session lifecycle:
//!
//! 1. Join a game session over WebSocket
//! 2. Mirror connection status into an application store
//! 3. React to game updates relayed by the server
//! 4. Ride out network drops with automatic reconnects
//! 5. Shut down gracefully on Ctrl+C or when the session ends
//!
//! ## Running
//!
//! ```sh
//! # Start a Werewolf Arena server on localhost:8000, then:
//! cargo run --example live_session -- <session-id>
//!
//! # Override the server URL:
//! WEREWOLF_ARENA_WS_URL=ws://my-server:8000 cargo run --example live_session -- abc
//! ```

use std::sync::Arc;

use tokio::sync::mpsc;
use werewolf_arena_client::{
    SessionClient, SessionConfig, SessionEvent, StatusBridge, StatusStore,
};

/// Status store that writes every update to the log.
struct LogStatus;

impl StatusStore for LogStatus {
    fn set_connected(&self, connected: bool) {
        tracing::info!("[status] connected={connected}");
    }

    fn set_message(&self, message: String) {
        tracing::info!("[status] {message}");
    }

    fn set_error(&self, error: String) {
        tracing::error!("[status] error: {error}");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    // Initialize tracing. Set `RUST_LOG=debug` for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Configuration ───────────────────────────────────────────────
    let Some(session_id) = std::env::args().nth(1) else {
        return Err("usage: live_session <session-id>".into());
    };
    let config = SessionConfig::from_env();
    tracing::info!("Joining session {session_id} at {}", config.base_url);

    let mut client = SessionClient::websocket(config);

    // ── Status bridge ───────────────────────────────────────────────
    // Lifecycle events update the store; the bridge owns connect,
    // disconnect and error.
    StatusBridge::new(Arc::new(LogStatus)).attach(&client);

    // ── Game handlers ───────────────────────────────────────────────
    // Handlers run on the session loop, so anything that should end the
    // demo goes through a channel.
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<&'static str>();

    client.on("game_update", |event| {
        if let Some(payload) = event.payload() {
            tracing::info!("Game update: {payload}");
        }
    });

    let done = done_tx.clone();
    client.on("game_over", move |event| {
        if let SessionEvent::Message { payload, .. } = event {
            tracing::info!("Game over: {payload}");
        }
        let _ = done.send("game over");
    });

    // ── Connect ─────────────────────────────────────────────────────
    if !client.connect(session_id.as_str()).await {
        tracing::warn!("Initial connect failed; retrying in the background");
    }

    // ── Wait ────────────────────────────────────────────────────────
    loop {
        tokio::select! {
            reason = done_rx.recv() => {
                tracing::info!("Session finished: {}", reason.unwrap_or("handlers dropped"));
                break;
            }

            _ = tokio::time::sleep(std::time::Duration::from_secs(1)) => {
                if client.status() == werewolf_arena_client::ConnectionState::Failed {
                    tracing::error!("Giving up after {} attempts", client.reconnect_attempts());
                    break;
                }
            }

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, shutting down…");
                break;
            }
        }
    }

    // ── Cleanup ─────────────────────────────────────────────────────
    client.disconnect();
    client.shutdown().await;
    drop(done_tx);
    tracing::info!("Client shut down. Goodbye!");
    Ok(())
}
