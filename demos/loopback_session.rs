//! # Loopback Session Example
//!
//! Shows how to implement the [`Connector`] and [`Transport`] traits with an
//! in-process loopback channel. This is useful for:
//!
//! - **Testing**: exercise your game handlers without a real server
//! - **Custom backends**: adapt any I/O layer (TCP, QUIC, WebRTC data channels)
//!
//! The fake server greets the client, answers a vote, then drops the
//! connection once so the automatic reconnect can be observed.
//!
//! ## Running
//!
//! ```sh
//! cargo run --example loopback_session
//! ```

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use werewolf_arena_client::{
    Connector, SessionClient, SessionConfig, SessionError, SessionEvent, SessionId, Transport,
};

// ─────────────────────────────────────────────────────────────────────
// Step 1: Define a channel-based "loopback" transport
// ─────────────────────────────────────────────────────────────────────

/// What the fake server pushes at the client.
enum ServerFrame {
    Text(String),
    Drop(String),
}

/// The client half of one loopback connection.
pub struct LoopbackTransport {
    /// Messages the client sends go here (server reads from the other end).
    tx: mpsc::UnboundedSender<String>,
    /// Frames the server sends arrive here (client reads them).
    rx: mpsc::UnboundedReceiver<ServerFrame>,
}

/// The "server side" of one loopback connection.
struct LoopbackServer {
    session_id: SessionId,
    rx: mpsc::UnboundedReceiver<String>,
    tx: mpsc::UnboundedSender<ServerFrame>,
}

// ─────────────────────────────────────────────────────────────────────
// Step 2: Implement the Transport and Connector traits
// ─────────────────────────────────────────────────────────────────────

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&mut self, message: String) -> Result<(), SessionError> {
        self.tx
            .send(message)
            .map_err(|e| SessionError::TransportSend(e.to_string()))
    }

    /// A closed server channel is a clean, server-initiated close.
    ///
    /// This method is **cancel-safe** because `mpsc::UnboundedReceiver::recv`
    /// is cancel-safe.
    async fn recv(&mut self) -> Option<Result<String, SessionError>> {
        match self.rx.recv().await? {
            ServerFrame::Text(text) => Some(Ok(text)),
            ServerFrame::Drop(reason) => Some(Err(SessionError::TransportReceive(reason))),
        }
    }

    /// Close is a no-op for channels; dropping is sufficient.
    async fn close(&mut self) -> Result<(), SessionError> {
        Ok(())
    }
}

/// Hands each accepted connection's server half to the fake server task.
struct LoopbackConnector {
    accepted: mpsc::UnboundedSender<LoopbackServer>,
}

#[async_trait]
impl Connector for LoopbackConnector {
    type Transport = LoopbackTransport;

    async fn open(
        &self,
        endpoint: &str,
        session_id: &SessionId,
    ) -> Result<LoopbackTransport, SessionError> {
        tracing::info!("Loopback open: {endpoint}");
        let (client_tx, server_rx) = mpsc::unbounded_channel();
        let (server_tx, client_rx) = mpsc::unbounded_channel();
        self.accepted
            .send(LoopbackServer {
                session_id: session_id.clone(),
                rx: server_rx,
                tx: server_tx,
            })
            .map_err(|_| SessionError::Connect("loopback server is gone".into()))?;
        Ok(LoopbackTransport {
            tx: client_tx,
            rx: client_rx,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────
// Step 3: A fake server that speaks the envelope format
// ─────────────────────────────────────────────────────────────────────

fn envelope(event: &str, data: serde_json::Value) -> ServerFrame {
    ServerFrame::Text(serde_json::json!({ "type": event, "data": data }).to_string())
}

async fn run_server(mut accepted: mpsc::UnboundedReceiver<LoopbackServer>) {
    let mut connections = 0;
    while let Some(mut conn) = accepted.recv().await {
        connections += 1;
        let _ = conn.tx.send(envelope(
            "connection_established",
            serde_json::json!({ "session_id": conn.session_id.as_str() }),
        ));
        let _ = conn.tx.send(envelope("ping", serde_json::Value::Null));

        if connections == 1 {
            // First connection: answer one vote, then drop the link.
            while let Some(raw) = conn.rx.recv().await {
                tracing::info!("Server received: {raw}");
                if raw.contains("\"vote\"") {
                    let _ = conn.tx.send(envelope(
                        "game_update",
                        serde_json::json!({ "phase": "night", "round": 1 }),
                    ));
                    let _ = conn.tx.send(ServerFrame::Drop("cable unplugged".into()));
                    break;
                }
            }
        } else {
            // Second connection: finish the game and close cleanly.
            let _ = conn.tx.send(envelope(
                "game_over",
                serde_json::json!({ "winner": "villagers" }),
            ));
            drop(conn);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────
// Step 4: Wire together the client and the fake server
// ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for readable output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
    tokio::spawn(run_server(accepted_rx));

    let config = SessionConfig::new("loopback://arena").with_base_delay(Duration::from_millis(200));
    let mut client = SessionClient::new(
        LoopbackConnector {
            accepted: accepted_tx,
        },
        config,
    );

    // Forward everything interesting into one channel for the demo loop.
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<SessionEvent>();
    for name in ["connect", "disconnect", "error", "game_update", "game_over"] {
        let tx = event_tx.clone();
        client.on(name, move |event| {
            let _ = tx.send(event.clone());
        });
    }
    drop(event_tx);

    if !client.connect("demo-game").await {
        return Err("loopback connect failed".into());
    }

    let mut voted = false;
    while let Some(event) = event_rx.recv().await {
        match &event {
            SessionEvent::Connected { session_id } => {
                tracing::info!("Event: connected to {session_id}");
                if !voted {
                    client.send("vote", serde_json::json!({ "target": 3 }));
                    voted = true;
                }
            }
            SessionEvent::Disconnected { reason, retry } => {
                tracing::info!("Event: disconnected ({reason}), retry: {retry:?}");
            }
            SessionEvent::Error { message, .. } => {
                tracing::error!("Event: error: {message}");
                break;
            }
            SessionEvent::Message { name, payload } => {
                tracing::info!("Event: {name} {payload}");
                if name == "game_over" {
                    break;
                }
            }
        }
    }

    // ── Clean shutdown ──────────────────────────────────────────────
    client.shutdown().await;
    tracing::info!("Done. Loopback session works!");
    Ok(())
}
