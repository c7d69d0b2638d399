//! WebSocket transport implementation using `tokio-tungstenite`.
//!
//! This module provides [`WebSocketTransport`], a [`Transport`]
//! implementation that communicates over a WebSocket connection, and
//! [`WebSocketConnector`], which opens one per session. Both `ws://` and
//! `wss://` URLs are supported; TLS is handled via
//! [`MaybeTlsStream`](tokio_tungstenite::MaybeTlsStream).
//!
//! # Close classification
//!
//! A close frame carrying `1000 Normal` ends the session for good
//! ([`recv`](Transport::recv) returns `None`). Any other close code, a close
//! frame without a code, or a stream that ends without a close frame is
//! reported as a failure and will be retried by the session client. See
//! [`CloseCode`].
//!
//! # Feature gate
//!
//! This module is only available when the `transport-websocket` feature is enabled
//! (it is enabled by default).
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), werewolf_arena_client::SessionError> {
//! use werewolf_arena_client::{Transport, WebSocketTransport};
//!
//! let mut transport = WebSocketTransport::connect("ws://localhost:8000/ws/abc").await?;
//! transport.send(r#"{"type":"ping"}"#.to_string()).await?;
//!
//! if let Some(Ok(msg)) = transport.recv().await {
//!     println!("received: {msg}");
//! }
//!
//! transport.close().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::close_codes::CloseCode;
use crate::error::SessionError;
use crate::event::CloseReason;
use crate::protocol::SessionId;
use crate::transport::{Connector, Transport};

/// Type alias for the underlying WebSocket stream.
pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// A [`Transport`] implementation backed by a WebSocket connection.
///
/// # Cancel Safety
///
/// The [`recv`](Transport::recv) method is cancel-safe. Dropping the future
/// returned by `recv` before it completes will not consume or lose any messages,
/// making it safe to use inside `tokio::select!`.
#[derive(Debug)]
pub struct WebSocketTransport {
    stream: WsStream,
    closed: bool,
}

impl WebSocketTransport {
    /// Establish a new WebSocket connection to the given URL.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Io`] when the TCP connection cannot be
    /// established (the [`ErrorKind`](std::io::ErrorKind) is preserved), and
    /// [`SessionError::Connect`] for an invalid URL or a rejected handshake
    /// (for example an unknown session answered with HTTP 404).
    pub async fn connect(url: &str) -> Result<Self, SessionError> {
        tracing::debug!(url = %url, "connecting to WebSocket server");

        let (stream, _response) =
            tokio_tungstenite::connect_async(url)
                .await
                .map_err(|e| match e {
                    tokio_tungstenite::tungstenite::Error::Io(io) => SessionError::Io(io),
                    other => SessionError::Connect(other.to_string()),
                })?;

        tracing::info!(url = %url, "WebSocket connection established");

        Ok(Self {
            stream,
            closed: false,
        })
    }

    /// Create a [`WebSocketTransport`] from an already-established WebSocket stream.
    ///
    /// This is useful when you need custom TLS configuration, proxy headers, or
    /// any other connection setup that [`connect`](Self::connect) does not expose.
    pub fn from_stream(stream: WsStream) -> Self {
        Self {
            stream,
            closed: false,
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, message: String) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::TransportClosed);
        }
        self.stream
            .send(Message::Text(message.into()))
            .await
            .map_err(|e| SessionError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, SessionError>> {
        loop {
            let msg = match self.stream.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => {
                    return Some(Err(SessionError::TransportReceive(e.to_string())));
                }
                None => {
                    return Some(Err(SessionError::TransportReceive(
                        "connection dropped without close frame".into(),
                    )));
                }
            };

            match msg {
                Message::Text(text) => return Some(Ok(text.to_string())),
                Message::Close(frame) => {
                    tracing::debug!(?frame, "received WebSocket close frame");
                    let reason = match &frame {
                        Some(frame) => CloseCode::from_u16(u16::from(frame.code))
                            .classify(frame.reason.as_str()),
                        None => CloseCode::Status.classify(""),
                    };
                    return match reason {
                        CloseReason::NetworkFailure(detail) => {
                            Some(Err(SessionError::TransportReceive(detail)))
                        }
                        CloseReason::ServerInitiated | CloseReason::ClientInitiated => None,
                    };
                }
                Message::Ping(_) => {
                    // tungstenite queues the Pong reply itself.
                    tracing::debug!("received WebSocket ping");
                }
                Message::Pong(_) => {
                    tracing::debug!("received WebSocket pong (ignored)");
                }
                Message::Binary(_) => {
                    tracing::warn!("received unexpected binary WebSocket frame, skipping");
                }
                Message::Frame(_) => {
                    // Never produced by the read half.
                    tracing::debug!("received raw WebSocket frame, skipping");
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream
            .close(None)
            .await
            .map_err(|e| SessionError::TransportSend(e.to_string()))
    }
}

/// Opens a [`WebSocketTransport`] per connect attempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    type Transport = WebSocketTransport;

    async fn open(
        &self,
        endpoint: &str,
        session_id: &SessionId,
    ) -> Result<WebSocketTransport, SessionError> {
        tracing::debug!(session = %session_id, "opening session endpoint");
        WebSocketTransport::connect(endpoint).await
    }
}

#[cfg(test)]
#[cfg(feature = "transport-websocket")]
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
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
    use tokio_tungstenite::tungstenite::protocol::frame::CloseFrame;

    #[test]
    fn websocket_transport_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<WebSocketTransport>();
    }

    #[tokio::test]
    async fn connect_fails_with_invalid_url() {
        let result = WebSocketTransport::connect("not-a-valid-url").await;
        let err = result.unwrap_err();
        assert!(matches!(err, SessionError::Connect(_)));
    }

    #[tokio::test]
    async fn connect_fails_with_unreachable_host() {
        let result = WebSocketTransport::connect("ws://127.0.0.1:1").await;
        let err = result.unwrap_err();
        assert!(matches!(err, SessionError::Io(_)));
    }

    // ── Mock-stream helpers ──────────────────────────────────────────────

    /// Start a local WebSocket server that runs `handler` on the accepted
    /// connection and returns the address to connect to.
    async fn start_mock_server<F, Fut>(handler: F) -> String
    where
        F: FnOnce(tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>) -> Fut
            + Send
            + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            handler(ws).await;
        });

        format!("ws://{addr}")
    }

    fn close_frame(code: WsCloseCode, reason: &str) -> CloseFrame {
        CloseFrame {
            code,
            reason: reason.to_string().into(),
        }
    }

    // ── Mock-stream tests ────────────────────────────────────────────────

    #[tokio::test]
    async fn recv_receives_text_messages() {
        let url = start_mock_server(|mut ws| async move {
            ws.send(Message::Text("hello".into())).await.unwrap();
            ws.send(Message::Text("world".into())).await.unwrap();
            ws.close(Some(close_frame(WsCloseCode::Normal, ""))).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();

        assert_eq!(transport.recv().await.unwrap().unwrap(), "hello");
        assert_eq!(transport.recv().await.unwrap().unwrap(), "world");
    }

    #[tokio::test]
    async fn from_stream_wraps_established_connection() {
        let url = start_mock_server(|mut ws| async move {
            let echoed = ws.next().await.unwrap().unwrap();
            ws.send(echoed).await.unwrap();
            ws.close(Some(close_frame(WsCloseCode::Normal, ""))).await.unwrap();
        })
        .await;

        let addr = url.trim_start_matches("ws://");
        let tcp = tokio::net::TcpStream::connect(addr).await.unwrap();
        let (stream, _) =
            tokio_tungstenite::client_async(url.as_str(), tokio_tungstenite::MaybeTlsStream::Plain(tcp))
                .await
                .unwrap();

        let mut transport = WebSocketTransport::from_stream(stream);
        transport.send(r#"{"type":"vote"}"#.to_string()).await.unwrap();
        assert_eq!(transport.recv().await.unwrap().unwrap(), r#"{"type":"vote"}"#);
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn normal_close_frame_is_server_initiated() {
        let url = start_mock_server(|mut ws| async move {
            ws.close(Some(close_frame(WsCloseCode::Normal, "game over")))
                .await
                .unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn abnormal_close_frame_is_a_failure() {
        let url = start_mock_server(|mut ws| async move {
            ws.close(Some(close_frame(WsCloseCode::Error, "boom")))
                .await
                .unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        match transport.recv().await {
            Some(Err(SessionError::TransportReceive(detail))) => {
                assert_eq!(detail, "closed with code 1011: boom");
            }
            other => panic!("expected receive error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn close_frame_without_code_is_a_failure() {
        let url = start_mock_server(|mut ws| async move {
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        assert!(matches!(transport.recv().await, Some(Err(_))));
    }

    #[tokio::test]
    async fn recv_skips_binary_frames() {
        let url = start_mock_server(|mut ws| async move {
            ws.send(Message::Binary(vec![0xDE, 0xAD].into()))
                .await
                .unwrap();
            ws.send(Message::Text("after_binary".into())).await.unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();

        let msg = transport.recv().await.unwrap().unwrap();
        assert_eq!(msg, "after_binary");
    }

    #[tokio::test]
    async fn send_after_close_returns_transport_closed() {
        let url = start_mock_server(|mut ws| async move {
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport.close().await.unwrap();

        let err = transport.send("oops".to_string()).await.unwrap_err();
        assert!(matches!(err, SessionError::TransportClosed));
    }

    #[tokio::test]
    async fn double_close_is_idempotent() {
        let url =
            start_mock_server(|mut ws| async move { while let Some(Ok(_)) = ws.next().await {} })
                .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn send_round_trip() {
        let url = start_mock_server(|mut ws| async move {
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                ws.send(Message::Text(text)).await.unwrap();
            }
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport
            .send(r#"{"type":"guess","data":{"player":3}}"#.to_string())
            .await
            .unwrap();

        let msg = transport.recv().await.unwrap().unwrap();
        assert_eq!(msg, r#"{"type":"guess","data":{"player":3}}"#);
    }

    #[tokio::test]
    async fn connector_opens_session_path() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (path_tx, path_rx) = tokio::sync::oneshot::channel::<String>();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                let _ = path_tx.send(req.uri().path().to_string());
                Ok(resp)
            };
            let mut ws = tokio_tungstenite::accept_hdr_async(tcp, callback)
                .await
                .unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });

        let session = SessionId::new("abc").unwrap();
        let endpoint = crate::protocol::session_endpoint(&format!("ws://{addr}"), &session);
        let mut transport = WebSocketConnector.open(&endpoint, &session).await.unwrap();

        assert_eq!(path_rx.await.unwrap(), "/ws/abc");
        transport.close().await.unwrap();
    }
}
