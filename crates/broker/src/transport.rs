//! Transport seam between the session actor and the wire.

use crate::error::BrokerError;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

/// One bidirectional text-frame connection to the broker.
#[async_trait]
pub trait BrokerTransport: Send + 'static {
    async fn send(&mut self, text: String) -> Result<(), BrokerError>;

    /// Next inbound frame; `None` means the peer closed the connection.
    async fn recv(&mut self) -> Result<Option<String>, BrokerError>;

    async fn shutdown(&mut self);
}

/// Creates transports; one factory serves every session.
#[async_trait]
pub trait TransportFactory: Send + Sync + 'static {
    type Transport: BrokerTransport;

    async fn connect(&self) -> Result<Self::Transport, BrokerError>;
}

// =============================================================================
// WebSocket transport
// =============================================================================

/// Live WebSocket transport with keepalive pings.
pub struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    last_ping: std::time::Instant,
}

#[async_trait]
impl BrokerTransport for WsTransport {
    async fn send(&mut self, text: String) -> Result<(), BrokerError> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| BrokerError::Transport(e.to_string()))
    }

    async fn recv(&mut self) -> Result<Option<String>, BrokerError> {
        // Keep the connection alive across quiet stretches.
        if self.last_ping.elapsed() > std::time::Duration::from_secs(50) {
            self.stream
                .send(Message::Ping(Vec::new()))
                .await
                .map_err(|e| BrokerError::Transport(e.to_string()))?;
            self.last_ping = std::time::Instant::now();
        }

        loop {
            let Some(msg) = self.stream.next().await else {
                return Ok(None);
            };
            match msg.map_err(|e| BrokerError::Transport(e.to_string()))? {
                Message::Text(text) => return Ok(Some(text)),
                Message::Close(_) => {
                    tracing::warn!("broker websocket closed by peer");
                    return Ok(None);
                }
                // Pings are answered by tungstenite; pongs and binary frames
                // carry nothing we consume.
                _ => {}
            }
        }
    }

    async fn shutdown(&mut self) {
        let _ = self.stream.close(None).await;
    }
}

/// Factory for live WebSocket connections.
pub struct WsFactory {
    ws_url: String,
}

impl WsFactory {
    #[must_use]
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self { ws_url: ws_url.into() }
    }
}

#[async_trait]
impl TransportFactory for WsFactory {
    type Transport = WsTransport;

    async fn connect(&self) -> Result<WsTransport, BrokerError> {
        tracing::debug!("connecting broker websocket: {}", self.ws_url);
        let (stream, response) = connect_async(&self.ws_url)
            .await
            .map_err(|e| BrokerError::Transport(format!("connect {}: {e}", self.ws_url)))?;
        tracing::info!(
            "broker websocket connected to {} (HTTP status: {})",
            self.ws_url,
            response.status()
        );
        Ok(WsTransport {
            stream,
            last_ping: std::time::Instant::now(),
        })
    }
}
