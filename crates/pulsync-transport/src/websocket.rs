//! WebSocket connector.
//!
//! This module opens client WebSocket connections (plain or TLS) using
//! tokio-tungstenite.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, trace, warn};

use crate::traits::{Connection, ConnectionId, Connector, TransportError};

/// WebSocket connector configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Time allowed for the TCP, TLS and upgrade handshakes.
    pub connect_timeout: Duration,
    /// Maximum inbound message size in bytes.
    pub max_message_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            max_message_size: 4 * 1024 * 1024, // 4 MB
        }
    }
}

/// Opens WebSocket connections.
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector {
    config: WebSocketConfig,
}

impl WebSocketConnector {
    /// Create a connector with custom configuration.
    #[must_use]
    pub fn new(config: WebSocketConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, url: &str) -> Result<Box<dyn Connection>, TransportError> {
        let (stream, response) =
            match tokio::time::timeout(self.config.connect_timeout, connect_async(url)).await {
                Ok(Ok(pair)) => pair,
                Ok(Err(e)) => {
                    error!("WebSocket connect failed: {}", e);
                    return Err(TransportError::ConnectFailed(e.to_string()));
                }
                Err(_) => return Err(TransportError::Timeout),
            };

        let conn = WebSocketConnection::new(stream, self.config.max_message_size);
        debug!(
            connection = %conn.id,
            status = response.status().as_u16(),
            "WebSocket connected"
        );
        Ok(Box::new(conn))
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

/// A client WebSocket connection.
pub struct WebSocketConnection {
    id: ConnectionId,
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    is_open: bool,
    awaiting_pong: bool,
    max_message_size: usize,
}

impl WebSocketConnection {
    fn new(stream: WebSocketStream<MaybeTlsStream<TcpStream>>, max_message_size: usize) -> Self {
        Self {
            id: ConnectionId::generate(),
            stream,
            is_open: true,
            awaiting_pong: false,
            max_message_size,
        }
    }

    fn check_size(&self, len: usize) -> Result<(), TransportError> {
        if len > self.max_message_size {
            warn!(
                "Message too large: {} bytes (max: {})",
                len, self.max_message_size
            );
            return Err(TransportError::MessageTooLarge(len));
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for WebSocketConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    self.check_size(text.len())?;
                    return Ok(Some(text));
                }
                Some(Ok(Message::Binary(data))) => {
                    self.check_size(data.len())?;
                    return String::from_utf8(data)
                        .map(Some)
                        .map_err(|e| TransportError::ReceiveFailed(e.to_string()));
                }
                Some(Ok(Message::Pong(_))) => {
                    trace!(connection = %self.id, "Pong received");
                    self.awaiting_pong = false;
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Frame(_))) => {
                    // Pongs are queued by tungstenite itself
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(connection = %self.id, ?frame, "Received close frame");
                    self.is_open = false;
                    return Ok(None);
                }
                Some(Err(WsError::ConnectionClosed)) | None => {
                    debug!(connection = %self.id, "WebSocket stream ended");
                    self.is_open = false;
                    return Ok(None);
                }
                Some(Err(e)) => {
                    error!("WebSocket error: {}", e);
                    self.is_open = false;
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
            }
        }
    }

    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        if !self.is_open {
            return Err(TransportError::ConnectionClosed);
        }

        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        if !self.is_open {
            return Err(TransportError::ConnectionClosed);
        }
        if self.awaiting_pong {
            return Err(TransportError::Timeout);
        }

        self.stream
            .send(Message::Ping(Vec::new()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        self.awaiting_pong = true;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !std::mem::replace(&mut self.is_open, false) {
            return Ok(()); // Already closed
        }

        match self.stream.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(TransportError::SendFailed(format!("Failed to close: {}", e))),
        }
    }

    fn is_open(&self) -> bool {
        self.is_open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn server() -> (String, TcpListener) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        (url, listener)
    }

    #[test]
    fn test_websocket_config_default() {
        let config = WebSocketConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.max_message_size, 4 * 1024 * 1024);
    }

    #[tokio::test]
    async fn test_text_exchange_and_close() {
        let (url, listener) = server().await;
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            ws.send(Message::Text(r#"{"type":"hello"}"#.to_string()))
                .await
                .unwrap();
            let reply = ws.next().await.unwrap().unwrap();
            ws.close(None).await.unwrap();
            reply
        });

        let connector = WebSocketConnector::default();
        assert_eq!(connector.name(), "websocket");
        let mut conn = connector.open(&url).await.unwrap();

        assert_eq!(conn.recv().await.unwrap().as_deref(), Some(r#"{"type":"hello"}"#));
        conn.send(r#"{"envelope_id":"e1"}"#.to_string()).await.unwrap();
        assert!(conn.recv().await.unwrap().is_none());
        assert!(!conn.is_open());
        assert!(matches!(
            conn.send("late".to_string()).await,
            Err(TransportError::ConnectionClosed)
        ));

        let reply = server.await.unwrap();
        assert_eq!(reply, Message::Text(r#"{"envelope_id":"e1"}"#.to_string()));
    }

    #[tokio::test]
    async fn test_unanswered_ping_fails() {
        let (url, listener) = server().await;
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            // Hold the socket open without reading so no pong is ever sent.
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(ws);
        });

        let mut conn = WebSocketConnector::default().open(&url).await.unwrap();
        conn.ping().await.unwrap();
        assert!(matches!(conn.ping().await, Err(TransportError::Timeout)));

        server.abort();
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let (url, listener) = server().await;
        drop(listener);

        let result = WebSocketConnector::default().open(&url).await;
        assert!(matches!(result, Err(TransportError::ConnectFailed(_))));
    }
}
