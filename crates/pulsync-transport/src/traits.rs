//! Transport abstraction traits.
//!
//! The connection manager only talks to these traits, so tests can swap
//! the WebSocket connector for an in-memory one.

use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

/// Identifier of one opened transport, for logging.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a new connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a process-unique connection ID.
    #[must_use]
    pub fn generate() -> Self {
        let n = NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{:x}", n))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Transport errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Connecting or a liveness probe timed out.
    #[error("Connection timed out")]
    Timeout,

    /// Failed to open the connection.
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Inbound message exceeds the configured limit.
    #[error("Message size {0} exceeds limit")]
    MessageTooLarge(usize),
}

/// Opens client connections.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection to `url`.
    async fn open(&self, url: &str) -> Result<Box<dyn Connection>, TransportError>;

    /// Get the connector name (e.g., "websocket").
    fn name(&self) -> &'static str;
}

/// An open duplex connection carrying text frames.
///
/// A connection has a single owner; `recv` must be cancel-safe so it can
/// sit in a `select!` next to timers.
#[async_trait]
pub trait Connection: Send {
    /// Get the connection's identifier.
    fn id(&self) -> &ConnectionId;

    /// Receive the next text frame.
    ///
    /// Returns `None` if the connection is closed cleanly.
    async fn recv(&mut self) -> Result<Option<String>, TransportError>;

    /// Send a text frame.
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Send a liveness probe.
    ///
    /// Fails if the connection is closed or the previous probe was never
    /// answered.
    async fn ping(&mut self) -> Result<(), TransportError>;

    /// Close the connection gracefully.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Check if the connection is still open.
    fn is_open(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_generation() {
        let id1 = ConnectionId::generate();
        let id2 = ConnectionId::generate();
        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("conn_"));
    }

    #[test]
    fn test_transport_error_is_comparable() {
        let err = TransportError::SendFailed("broken pipe".to_string());
        assert_eq!(err.clone(), err);
        assert_ne!(err, TransportError::ConnectionClosed);
        assert_eq!(
            TransportError::MessageTooLarge(9).to_string(),
            "Message size 9 exceeds limit"
        );
    }

    #[test]
    fn test_connection_id_from_str() {
        let id: ConnectionId = "test-id".into();
        assert_eq!(id.to_string(), "test-id");
    }
}
