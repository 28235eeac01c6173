//! The persistent push connection.
//!
//! [`ConnectionManager`] owns the connection lifecycle: handshake, waiting
//! for `hello`, keepalive, and reconnecting with backoff after a loss. Each
//! opened transport is driven by a session task that acknowledges envelopes
//! and forwards decoded events to the [`EventDispatcher`].
//!
//! [`EventDispatcher`]: pulsync_core::EventDispatcher

mod backoff;
mod manager;
mod session;

pub use backoff::Backoff;
pub use manager::{ConnectionManager, ConnectionManagerBuilder};

use std::time::Duration;

use pulsync_transport::TransportError;
use thiserror::Error;

use crate::handshake::HandshakeError;

/// Connection manager configuration.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Time allowed for the handshake call.
    pub handshake_timeout: Duration,
    /// Time allowed between opening the transport and receiving `hello`.
    pub hello_timeout: Duration,
    /// Interval between liveness probes once connected.
    pub keepalive_interval: Duration,
    /// Reconnect delays.
    pub backoff: Backoff,
    /// Consecutive reconnect attempts before giving up.
    pub max_attempts: u32,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            hello_timeout: Duration::from_secs(10),
            keepalive_interval: Duration::from_secs(30),
            backoff: Backoff::default(),
            max_attempts: 10,
        }
    }
}

/// Connection manager errors.
#[derive(Debug, Error)]
pub enum SocketError {
    /// No app-level token is available.
    #[error("No app token available")]
    CredentialMissing,

    /// The handshake call failed.
    #[error("Handshake failed: {0}")]
    HandshakeFailed(#[from] HandshakeError),

    /// The transport could not be opened.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// An open transport was lost.
    #[error("Connection lost: {0}")]
    TransportLost(String),

    /// Automatic reconnection gave up.
    #[error("Gave up after {attempts} reconnect attempts")]
    RetriesExhausted { attempts: u32 },

    /// The manager's background task is gone.
    #[error("Connection manager is not running")]
    NotRunning,
}
