//! # pulsync-client
//!
//! Network clients of the Pulsync realtime sync layer:
//!
//! - [`ConnectionManager`] keeps a socket-mode push connection alive,
//!   acknowledges envelopes and delivers decoded events to an
//!   [`EventDispatcher`](pulsync_core::EventDispatcher)
//! - [`ApiClient`] pages through the Web API and caches channels and users
//! - [`EventStreamClient`] consumes `text/event-stream` responses
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use pulsync_client::{ConnectionManager, EnvCredentials, HttpHandshake};
//! use pulsync_transport::WebSocketConnector;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let handshake = HttpHandshake::new(
//!     reqwest::Client::new(),
//!     "https://slack.com/api",
//!     std::time::Duration::from_secs(10),
//! );
//! let manager = ConnectionManager::builder(
//!     Arc::new(EnvCredentials),
//!     Arc::new(handshake),
//!     Arc::new(WebSocketConnector::default()),
//! )
//! .spawn();
//!
//! let mut general = manager.subscribe_channel("C024BE91L");
//! manager.connect().await?;
//! while let Some(event) = general.recv().await {
//!     println!("{:?}", event.kind());
//! }
//! # Ok(())
//! # }
//! ```

pub mod credentials;
pub mod handshake;
pub mod metrics;
pub mod rest;
pub mod socket;
pub mod stream;

pub use credentials::{CredentialSource, EnvCredentials, StaticCredentials};
pub use handshake::{Handshake, HandshakeError, HttpHandshake};
pub use rest::{ApiClient, ApiConfig, ApiError, Channel, HistoryPage, HistoryQuery, Page, User};
pub use socket::{Backoff, ConnectionManager, ConnectionManagerBuilder, SocketConfig, SocketError};
pub use stream::{
    CompletionChunk, CompletionCollector, EventStreamClient, StreamConfig, StreamError,
    StreamHandle,
};
