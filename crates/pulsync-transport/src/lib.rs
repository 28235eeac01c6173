//! # pulsync-transport
//!
//! Client-side transport abstraction for Pulsync push connections.
//!
//! A [`Connector`] opens a [`Connection`] to a URL obtained from the
//! handshake. Connections exchange text frames; decoding them is left to
//! the caller.
//!
//! ```rust,ignore
//! use pulsync_transport::{Connector, WebSocketConnector};
//!
//! let connector = WebSocketConnector::default();
//! let mut conn = connector.open("wss://example.invalid/link").await?;
//! while let Some(text) = conn.recv().await? {
//!     // Decode frame
//! }
//! ```

pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use traits::{Connection, ConnectionId, Connector, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConfig, WebSocketConnector};
