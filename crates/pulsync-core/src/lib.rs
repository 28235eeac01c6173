//! # pulsync-core
//!
//! Shared building blocks of the Pulsync realtime sync layer:
//!
//! - **ConnectionState** - Observable lifecycle of the push connection
//! - **IdCache** - Remote-ID keyed caches for channels and users
//! - **EventDispatcher** - Fan-out of decoded events to listeners and streams
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌─────────────────┐     ┌─────────────┐
//! │  Connection  │────▶│ EventDispatcher │────▶│  Listeners  │
//! │   Manager    │     └─────────────────┘     └─────────────┘
//! └──────────────┘              │
//!                               ▼
//!                        ┌─────────────┐
//!                        │ EventStream │  (per channel)
//!                        └─────────────┘
//! ```

pub mod cache;
pub mod dispatcher;
pub mod state;

pub use cache::IdCache;
pub use dispatcher::{EventDispatcher, EventListener, EventStream};
pub use state::ConnectionState;
