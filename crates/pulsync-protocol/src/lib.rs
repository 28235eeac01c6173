//! # pulsync-protocol
//!
//! Wire formats consumed by the Pulsync realtime sync layer.
//!
//! ## Socket frames
//!
//! The push connection carries JSON envelopes:
//!
//! - `hello` - the transport is live
//! - `disconnect` - the remote is about to drop the transport
//! - `events_api` - a workspace event, acknowledged with `{"envelope_id": ...}`
//!
//! ## Event streams
//!
//! [`sse::StreamDecoder`] reassembles `text/event-stream` bodies into `data`
//! payloads, independent of the socket.
//!
//! ## Example
//!
//! ```rust
//! use pulsync_protocol::{codec, EnvelopeKind};
//!
//! let env = codec::decode_envelope(r#"{"type":"events_api","envelope_id":"e1"}"#).unwrap();
//! assert_eq!(env.kind, EnvelopeKind::EventsApi);
//!
//! let ack = codec::encode_ack(env.pending_ack().unwrap()).unwrap();
//! assert_eq!(ack, r#"{"envelope_id":"e1"}"#);
//! ```

pub mod codec;
pub mod event;
pub mod frames;
pub mod sse;

pub use codec::{decode_envelope, decode_event, encode_ack, ProtocolError};
pub use event::{ChatMessage, DomainEvent, Edited, EventKind, ReactionEvent, ReactionSummary};
pub use frames::{Ack, Envelope, EnvelopeKind, EventPayload};
pub use sse::{CancelHandle, DecoderState, FrameSink, SseError, StreamDecoder};
