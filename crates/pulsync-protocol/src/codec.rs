//! Codec for socket-mode text frames.
//!
//! Frames are single JSON objects carried in WebSocket text messages.

use thiserror::Error;

use crate::event::DomainEvent;
use crate::frames::{Ack, Envelope};

/// Maximum inbound frame size (4 MiB).
pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Event type this layer does not handle.
    #[error("Unsupported event type: {0}")]
    UnsupportedEvent(String),

    /// A field required by the event type is absent.
    #[error("Missing field: {0}")]
    MissingField(&'static str),
}

/// Decode an inbound text frame into an envelope.
///
/// # Errors
///
/// Returns an error if the frame is too large or is not a valid envelope.
pub fn decode_envelope(text: &str) -> Result<Envelope, ProtocolError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }
    Ok(serde_json::from_str(text)?)
}

/// Encode the acknowledgment for an envelope.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_ack(envelope_id: &str) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(&Ack::new(envelope_id))?)
}

/// Decode the inner event of an envelope.
///
/// Returns `Ok(None)` when the envelope carries no event.
///
/// # Errors
///
/// Returns an error if the event is malformed or unsupported.
pub fn decode_event(envelope: &Envelope) -> Result<Option<DomainEvent>, ProtocolError> {
    envelope.event().map(DomainEvent::decode).transpose()
}
