//! Frame types for the socket-mode protocol.
//!
//! Inbound frames are JSON text messages wrapping an optional event payload
//! (an "envelope"). The only outbound frame is the acknowledgment.
//!
//! Only `type` must be well formed. Every other member decodes leniently: a
//! value of the wrong type reads as absent, so an `events_api` envelope with
//! a string `envelope_id` can always be acknowledged.

use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};

/// Envelope type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    /// The remote endpoint confirms the transport is live.
    Hello,
    /// The remote endpoint is about to drop the transport.
    Disconnect,
    /// A workspace event that must be acknowledged.
    EventsApi,
    /// Anything else (slash commands, interactive payloads, future types).
    #[serde(other)]
    Other,
}

/// An inbound frame from the persistent connection, prior to inner event decoding.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Envelope {
    /// Envelope type.
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,

    /// Identifier to echo back in the acknowledgment.
    #[serde(default, deserialize_with = "lenient")]
    pub envelope_id: Option<String>,

    /// Event payload, present on `events_api` envelopes.
    #[serde(default, deserialize_with = "lenient")]
    pub payload: Option<EventPayload>,

    /// Disconnect reason (`warning`, `refresh_requested`, `link_disabled`).
    #[serde(default, deserialize_with = "lenient")]
    pub reason: Option<String>,

    /// Whether the remote accepts a response payload in the ack.
    #[serde(default, deserialize_with = "lenient")]
    pub accepts_response_payload: Option<bool>,
}

impl Envelope {
    /// Get the envelope ID requiring acknowledgment, if any.
    #[must_use]
    pub fn pending_ack(&self) -> Option<&str> {
        match self.kind {
            EnvelopeKind::EventsApi => self.envelope_id.as_deref(),
            _ => None,
        }
    }

    /// Get the raw inner event, if any.
    ///
    /// The event is kept undecoded so a malformed event never prevents the
    /// envelope from being acknowledged.
    #[must_use]
    pub fn event(&self) -> Option<&serde_json::Value> {
        self.payload.as_ref().and_then(|p| p.event.as_ref())
    }
}

/// The `payload` member of an `events_api` envelope.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EventPayload {
    /// Outer callback type (usually `event_callback`).
    #[serde(rename = "type", default, deserialize_with = "lenient")]
    pub kind: Option<String>,

    /// The workspace event itself.
    #[serde(default)]
    pub event: Option<serde_json::Value>,

    /// Unique event identifier.
    #[serde(default, deserialize_with = "lenient")]
    pub event_id: Option<String>,

    /// Event time in epoch seconds.
    #[serde(default, deserialize_with = "lenient")]
    pub event_time: Option<i64>,
}

/// Outbound acknowledgment frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ack {
    /// ID of the acknowledged envelope.
    pub envelope_id: String,
}

impl Ack {
    /// Create a new Ack frame.
    #[must_use]
    pub fn new(envelope_id: impl Into<String>) -> Self {
        Self {
            envelope_id: envelope_id.into(),
        }
    }
}

/// Decode a member as `T`, reading a value of any other shape as `None`.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}
