//! Instrumentation through the `metrics` facade.
//!
//! Nothing is exported from here; a binary installs a recorder (the daemon
//! uses Prometheus) and these calls start reporting.

use metrics::{counter, gauge};
use pulsync_core::ConnectionState;
use pulsync_protocol::EventKind;

/// Metric names.
pub mod names {
    pub const ENVELOPES_TOTAL: &str = "pulsync_envelopes_total";
    pub const ACKS_TOTAL: &str = "pulsync_acks_total";
    pub const EVENTS_DISPATCHED_TOTAL: &str = "pulsync_events_dispatched_total";
    pub const DECODE_ERRORS_TOTAL: &str = "pulsync_decode_errors_total";
    pub const RECONNECT_ATTEMPTS_TOTAL: &str = "pulsync_reconnect_attempts_total";
    pub const CONNECTION_STATE: &str = "pulsync_connection_state";
    pub const API_REQUESTS_TOTAL: &str = "pulsync_api_requests_total";
    pub const API_ERRORS_TOTAL: &str = "pulsync_api_errors_total";
    pub const STREAMS_ACTIVE: &str = "pulsync_streams_active";
    pub const STREAM_FRAMES_TOTAL: &str = "pulsync_stream_frames_total";
}

/// Record an inbound envelope, by type.
pub fn record_envelope(kind: &'static str) {
    counter!(names::ENVELOPES_TOTAL, "type" => kind).increment(1);
}

/// Record an acknowledgment sent.
pub fn record_ack() {
    counter!(names::ACKS_TOTAL).increment(1);
}

/// Record a dispatched event.
pub fn record_event(kind: EventKind) {
    counter!(names::EVENTS_DISPATCHED_TOTAL, "kind" => kind.as_str()).increment(1);
}

/// Record a frame or event that failed to decode.
pub fn record_decode_error(stage: &'static str) {
    counter!(names::DECODE_ERRORS_TOTAL, "stage" => stage).increment(1);
}

/// Record a scheduled reconnect.
pub fn record_reconnect_attempt() {
    counter!(names::RECONNECT_ATTEMPTS_TOTAL).increment(1);
}

/// Publish the connection state as a gauge (0 = disconnected ... 4 = failed).
pub fn set_connection_state(state: &ConnectionState) {
    let value = match state {
        ConnectionState::Disconnected => 0.0,
        ConnectionState::Connecting => 1.0,
        ConnectionState::Connected => 2.0,
        ConnectionState::Reconnecting { .. } => 3.0,
        ConnectionState::Failed { .. } => 4.0,
    };
    gauge!(names::CONNECTION_STATE).set(value);
}

/// Record a REST call.
pub fn record_api_request(endpoint: &'static str) {
    counter!(names::API_REQUESTS_TOTAL, "endpoint" => endpoint).increment(1);
}

/// Record a failed REST call.
pub fn record_api_error(endpoint: &'static str, kind: &'static str) {
    counter!(names::API_ERRORS_TOTAL, "endpoint" => endpoint, "kind" => kind).increment(1);
}

/// Record a decoded stream frame.
pub fn record_stream_frame() {
    counter!(names::STREAM_FRAMES_TOTAL).increment(1);
}

/// Tracks an open event stream; decrements the gauge on drop.
pub struct StreamMetricsGuard;

impl StreamMetricsGuard {
    /// Create a new guard, counting one active stream.
    #[must_use]
    pub fn new() -> Self {
        gauge!(names::STREAMS_ACTIVE).increment(1.0);
        Self
    }
}

impl Default for StreamMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for StreamMetricsGuard {
    fn drop(&mut self) {
        gauge!(names::STREAMS_ACTIVE).decrement(1.0);
    }
}
