//! Metrics export for the Pulsync daemon.
//!
//! The client crates record through the `metrics` facade; this module
//! describes those metrics and exports them in Prometheus format.

use metrics_exporter_prometheus::PrometheusBuilder;
use pulsync_client::metrics::names;
use std::net::SocketAddr;
use tracing::info;

/// Describe every metric the clients record.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::ENVELOPES_TOTAL,
        "Envelopes received on the push connection, by type"
    );
    metrics::describe_counter!(names::ACKS_TOTAL, "Envelope acknowledgments sent");
    metrics::describe_counter!(
        names::EVENTS_DISPATCHED_TOTAL,
        "Decoded events handed to listeners, by kind"
    );
    metrics::describe_counter!(
        names::DECODE_ERRORS_TOTAL,
        "Frames or events that failed to decode"
    );
    metrics::describe_counter!(
        names::RECONNECT_ATTEMPTS_TOTAL,
        "Reconnect attempts scheduled after a connection loss"
    );
    metrics::describe_gauge!(
        names::CONNECTION_STATE,
        "Push connection state (0 disconnected, 1 connecting, 2 connected, 3 reconnecting, 4 failed)"
    );
    metrics::describe_counter!(names::API_REQUESTS_TOTAL, "Web API calls, by endpoint");
    metrics::describe_counter!(
        names::API_ERRORS_TOTAL,
        "Failed Web API calls, by endpoint and error kind"
    );
    metrics::describe_gauge!(names::STREAMS_ACTIVE, "Event-stream requests in progress");
    metrics::describe_counter!(
        names::STREAM_FRAMES_TOTAL,
        "Data frames received on event streams"
    );

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}
