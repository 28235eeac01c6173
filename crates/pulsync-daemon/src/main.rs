//! # Pulsync Daemon
//!
//! Keeps a workspace push connection alive, logs incoming events and serves
//! a local status endpoint.
//!
//! ## Usage
//!
//! ```bash
//! # Tokens come from the environment only
//! PULSYNC_APP_TOKEN=xapp-... PULSYNC_ACCESS_TOKEN=xoxb-... pulsync
//!
//! # Run with custom config
//! pulsync --config /path/to/pulsync.toml
//!
//! # Override single settings
//! PULSYNC_SOCKET__MAX_ATTEMPTS=3 pulsync
//! ```

mod config;
mod metrics;
mod status;

use anyhow::{Context, Result};
use pulsync_client::{
    ApiClient, Channel, ConnectionManager, CredentialSource, EnvCredentials, HttpHandshake,
};
use pulsync_core::{EventDispatcher, EventListener};
use pulsync_protocol::DomainEvent;
use pulsync_transport::WebSocketConnector;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Logs every event and lifecycle change.
struct LogListener;

impl EventListener for LogListener {
    fn on_event(&self, event: &DomainEvent) {
        info!(
            kind = event.kind().as_str(),
            channel = event.channel().unwrap_or("-"),
            user = event.actor().unwrap_or("-"),
            ts = event.timestamp().unwrap_or("-"),
            "Event"
        );
    }

    fn on_connected(&self) {
        info!("Push connection established");
    }

    fn on_disconnected(&self) {
        info!("Push connection closed");
    }

    fn on_error(&self, error: &dyn std::error::Error) {
        warn!(error = %error, "Push connection error");
    }
}

fn load_config() -> Result<config::Config> {
    let mut args = std::env::args().skip(1);
    match (args.next().as_deref(), args.next()) {
        (Some("--config"), Some(path)) => config::Config::from_file(&path),
        (None, _) => config::Config::load(),
        _ => anyhow::bail!("usage: pulsync [--config <path>]"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pulsync=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = load_config()?;
    info!("Starting Pulsync daemon against {}", config.api.base_url);

    // Initialize metrics
    metrics::init_metrics();
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let credentials: Arc<dyn CredentialSource> = Arc::new(EnvCredentials);
    let api_config = config.api_config();
    let http = reqwest::Client::builder()
        .timeout(api_config.timeout)
        .build()
        .context("Failed to build HTTP client")?;
    let api = ApiClient::with_http(http.clone(), api_config, Arc::clone(&credentials));

    if config.api.warm_channels {
        match api.list_all::<Channel>().await {
            Ok(channels) => info!(count = channels.len(), "Channel cache warmed"),
            Err(e) => warn!(error = %e, "Could not list channels"),
        }
    }

    let dispatcher = Arc::new(EventDispatcher::new());
    let listener = Arc::new(LogListener);
    dispatcher.subscribe(&listener);

    let handshake = HttpHandshake::new(
        http,
        &config.api.base_url,
        config.socket_config().handshake_timeout,
    );
    let mut builder = ConnectionManager::builder(
        credentials,
        Arc::new(handshake),
        Arc::new(WebSocketConnector::default()),
    )
    .config(config.socket_config())
    .dispatcher(dispatcher);
    if config.socket.resolve_identities {
        builder = builder.resolve_identities(api.clone());
    }
    let manager = Arc::new(builder.spawn());

    manager
        .connect()
        .await
        .context("Failed to open push connection")?;

    let server = if config.status.enabled {
        let state = Arc::new(status::AppState {
            manager: Arc::clone(&manager),
            api: api.clone(),
        });
        let addr = config.status_addr()?;
        Some(tokio::spawn(async move {
            if let Err(e) = status::run_status_server(addr, state).await {
                error!("Status endpoint failed: {}", e);
            }
        }))
    } else {
        None
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutting down");

    if let Some(server) = server {
        server.abort();
    }
    manager.disconnect().await;
    api.clear_caches();

    Ok(())
}
