//! Local status endpoint.
//!
//! - `GET /health`: liveness
//! - `GET /status`: connection state and cache sizes

use anyhow::Result;
use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use pulsync_client::{ApiClient, ConnectionManager};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Shared endpoint state.
pub struct AppState {
    pub manager: Arc<ConnectionManager>,
    pub api: ApiClient,
}

/// Build the endpoint router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .with_state(state)
}

/// Serve the status endpoint until the task is aborted.
///
/// # Errors
///
/// Returns an error if the address cannot be bound.
pub async fn run_status_server(addr: SocketAddr, state: Arc<AppState>) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Status endpoint listening on {}", addr);

    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn status_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let connection = state.manager.state();
    let caches = state.api.caches();
    Json(json!({
        "state": connection.label(),
        "detail": connection.to_string(),
        "attempt": state.manager.attempt(),
        "listeners": state.manager.dispatcher().listener_count(),
        "cached_channels": caches.channels.len(),
        "cached_users": caches.users.len(),
    }))
}
