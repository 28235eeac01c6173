//! Exchange of the app-level token for a one-time socket URL.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Handshake endpoint, relative to the API base URL.
pub const OPEN_CONNECTION_ENDPOINT: &str = "apps.connections.open";

/// Handshake failures.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// The call did not complete in time.
    #[error("Handshake timed out")]
    Timeout,

    /// The call failed at the network level.
    #[error("Network error: {0}")]
    Network(String),

    /// Non-success HTTP status.
    #[error("HTTP {0}")]
    Status(u16),

    /// The response body could not be decoded.
    #[error("Invalid response: {0}")]
    Decoding(String),

    /// The remote answered `ok: false`.
    #[error("Rejected: {0}")]
    Rejected(String),

    /// `ok: true` without a URL.
    #[error("Response did not include a URL")]
    MissingUrl,
}

/// Obtains socket URLs.
#[async_trait]
pub trait Handshake: Send + Sync {
    /// Exchange `app_token` for a socket URL.
    async fn open_connection(&self, app_token: &str) -> Result<String, HandshakeError>;
}

#[derive(Debug, Deserialize)]
struct OpenConnectionResponse {
    ok: bool,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Handshake over HTTP: `POST {api_base}/apps.connections.open`.
#[derive(Debug, Clone)]
pub struct HttpHandshake {
    http: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpHandshake {
    /// Create a handshake against `api_base` (e.g. `https://slack.com/api`).
    #[must_use]
    pub fn new(http: reqwest::Client, api_base: &str, timeout: Duration) -> Self {
        Self {
            http,
            endpoint: format!("{}/{}", api_base.trim_end_matches('/'), OPEN_CONNECTION_ENDPOINT),
            timeout,
        }
    }
}

#[async_trait]
impl Handshake for HttpHandshake {
    async fn open_connection(&self, app_token: &str) -> Result<String, HandshakeError> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(app_token)
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    HandshakeError::Timeout
                } else {
                    HandshakeError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(HandshakeError::Status(status.as_u16()));
        }

        let body: OpenConnectionResponse = response
            .json()
            .await
            .map_err(|e| HandshakeError::Decoding(e.to_string()))?;

        if !body.ok {
            return Err(HandshakeError::Rejected(
                body.error.unwrap_or_else(|| "unknown_error".to_string()),
            ));
        }

        let url = body
            .url
            .filter(|u| !u.is_empty())
            .ok_or(HandshakeError::MissingUrl)?;
        debug!(endpoint = %self.endpoint, "Handshake succeeded");
        Ok(url)
    }
}
