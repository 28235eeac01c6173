//! REST error taxonomy.

use std::time::Duration;
use thiserror::Error;

/// Errors returned by [`ApiClient`](super::ApiClient) calls.
#[derive(Debug, Error)]
pub enum ApiError {
    /// No access token is available.
    #[error("Not authenticated")]
    NotAuthenticated,

    /// The request could not be built.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The request failed at the network level.
    #[error("Network error: {0}")]
    Network(#[source] reqwest::Error),

    /// The response body did not have the expected shape.
    #[error("Decoding error: {0}")]
    Decoding(#[from] serde_json::Error),

    /// HTTP 401.
    #[error("Unauthorized - token may be invalid")]
    Unauthorized,

    /// HTTP 404.
    #[error("Not found")]
    NotFound,

    /// HTTP 429, with the `Retry-After` value when present.
    #[error("Rate limited (retry after {retry_after:?} s)")]
    RateLimited { retry_after: Option<u64> },

    /// HTTP success with `ok: false`.
    #[error("API rejected request: {0}")]
    ApiRejected(String),

    /// Any other non-success status.
    #[error("HTTP {status}")]
    Http { status: u16, body: Option<String> },
}

impl ApiError {
    /// Stable label, used as a metrics label.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::NotAuthenticated => "not_authenticated",
            ApiError::InvalidRequest(_) => "invalid_request",
            ApiError::Network(_) => "network",
            ApiError::Decoding(_) => "decoding",
            ApiError::Unauthorized => "unauthorized",
            ApiError::NotFound => "not_found",
            ApiError::RateLimited { .. } => "rate_limited",
            ApiError::ApiRejected(_) => "api_rejected",
            ApiError::Http { .. } => "http",
        }
    }

    /// How long the server asked us to wait, for rate-limit errors.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ApiError::RateLimited {
                retry_after: Some(secs),
            } => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }

    /// Check if this is a rate-limit error.
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ApiError::RateLimited { .. })
    }

    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_builder() {
            ApiError::InvalidRequest(err.to_string())
        } else {
            ApiError::Network(err)
        }
    }
}

/// Parse a `Retry-After` header given in whole seconds.
pub(crate) fn parse_retry_after(value: &str) -> Option<u64> {
    value.trim().parse().ok()
}
