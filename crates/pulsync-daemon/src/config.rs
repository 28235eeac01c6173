//! Daemon configuration.
//!
//! Configuration is layered:
//! - built-in defaults
//! - the first `pulsync.toml` found on the search path
//! - environment variables (`PULSYNC_SOCKET__MAX_ATTEMPTS=5`, ...)
//!
//! Tokens are never read from here; see [`EnvCredentials`].
//!
//! [`EnvCredentials`]: pulsync_client::EnvCredentials

use anyhow::{Context, Result};
use pulsync_client::{ApiConfig, Backoff, SocketConfig, StreamConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

const SEARCH_PATHS: [&str; 3] = [
    "pulsync.toml",
    "~/.config/pulsync/pulsync.toml",
    "/etc/pulsync/pulsync.toml",
];

/// Daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Web API access.
    #[serde(default)]
    pub api: ApiSection,

    /// Push connection.
    #[serde(default)]
    pub socket: SocketSection,

    /// Event-stream requests.
    #[serde(default)]
    pub stream: StreamSection,

    /// Local status endpoint.
    #[serde(default)]
    pub status: StatusSection,

    /// Metrics export.
    #[serde(default)]
    pub metrics: MetricsSection,
}

/// Web API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSection {
    /// API base URL.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout in milliseconds.
    #[serde(default = "default_api_timeout")]
    pub timeout_ms: u64,

    /// Listing page size.
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Concurrent lookups while prefetching.
    #[serde(default = "default_prefetch_concurrency")]
    pub prefetch_concurrency: usize,

    /// List all channels at startup.
    #[serde(default = "default_true")]
    pub warm_channels: bool,
}

/// Push connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketSection {
    /// Handshake timeout in milliseconds.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_ms: u64,

    /// Time allowed for `hello` in milliseconds.
    #[serde(default = "default_hello_timeout")]
    pub hello_timeout_ms: u64,

    /// Keepalive interval in milliseconds.
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval_ms: u64,

    /// First reconnect delay in milliseconds.
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,

    /// Longest reconnect delay in milliseconds.
    #[serde(default = "default_backoff_cap")]
    pub backoff_cap_ms: u64,

    /// Reconnect jitter as a fraction of the delay.
    #[serde(default = "default_backoff_jitter")]
    pub backoff_jitter: f64,

    /// Reconnect attempts before giving up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Prefetch users and channels seen in events.
    #[serde(default = "default_true")]
    pub resolve_identities: bool,
}

/// Event-stream configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSection {
    /// Longest gap between body chunks in milliseconds.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_ms: u64,

    /// Connect timeout in milliseconds.
    #[serde(default = "default_stream_connect_timeout")]
    pub connect_timeout_ms: u64,
}

/// Status endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSection {
    /// Serve `/health`, `/status` and channel relays.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_status_port")]
    pub port: u16,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSection {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_base_url() -> String {
    "https://slack.com/api".to_string()
}

fn default_api_timeout() -> u64 {
    30_000
}

fn default_page_size() -> u32 {
    200
}

fn default_prefetch_concurrency() -> usize {
    10
}

fn default_handshake_timeout() -> u64 {
    10_000
}

fn default_hello_timeout() -> u64 {
    10_000
}

fn default_keepalive_interval() -> u64 {
    30_000
}

fn default_backoff_base() -> u64 {
    1_000
}

fn default_backoff_cap() -> u64 {
    30_000
}

fn default_backoff_jitter() -> f64 {
    0.5
}

fn default_max_attempts() -> u32 {
    10
}

fn default_idle_timeout() -> u64 {
    300_000 // 5 minutes
}

fn default_stream_connect_timeout() -> u64 {
    30_000
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_status_port() -> u16 {
    8787
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_ms: default_api_timeout(),
            page_size: default_page_size(),
            prefetch_concurrency: default_prefetch_concurrency(),
            warm_channels: true,
        }
    }
}

impl Default for SocketSection {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: default_handshake_timeout(),
            hello_timeout_ms: default_hello_timeout(),
            keepalive_interval_ms: default_keepalive_interval(),
            backoff_base_ms: default_backoff_base(),
            backoff_cap_ms: default_backoff_cap(),
            backoff_jitter: default_backoff_jitter(),
            max_attempts: default_max_attempts(),
            resolve_identities: true,
        }
    }
}

impl Default for StreamSection {
    fn default() -> Self {
        Self {
            idle_timeout_ms: default_idle_timeout(),
            connect_timeout_ms: default_stream_connect_timeout(),
        }
    }
}

impl Default for StatusSection {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_host(),
            port: default_status_port(),
        }
    }
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from the search path, then the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or an
    /// environment override has the wrong type.
    pub fn load() -> Result<Self> {
        let file = SEARCH_PATHS
            .iter()
            .map(|p| PathBuf::from(shellexpand::tilde(p).as_ref()))
            .find(|p| p.exists());
        Self::layered(file.as_deref())
    }

    /// Load configuration from a specific file, then the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("Config file not found: {}", path.display());
        }
        Self::layered(Some(path))
    }

    fn layered(file: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(
                ::config::File::from(path).format(::config::FileFormat::Toml),
            );
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix("PULSYNC")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let origin = file.map_or_else(|| "defaults".to_string(), |p| p.display().to_string());
        builder
            .build()
            .with_context(|| format!("Failed to load config from {}", origin))?
            .try_deserialize()
            .with_context(|| format!("Invalid config in {}", origin))
    }

    /// REST client settings.
    #[must_use]
    pub fn api_config(&self) -> ApiConfig {
        ApiConfig {
            base_url: self.api.base_url.clone(),
            timeout: Duration::from_millis(self.api.timeout_ms),
            page_size: self.api.page_size,
            prefetch_concurrency: self.api.prefetch_concurrency,
        }
    }

    /// Push connection settings.
    #[must_use]
    pub fn socket_config(&self) -> SocketConfig {
        let s = &self.socket;
        SocketConfig {
            handshake_timeout: Duration::from_millis(s.handshake_timeout_ms),
            hello_timeout: Duration::from_millis(s.hello_timeout_ms),
            keepalive_interval: Duration::from_millis(s.keepalive_interval_ms),
            backoff: Backoff {
                base: Duration::from_millis(s.backoff_base_ms),
                cap: Duration::from_millis(s.backoff_cap_ms),
                jitter: s.backoff_jitter,
            },
            max_attempts: s.max_attempts,
        }
    }

    /// Event-stream settings.
    #[must_use]
    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            idle_timeout: Duration::from_millis(self.stream.idle_timeout_ms),
            connect_timeout: Duration::from_millis(self.stream.connect_timeout_ms),
        }
    }

    /// Address of the status endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn status_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.status.host, self.status.port)
            .parse()
            .with_context(|| format!("Invalid status address {}:{}", self.status.host, self.status.port))
    }
}
