//! Paged REST access with by-ID caches.
//!
//! [`ApiClient`] wraps the workspace Web API. Listings and point lookups of
//! channels and users populate per-resource caches, so identity lookups for
//! incoming events are usually answered locally.

mod error;
mod models;

pub use error::ApiError;
pub use models::{
    Caches, Channel, HistoryPage, HistoryQuery, Page, Profile, Resource, TextField, User,
};

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use pulsync_protocol::ChatMessage;
use reqwest::header::RETRY_AFTER;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, trace, warn};

use crate::credentials::CredentialSource;
use crate::metrics;
use error::parse_retry_after;

/// REST client configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// API base URL, without trailing slash.
    pub base_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Page size for listings.
    pub page_size: u32,
    /// Maximum concurrent lookups during prefetch.
    pub prefetch_concurrency: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://slack.com/api".to_string(),
            timeout: Duration::from_secs(30),
            page_size: 200,
            prefetch_concurrency: 10,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: Option<String>,
}

/// Decoded response body, prior to picking out the payload.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    has_more: Option<bool>,
    #[serde(default)]
    response_metadata: Option<ResponseMetadata>,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

impl ApiResponse {
    fn ensure_ok(self) -> Result<Self, ApiError> {
        if self.ok {
            Ok(self)
        } else {
            Err(ApiError::ApiRejected(
                self.error.unwrap_or_else(|| "unknown_error".to_string()),
            ))
        }
    }

    /// Accept `ok: false` when the error code means the call was a no-op.
    fn ensure_ok_or(self, benign: &str) -> Result<Self, ApiError> {
        if !self.ok && self.error.as_deref() == Some(benign) {
            trace!(error = benign, "Treating API error as success");
            return Ok(self);
        }
        self.ensure_ok()
    }

    fn take<T: DeserializeOwned>(&mut self, field: &'static str) -> Result<T, ApiError> {
        match self.fields.remove(field) {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Err(ApiError::Decoding(serde::de::Error::missing_field(field))),
        }
    }

    fn take_list<T: DeserializeOwned>(&mut self, field: &'static str) -> Result<Vec<T>, ApiError> {
        match self.fields.remove(field) {
            Some(Value::Null) | None => Ok(Vec::new()),
            Some(value) => Ok(serde_json::from_value(value)?),
        }
    }

    fn next_cursor(&mut self) -> Option<String> {
        self.response_metadata
            .take()
            .and_then(|m| m.next_cursor)
            .filter(|c| !c.is_empty())
    }
}

struct Inner {
    http: reqwest::Client,
    config: ApiConfig,
    credentials: Arc<dyn CredentialSource>,
    caches: Caches,
}

/// Caching client for the workspace Web API.
///
/// Cloning is cheap; clones share the HTTP pool and the caches.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<Inner>,
}

impl ApiClient {
    /// Create a client with its own HTTP pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: ApiConfig, credentials: Arc<dyn CredentialSource>) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(ApiError::from_reqwest)?;
        Ok(Self::with_http(http, config, credentials))
    }

    /// Create a client on a shared HTTP pool.
    #[must_use]
    pub fn with_http(
        http: reqwest::Client,
        config: ApiConfig,
        credentials: Arc<dyn CredentialSource>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                http,
                config,
                credentials,
                caches: Caches::default(),
            }),
        }
    }

    /// Get the configuration.
    #[must_use]
    pub fn config(&self) -> &ApiConfig {
        &self.inner.config
    }

    /// Get the caches.
    #[must_use]
    pub fn caches(&self) -> &Caches {
        &self.inner.caches
    }

    /// Drop every cached channel and user (session teardown).
    pub fn clear_caches(&self) {
        self.inner.caches.clear();
        debug!("Cleared API caches");
    }

    // ------------------------------------------------------------------
    // Listings and lookups
    // ------------------------------------------------------------------

    /// Fetch one page of a listing. Listed items are cached.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails or the server rejects it.
    pub async fn list<R: Resource>(&self, cursor: Option<&str>) -> Result<Page<R>, ApiError> {
        let mut query: Vec<(&str, String)> = vec![("limit", self.inner.config.page_size.to_string())];
        query.extend(R::list_params().iter().map(|(k, v)| (*k, v.to_string())));
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }

        let mut response = self.get(R::LIST_ENDPOINT, &query).await?.ensure_ok()?;
        let items: Vec<R> = response.take_list(R::LIST_FIELD)?;
        let next_cursor = response.next_cursor();

        R::cache(&self.inner.caches).extend(items.iter().map(|item| (item.id().to_string(), item.clone())));
        debug!(
            endpoint = R::LIST_ENDPOINT,
            items = items.len(),
            more = next_cursor.is_some(),
            "Listed page"
        );
        Ok(Page { items, next_cursor })
    }

    /// Fetch every page of a listing, in server order.
    ///
    /// # Errors
    ///
    /// Returns the first error encountered; earlier pages are still cached.
    pub async fn list_all<R: Resource>(&self) -> Result<Vec<R>, ApiError> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let page = self.list::<R>(cursor.as_deref()).await?;
            items.extend(page.items);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        Ok(items)
    }

    /// Get a resource by ID, from cache when possible.
    ///
    /// Concurrent misses on the same ID may each fetch; the last write wins.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    pub async fn get_by_id<R: Resource>(&self, id: &str) -> Result<R, ApiError> {
        if id.is_empty() {
            return Err(ApiError::InvalidRequest("empty id".to_string()));
        }

        let cache = R::cache(&self.inner.caches);
        if let Some(hit) = cache.get(id) {
            trace!(endpoint = R::INFO_ENDPOINT, id = %id, "Cache hit");
            return Ok(hit);
        }

        let mut response = self
            .get(R::INFO_ENDPOINT, &[(R::INFO_PARAM, id.to_string())])
            .await?
            .ensure_ok()?;
        let item: R = response.take(R::INFO_FIELD)?;
        cache.insert(item.id(), item.clone());
        Ok(item)
    }

    /// Fetch uncached IDs with bounded concurrency. Failures are ignored.
    pub async fn prefetch<R, I, S>(&self, ids: I)
    where
        R: Resource,
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ids: Vec<S> = ids.into_iter().collect();
        let missing = R::cache(&self.inner.caches).missing(ids.iter().map(|s| s.as_ref()));
        if missing.is_empty() {
            return;
        }

        let limit = self.inner.config.prefetch_concurrency.max(1);
        debug!(endpoint = R::INFO_ENDPOINT, count = missing.len(), limit, "Prefetching");

        futures_util::stream::iter(missing)
            .for_each_concurrent(limit, |id| async move {
                if let Err(e) = self.get_by_id::<R>(&id).await {
                    debug!(endpoint = R::INFO_ENDPOINT, id = %id, error = %e, "Prefetch failed");
                }
            })
            .await;
    }

    /// Look up a channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    pub async fn channel(&self, id: &str) -> Result<Channel, ApiError> {
        self.get_by_id::<Channel>(id).await
    }

    /// Look up a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    pub async fn user(&self, id: &str) -> Result<User, ApiError> {
        self.get_by_id::<User>(id).await
    }

    /// Human-readable name for a user; falls back to the ID.
    pub async fn display_name(&self, user_id: &str) -> String {
        match self.user(user_id).await {
            Ok(user) => user.display_name().to_string(),
            Err(e) => {
                debug!(user = %user_id, error = %e, "Falling back to user ID");
                user_id.to_string()
            }
        }
    }

    // ------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------

    /// Fetch one page of channel history.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails or the server rejects it.
    pub async fn history(&self, channel: &str, query: &HistoryQuery) -> Result<HistoryPage, ApiError> {
        let mut params = vec![
            ("channel", channel.to_string()),
            ("inclusive", query.inclusive.to_string()),
        ];
        if let Some(limit) = query.limit {
            params.push(("limit", limit.to_string()));
        }
        if let Some(cursor) = &query.cursor {
            params.push(("cursor", cursor.clone()));
        }
        if let Some(oldest) = &query.oldest {
            params.push(("oldest", oldest.clone()));
        }
        if let Some(latest) = &query.latest {
            params.push(("latest", latest.clone()));
        }

        let response = self.get("conversations.history", &params).await?.ensure_ok()?;
        history_page(response)
    }

    /// Fetch one page of a thread, parent first.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails or the server rejects it.
    pub async fn replies(
        &self,
        channel: &str,
        thread_ts: &str,
        cursor: Option<&str>,
    ) -> Result<HistoryPage, ApiError> {
        let mut params = vec![
            ("channel", channel.to_string()),
            ("ts", thread_ts.to_string()),
            ("limit", "100".to_string()),
        ];
        if let Some(cursor) = cursor {
            params.push(("cursor", cursor.to_string()));
        }

        let response = self.get("conversations.replies", &params).await?.ensure_ok()?;
        history_page(response)
    }

    /// Fetch the newest messages with their authors resolved.
    ///
    /// Authors are prefetched first; an author whose lookup failed is `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the history call fails.
    pub async fn history_with_users(
        &self,
        channel: &str,
        limit: u32,
    ) -> Result<Vec<(ChatMessage, Option<User>)>, ApiError> {
        let page = self.history(channel, &HistoryQuery::latest(limit)).await?;

        self.prefetch::<User, _, _>(page.messages.iter().filter_map(|m| m.user.as_deref()))
            .await;

        let users = &self.inner.caches.users;
        Ok(page
            .messages
            .into_iter()
            .map(|m| {
                let author = m.user.as_deref().and_then(|id| users.get(id));
                (m, author)
            })
            .collect())
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Post a message, optionally as a thread reply.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails or the server rejects it.
    pub async fn post_message(
        &self,
        channel: &str,
        text: &str,
        thread_ts: Option<&str>,
    ) -> Result<ChatMessage, ApiError> {
        let mut body = json!({ "channel": channel, "text": text });
        if let Some(thread_ts) = thread_ts {
            body["thread_ts"] = json!(thread_ts);
        }

        let mut response = self.post("chat.postMessage", &body).await?.ensure_ok()?;
        response.take("message")
    }

    /// Replace the text of a message.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails or the server rejects it.
    pub async fn update_message(&self, channel: &str, ts: &str, text: &str) -> Result<ChatMessage, ApiError> {
        let body = json!({ "channel": channel, "ts": ts, "text": text });
        let mut response = self.post("chat.update", &body).await?.ensure_ok()?;
        response.take("message")
    }

    /// Delete a message.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails or the server rejects it.
    pub async fn delete_message(&self, channel: &str, ts: &str) -> Result<(), ApiError> {
        let body = json!({ "channel": channel, "ts": ts });
        self.post("chat.delete", &body).await?.ensure_ok()?;
        Ok(())
    }

    /// React to a message. Reacting twice is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails or the server rejects it.
    pub async fn add_reaction(&self, channel: &str, ts: &str, name: &str) -> Result<(), ApiError> {
        let body = json!({ "channel": channel, "timestamp": ts, "name": name });
        self.post("reactions.add", &body)
            .await?
            .ensure_ok_or("already_reacted")?;
        Ok(())
    }

    /// Remove a reaction. Removing an absent reaction is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails or the server rejects it.
    pub async fn remove_reaction(&self, channel: &str, ts: &str, name: &str) -> Result<(), ApiError> {
        let body = json!({ "channel": channel, "timestamp": ts, "name": name });
        self.post("reactions.remove", &body)
            .await?
            .ensure_ok_or("no_reaction")?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Transport
    // ------------------------------------------------------------------

    fn token(&self) -> Result<String, ApiError> {
        self.inner
            .credentials
            .access_token()
            .filter(|t| !t.is_empty())
            .ok_or(ApiError::NotAuthenticated)
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.inner.config.base_url.trim_end_matches('/'), endpoint)
    }

    async fn get(&self, endpoint: &'static str, query: &[(&str, String)]) -> Result<ApiResponse, ApiError> {
        let token = self.token()?;
        let request = self.inner.http.get(self.url(endpoint)).query(query).bearer_auth(token);
        self.send(endpoint, request).await
    }

    async fn post(&self, endpoint: &'static str, body: &Value) -> Result<ApiResponse, ApiError> {
        let token = self.token()?;
        let request = self.inner.http.post(self.url(endpoint)).json(body).bearer_auth(token);
        self.send(endpoint, request).await
    }

    async fn send(
        &self,
        endpoint: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<ApiResponse, ApiError> {
        metrics::record_api_request(endpoint);
        let result = execute(request).await;
        if let Err(e) = &result {
            metrics::record_api_error(endpoint, e.kind());
            match e {
                ApiError::RateLimited { retry_after } => {
                    warn!(endpoint, retry_after = ?retry_after, "Rate limited");
                }
                _ => debug!(endpoint, error = %e, "API call failed"),
            }
        }
        result
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.inner.config.base_url)
            .field("cached_channels", &self.inner.caches.channels.len())
            .field("cached_users", &self.inner.caches.users.len())
            .finish()
    }
}

async fn execute(request: reqwest::RequestBuilder) -> Result<ApiResponse, ApiError> {
    let response = request.send().await.map_err(ApiError::from_reqwest)?;
    let status = response.status().as_u16();

    match status {
        200..=299 => {
            let body = response.bytes().await.map_err(ApiError::Network)?;
            Ok(serde_json::from_slice(&body)?)
        }
        401 => Err(ApiError::Unauthorized),
        404 => Err(ApiError::NotFound),
        429 => {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            Err(ApiError::RateLimited { retry_after })
        }
        _ => {
            let body = response.text().await.ok().filter(|b| !b.is_empty());
            Err(ApiError::Http { status, body })
        }
    }
}

fn history_page(mut response: ApiResponse) -> Result<HistoryPage, ApiError> {
    let messages: Vec<ChatMessage> = response.take_list("messages")?;
    Ok(HistoryPage {
        messages,
        has_more: response.has_more.unwrap_or(false),
        next_cursor: response.next_cursor(),
    })
}
