//! Long-lived `text/event-stream` requests.
//!
//! [`EventStreamClient::start`] sends a request on a background task and
//! pushes the response body through a [`StreamDecoder`]. The returned
//! [`StreamHandle`] cancels the stream. A sink callback already running when
//! `cancel()` is called finishes; no callback starts after it returns.

use std::time::Duration;

use futures_util::StreamExt;
use pulsync_protocol::{CancelHandle, FrameSink, SseError, StreamDecoder};
use reqwest::header::ACCEPT;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::metrics::{self, StreamMetricsGuard};

/// Event-stream client configuration.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Longest allowed gap between body chunks.
    pub idle_timeout: Duration,
    /// Time allowed to establish the connection.
    pub connect_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// Event-stream client errors.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The HTTP client could not be built.
    #[error("Invalid client configuration: {0}")]
    Config(String),

    /// The stream task ended abnormally.
    #[error("Stream task failed: {0}")]
    Task(String),
}

/// Starts event-stream requests.
#[derive(Debug, Clone)]
pub struct EventStreamClient {
    http: reqwest::Client,
}

impl EventStreamClient {
    /// Create a client with its own HTTP pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &StreamConfig) -> Result<Self, StreamError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.idle_timeout)
            .build()
            .map_err(|e| StreamError::Config(e.to_string()))?;
        Ok(Self { http })
    }

    /// Create a client on an existing HTTP pool.
    #[must_use]
    pub fn with_http(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Get the HTTP client, for building requests.
    #[must_use]
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Send `request` and stream its body into `sink`.
    ///
    /// An HTTP status of 400 or above is reported through `on_error` without
    /// any data callbacks.
    pub fn start<S>(&self, request: reqwest::RequestBuilder, sink: S) -> StreamHandle<S>
    where
        S: FrameSink + Send + 'static,
    {
        let cancel = CancelHandle::new();
        let token = CancellationToken::new();

        let decoder = StreamDecoder::with_cancel_handle(sink, cancel.clone());
        let task_token = token.clone();
        let task = tokio::spawn(async move {
            let _guard = StreamMetricsGuard::new();
            let mut decoder = decoder;
            tokio::select! {
                biased;
                _ = task_token.cancelled() => decoder.cancel(),
                _ = pump(request, &mut decoder) => {}
            }
            trace!(state = ?decoder.state(), "Stream task finished");
            decoder.into_sink()
        });

        StreamHandle {
            cancel,
            token,
            task: Some(task),
        }
    }
}

async fn pump<S: FrameSink>(request: reqwest::RequestBuilder, decoder: &mut StreamDecoder<S>) {
    let response = match request.header(ACCEPT, "text/event-stream").send().await {
        Ok(response) => response,
        Err(e) => {
            debug!(error = %e, "Stream request failed");
            decoder.error(SseError::Transport(e.to_string()));
            return;
        }
    };

    decoder.status(response.status().as_u16());
    if decoder.state().is_terminal() {
        debug!(status = response.status().as_u16(), "Stream rejected");
        return;
    }

    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        match chunk {
            Ok(bytes) => {
                decoder.feed(&bytes);
                if decoder.state().is_terminal() {
                    return;
                }
            }
            Err(e) => {
                debug!(error = %e, "Stream body failed");
                decoder.error(SseError::Transport(e.to_string()));
                return;
            }
        }
    }
    decoder.finish();
}

/// Handle to a running stream. Dropping it cancels the stream.
#[derive(Debug)]
pub struct StreamHandle<S> {
    cancel: CancelHandle,
    token: CancellationToken,
    task: Option<JoinHandle<S>>,
}

impl<S> StreamHandle<S> {
    /// Stop the stream. A sink callback already running finishes; no
    /// callback starts after this returns.
    pub fn cancel(&self) {
        self.cancel.cancel();
        self.token.cancel();
    }

    /// Check if the stream was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait for the stream to end and take back the sink.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream task panicked.
    pub async fn join(mut self) -> Result<S, StreamError> {
        match self.task.take() {
            Some(task) => task.await.map_err(|e| StreamError::Task(e.to_string())),
            None => Err(StreamError::Task("already joined".to_string())),
        }
    }
}

impl<S> Drop for StreamHandle<S> {
    fn drop(&mut self) {
        if self.task.is_some() {
            self.cancel();
        }
    }
}

/// One decoded payload of a chat completion stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionChunk {
    /// The backend stored the user's message under this ID.
    UserMessage { id: String },
    /// A piece of generated text.
    Text(String),
    /// Generation finished.
    Done { message_id: Option<String> },
    /// A payload with no text (pings, block starts, usage).
    Other,
}

#[derive(Debug, Deserialize)]
struct RawChunk {
    #[serde(default)]
    event: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    assistant_message_id: Option<String>,
    #[serde(default)]
    delta: Option<RawDelta>,
}

#[derive(Debug, Deserialize)]
struct RawDelta {
    #[serde(default)]
    text: Option<String>,
}

impl CompletionChunk {
    /// Decode a `data` payload.
    ///
    /// Understands the chat backend's `{"event": ...}` payloads and the
    /// completion API's `{"type": "content_block_delta", ...}` payloads.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not a JSON object.
    pub fn parse(payload: &str) -> Result<Self, serde_json::Error> {
        let raw: RawChunk = serde_json::from_str(payload)?;

        let chunk = match (raw.event.as_deref(), raw.kind.as_deref()) {
            (Some("user_message"), _) => match raw.id {
                Some(id) => CompletionChunk::UserMessage { id },
                None => CompletionChunk::Other,
            },
            (Some("text"), _) => CompletionChunk::Text(raw.content.unwrap_or_default()),
            (Some("done"), _) => CompletionChunk::Done {
                message_id: raw.assistant_message_id,
            },
            (None, Some("content_block_delta")) => match raw.delta.and_then(|d| d.text) {
                Some(text) => CompletionChunk::Text(text),
                None => CompletionChunk::Other,
            },
            (None, Some("message_stop")) => CompletionChunk::Done { message_id: None },
            _ => CompletionChunk::Other,
        };
        Ok(chunk)
    }
}

/// Sink that accumulates completion text.
///
/// Optionally forwards each text piece to a channel as it arrives.
#[derive(Debug, Default)]
pub struct CompletionCollector {
    /// Text generated so far.
    pub text: String,
    /// ID the backend gave the user's message.
    pub user_message_id: Option<String>,
    /// ID the backend gave the generated message.
    pub message_id: Option<String>,
    /// Generation finished (done payload or `[DONE]`).
    pub done: bool,
    /// The stream failed.
    pub error: Option<SseError>,
    forward: Option<mpsc::UnboundedSender<String>>,
}

impl CompletionCollector {
    /// Create a collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a collector that also forwards text pieces.
    #[must_use]
    pub fn forwarding(tx: mpsc::UnboundedSender<String>) -> Self {
        Self {
            forward: Some(tx),
            ..Self::default()
        }
    }
}

impl FrameSink for CompletionCollector {
    fn on_data(&mut self, payload: &str) {
        metrics::record_stream_frame();
        match CompletionChunk::parse(payload) {
            Ok(CompletionChunk::Text(piece)) => {
                if let Some(tx) = &self.forward {
                    let _ = tx.send(piece.clone());
                }
                self.text.push_str(&piece);
            }
            Ok(CompletionChunk::UserMessage { id }) => self.user_message_id = Some(id),
            Ok(CompletionChunk::Done { message_id }) => {
                self.done = true;
                if message_id.is_some() {
                    self.message_id = message_id;
                }
            }
            Ok(CompletionChunk::Other) => {}
            Err(e) => trace!(error = %e, "Skipping non-JSON payload"),
        }
    }

    fn on_done(&mut self) {
        self.done = true;
    }

    fn on_error(&mut self, error: SseError) {
        self.error = Some(error);
    }
}
