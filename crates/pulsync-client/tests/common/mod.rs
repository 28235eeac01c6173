//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pulsync_client::{Handshake, HandshakeError};
use pulsync_core::{ConnectionState, EventListener};
use pulsync_protocol::DomainEvent;
use pulsync_transport::{Connection, ConnectionId, Connector, TransportError};
use tokio::sync::{mpsc, watch};

pub const SOCKET_URL: &str = "wss://socket.invalid/link";

enum Inbound {
    Text(String),
    Close,
}

/// Server side of one mock connection.
pub struct Remote {
    inbound: mpsc::UnboundedSender<Inbound>,
    outbound: mpsc::UnboundedReceiver<String>,
    pub pings: Arc<AtomicUsize>,
    pub fail_pings: Arc<AtomicBool>,
}

impl Remote {
    pub fn push(&self, frame: impl Into<String>) {
        let _ = self.inbound.send(Inbound::Text(frame.into()));
    }

    pub fn hello(&self) {
        self.push(r#"{"type":"hello","num_connections":1}"#);
    }

    pub fn close(&self) {
        let _ = self.inbound.send(Inbound::Close);
    }

    /// Next frame the client sent.
    pub async fn sent(&mut self) -> String {
        tokio::time::timeout(Duration::from_secs(5), self.outbound.recv())
            .await
            .expect("timed out waiting for client frame")
            .expect("connection dropped")
    }

    pub fn try_sent(&mut self) -> Option<String> {
        self.outbound.try_recv().ok()
    }
}

struct MockConnection {
    id: ConnectionId,
    inbound: mpsc::UnboundedReceiver<Inbound>,
    outbound: mpsc::UnboundedSender<String>,
    pings: Arc<AtomicUsize>,
    fail_pings: Arc<AtomicBool>,
    open: bool,
}

#[async_trait]
impl Connection for MockConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        match self.inbound.recv().await {
            Some(Inbound::Text(text)) => Ok(Some(text)),
            Some(Inbound::Close) | None => {
                self.open = false;
                Ok(None)
            }
        }
    }

    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::ConnectionClosed);
        }
        self.outbound
            .send(text)
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        if self.fail_pings.load(Ordering::SeqCst) {
            return Err(TransportError::Timeout);
        }
        self.pings.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

/// Connector handing the server side of each opened connection to the test.
pub struct MockConnector {
    remotes: mpsc::UnboundedSender<Remote>,
    pub opens: AtomicUsize,
    pub fail: AtomicBool,
}

impl MockConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Remote>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            remotes: tx,
            opens: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        });
        (connector, rx)
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, url: &str) -> Result<Box<dyn Connection>, TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        assert_eq!(url, SOCKET_URL);
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectFailed("refused".to_string()));
        }

        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let pings = Arc::new(AtomicUsize::new(0));
        let fail_pings = Arc::new(AtomicBool::new(false));

        let _ = self.remotes.send(Remote {
            inbound: in_tx,
            outbound: out_rx,
            pings: Arc::clone(&pings),
            fail_pings: Arc::clone(&fail_pings),
        });

        Ok(Box::new(MockConnection {
            id: ConnectionId::generate(),
            inbound: in_rx,
            outbound: out_tx,
            pings,
            fail_pings,
            open: true,
        }))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Handshake returning [`SOCKET_URL`], or a rejection when `fail` is set.
/// Answers after `delay_ms` when nonzero.
#[derive(Default)]
pub struct MockHandshake {
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
    pub delay_ms: AtomicU64,
}

impl MockHandshake {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Handshake for MockHandshake {
    async fn open_connection(&self, app_token: &str) -> Result<String, HandshakeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(app_token, "xapp-test");
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(HandshakeError::Rejected("invalid_auth".to_string()));
        }
        Ok(SOCKET_URL.to_string())
    }
}

/// Listener recording everything it sees.
#[derive(Default)]
pub struct Recorder {
    pub events: Mutex<Vec<DomainEvent>>,
    pub connected: AtomicUsize,
    pub disconnected: AtomicUsize,
    pub errors: Mutex<Vec<String>>,
}

impl EventListener for Recorder {
    fn on_event(&self, event: &DomainEvent) {
        self.events.lock().unwrap().push(event.clone());
    }

    fn on_connected(&self) {
        self.connected.fetch_add(1, Ordering::SeqCst);
    }

    fn on_disconnected(&self) {
        self.disconnected.fetch_add(1, Ordering::SeqCst);
    }

    fn on_error(&self, error: &dyn std::error::Error) {
        self.errors.lock().unwrap().push(error.to_string());
    }
}

/// Wait until the state satisfies `pred`.
pub async fn wait_for_state(
    rx: &mut watch::Receiver<ConnectionState>,
    pred: impl FnMut(&ConnectionState) -> bool,
) -> ConnectionState {
    tokio::time::timeout(Duration::from_secs(900), rx.wait_for(pred))
        .await
        .expect("timed out waiting for state")
        .expect("manager stopped")
        .clone()
}

pub fn events_api(envelope_id: &str, event: &str) -> String {
    format!(
        r#"{{"type":"events_api","envelope_id":"{}","accepts_response_payload":false,"payload":{{"type":"event_callback","event":{}}}}}"#,
        envelope_id, event
    )
}

/// Serve `router` on an ephemeral local port and return its base URL.
pub async fn serve(router: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}
