//! Connection supervisor.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pulsync_core::{ConnectionState, EventDispatcher, EventStream};
use pulsync_transport::{Connection, Connector};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::session::{Session, SessionEvent};
use super::{SocketConfig, SocketError};
use crate::credentials::CredentialSource;
use crate::handshake::{Handshake, HandshakeError};
use crate::metrics;
use crate::rest::ApiClient;

const COMMAND_BUFFER: usize = 16;
const SESSION_STOP_GRACE: Duration = Duration::from_secs(2);

/// Handshake plus transport open, owned by the supervisor so a command can drop it.
type Dial = Pin<Box<dyn Future<Output = Result<Box<dyn Connection>, SocketError>> + Send>>;

enum Command {
    Connect(oneshot::Sender<Result<(), SocketError>>),
    Disconnect(oneshot::Sender<()>),
}

/// Owns the persistent push connection.
///
/// All state changes happen on a background supervisor task; the manager
/// itself is a handle that sends it commands. Dropping the manager stops the
/// supervisor and closes the transport.
pub struct ConnectionManager {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ConnectionState>,
    attempt: Arc<AtomicU32>,
    dispatcher: Arc<EventDispatcher>,
    shutdown: CancellationToken,
}

impl ConnectionManager {
    /// Start building a manager.
    #[must_use]
    pub fn builder(
        credentials: Arc<dyn CredentialSource>,
        handshake: Arc<dyn Handshake>,
        connector: Arc<dyn Connector>,
    ) -> ConnectionManagerBuilder {
        ConnectionManagerBuilder {
            config: SocketConfig::default(),
            credentials,
            handshake,
            connector,
            dispatcher: None,
            resolver: None,
        }
    }

    /// Open a connection.
    ///
    /// Any existing session is torn down first and the attempt counter is
    /// reset. Returns once the transport is open; the state becomes
    /// `Connected` only when the remote says `hello`.
    ///
    /// # Errors
    ///
    /// Returns `CredentialMissing`, `HandshakeFailed` or `Transport` if the
    /// connection could not be opened. These are not retried; the state is
    /// left at `Failed`.
    pub async fn connect(&self) -> Result<(), SocketError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Connect(tx))
            .await
            .map_err(|_| SocketError::NotRunning)?;
        rx.await.map_err(|_| SocketError::NotRunning)?
    }

    /// Close the connection and stop reconnecting.
    pub async fn disconnect(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Disconnect(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// Get the current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Watch state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Get the current reconnect attempt, zero while healthy.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt.load(Ordering::Relaxed)
    }

    /// Get the dispatcher events are delivered to.
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    /// Stream the events of one channel.
    #[must_use]
    pub fn subscribe_channel(&self, channel: impl Into<String>) -> EventStream {
        self.dispatcher.subscribe_channel(channel)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &*self.state.borrow())
            .field("attempt", &self.attempt())
            .finish()
    }
}

/// Builder for [`ConnectionManager`].
pub struct ConnectionManagerBuilder {
    config: SocketConfig,
    credentials: Arc<dyn CredentialSource>,
    handshake: Arc<dyn Handshake>,
    connector: Arc<dyn Connector>,
    dispatcher: Option<Arc<EventDispatcher>>,
    resolver: Option<ApiClient>,
}

impl ConnectionManagerBuilder {
    /// Set the configuration.
    #[must_use]
    pub fn config(mut self, config: SocketConfig) -> Self {
        self.config = config;
        self
    }

    /// Deliver events to an existing dispatcher.
    #[must_use]
    pub fn dispatcher(mut self, dispatcher: Arc<EventDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Prefetch unknown users and channels seen in events.
    #[must_use]
    pub fn resolve_identities(mut self, api: ApiClient) -> Self {
        self.resolver = Some(api);
        self
    }

    /// Spawn the supervisor. Must be called within a Tokio runtime.
    #[must_use]
    pub fn spawn(self) -> ConnectionManager {
        let dispatcher = self.dispatcher.unwrap_or_default();
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let attempt = Arc::new(AtomicU32::new(0));
        let shutdown = CancellationToken::new();

        let supervisor = Supervisor {
            config: self.config,
            credentials: self.credentials,
            handshake: self.handshake,
            connector: self.connector,
            dispatcher: Arc::clone(&dispatcher),
            resolver: self.resolver,
            state: state_tx,
            attempt: Arc::clone(&attempt),
            events_tx,
            events_rx,
            session: None,
            generation: 0,
            retry_at: None,
            dialing: None,
        };
        tokio::spawn(supervisor.run(cmd_rx, shutdown.clone()));

        ConnectionManager {
            commands: cmd_tx,
            state: state_rx,
            attempt,
            dispatcher,
            shutdown,
        }
    }
}

struct SessionHandle {
    generation: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Sole writer of the connection state.
struct Supervisor {
    config: SocketConfig,
    credentials: Arc<dyn CredentialSource>,
    handshake: Arc<dyn Handshake>,
    connector: Arc<dyn Connector>,
    dispatcher: Arc<EventDispatcher>,
    resolver: Option<ApiClient>,
    state: watch::Sender<ConnectionState>,
    attempt: Arc<AtomicU32>,
    events_tx: mpsc::UnboundedSender<(u64, SessionEvent)>,
    events_rx: mpsc::UnboundedReceiver<(u64, SessionEvent)>,
    session: Option<SessionHandle>,
    generation: u64,
    retry_at: Option<Instant>,
    /// Reconnect attempt in progress.
    dialing: Option<Dial>,
}

impl Supervisor {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>, shutdown: CancellationToken) {
        loop {
            let retry_at = self.retry_at;
            let retry = async move {
                match retry_at {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };
            let dialing = self.dialing.as_mut();
            let dialed = async move {
                match dialing {
                    Some(dial) => dial.await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                command = commands.recv() => match command {
                    Some(Command::Connect(reply)) => {
                        let result = self.connect().await;
                        let _ = reply.send(result);
                    }
                    Some(Command::Disconnect(reply)) => {
                        self.disconnect().await;
                        let _ = reply.send(());
                    }
                    None => break,
                },

                Some((generation, event)) = self.events_rx.recv() => {
                    self.on_session_event(generation, event).await;
                }

                result = dialed => self.on_dialed(result),

                _ = retry => self.retry(),
            }
        }

        debug!("Connection supervisor stopping");
        self.retry_at = None;
        self.dialing = None;
        let was_connected = self.state.borrow().is_connected();
        self.stop_session().await;
        if was_connected {
            self.dispatcher.disconnected();
        }
        self.set_state(ConnectionState::Disconnected);
    }

    async fn connect(&mut self) -> Result<(), SocketError> {
        self.retry_at = None;
        self.dialing = None;
        self.set_attempt(0);

        let was_connected = self.state.borrow().is_connected();
        self.stop_session().await;
        if was_connected {
            self.dispatcher.disconnected();
        }

        self.set_state(ConnectionState::Connecting);
        match self.dial().await {
            Ok(conn) => {
                self.start_session(conn);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Connect failed");
                self.set_state(ConnectionState::Failed {
                    reason: e.to_string(),
                });
                self.dispatcher.error(&e);
                Err(e)
            }
        }
    }

    async fn disconnect(&mut self) {
        self.retry_at = None;
        if self.dialing.take().is_some() {
            debug!("Abandoned reconnect attempt in progress");
        }
        self.stop_session().await;
        self.set_attempt(0);
        self.set_state(ConnectionState::Disconnected);
        self.dispatcher.disconnected();
        info!("Disconnected");
    }

    fn retry(&mut self) {
        self.retry_at = None;
        let attempt = self.attempt.load(Ordering::Relaxed);
        info!(attempt, "Reconnecting");

        self.set_state(ConnectionState::Connecting);
        self.dialing = Some(self.dial());
    }

    fn on_dialed(&mut self, result: Result<Box<dyn Connection>, SocketError>) {
        self.dialing = None;
        match result {
            Ok(conn) => self.start_session(conn),
            Err(e) => {
                let attempt = self.attempt.load(Ordering::Relaxed);
                warn!(attempt, error = %e, "Reconnect attempt failed");
                self.dispatcher.error(&e);
                self.schedule_retry();
            }
        }
    }

    async fn on_session_event(&mut self, generation: u64, event: SessionEvent) {
        let current = self.session.as_ref().map(|s| s.generation);
        if current != Some(generation) {
            debug!(generation, ?current, "Ignoring event from superseded session");
            return;
        }

        let reason = match event {
            SessionEvent::Hello => {
                self.set_attempt(0);
                self.set_state(ConnectionState::Connected);
                return;
            }
            SessionEvent::Lost(reason) => reason,
            SessionEvent::Disconnect(reason) => {
                format!("remote disconnect: {}", reason.as_deref().unwrap_or("unspecified"))
            }
        };

        warn!(generation, reason = %reason, "Connection lost");
        let was_connected = self.state.borrow().is_connected();
        self.stop_session().await;
        if was_connected {
            self.dispatcher.disconnected();
        }
        self.dispatcher.error(&SocketError::TransportLost(reason));
        self.schedule_retry();
    }

    fn schedule_retry(&mut self) {
        let attempt = self.attempt.load(Ordering::Relaxed);
        if attempt >= self.config.max_attempts {
            let e = SocketError::RetriesExhausted { attempts: attempt };
            error!(attempts = attempt, "Giving up on reconnecting");
            self.set_state(ConnectionState::Failed {
                reason: e.to_string(),
            });
            self.dispatcher.error(&e);
            return;
        }

        let attempt = attempt + 1;
        self.set_attempt(attempt);
        let delay = self.config.backoff.delay(attempt);
        self.retry_at = Some(Instant::now() + delay);
        metrics::record_reconnect_attempt();
        self.set_state(ConnectionState::Reconnecting { attempt });
        debug!(attempt, delay_ms = delay.as_millis() as u64, "Reconnect scheduled");
    }

    /// Handshake and open the transport.
    fn dial(&self) -> Dial {
        let credentials = Arc::clone(&self.credentials);
        let handshake = Arc::clone(&self.handshake);
        let connector = Arc::clone(&self.connector);
        let handshake_timeout = self.config.handshake_timeout;

        Box::pin(async move {
            let app_token = credentials
                .app_token()
                .ok_or(SocketError::CredentialMissing)?;

            let url = tokio::time::timeout(handshake_timeout, handshake.open_connection(&app_token))
                .await
                .map_err(|_| HandshakeError::Timeout)??;
            debug!(connector = connector.name(), "Handshake complete, opening transport");
            let conn = connector.open(&url).await?;
            Ok::<_, SocketError>(conn)
        })
    }

    /// Spawn the session for an opened transport.
    fn start_session(&mut self, conn: Box<dyn Connection>) {
        self.generation += 1;
        let generation = self.generation;
        let cancel = CancellationToken::new();
        let session = Session {
            generation,
            conn,
            dispatcher: Arc::clone(&self.dispatcher),
            events: self.events_tx.clone(),
            cancel: cancel.clone(),
            hello_timeout: self.config.hello_timeout,
            keepalive_interval: self.config.keepalive_interval,
            resolver: self.resolver.clone(),
        };
        let task = tokio::spawn(session.run());

        debug!(generation, "Session started");
        self.session = Some(SessionHandle {
            generation,
            cancel,
            task,
        });
    }

    async fn stop_session(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        session.cancel.cancel();

        let mut task = session.task;
        if tokio::time::timeout(SESSION_STOP_GRACE, &mut task)
            .await
            .is_err()
        {
            warn!(generation = session.generation, "Session did not stop in time, aborting");
            task.abort();
        }
    }

    fn set_attempt(&self, attempt: u32) {
        self.attempt.store(attempt, Ordering::Relaxed);
    }

    fn set_state(&self, state: ConnectionState) {
        metrics::set_connection_state(&state);
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            info!(from = %current, to = %state, "Connection state changed");
            *current = state;
            true
        });
    }
}
