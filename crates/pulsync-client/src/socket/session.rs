//! One opened transport, from open to loss.

use std::sync::Arc;
use std::time::Duration;

use pulsync_core::EventDispatcher;
use pulsync_protocol::{codec, DomainEvent, EnvelopeKind};
use pulsync_transport::Connection;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::metrics;
use crate::rest::{ApiClient, Channel, User};

const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// What a session reports to the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum SessionEvent {
    /// `hello` received.
    Hello,
    /// The transport failed, closed, or never said hello.
    Lost(String),
    /// The remote announced a disconnect.
    Disconnect(Option<String>),
}

/// Session events tagged with the generation of the session that sent them.
pub(super) type SessionEvents = mpsc::UnboundedSender<(u64, SessionEvent)>;

pub(super) struct Session {
    pub generation: u64,
    pub conn: Box<dyn Connection>,
    pub dispatcher: Arc<EventDispatcher>,
    pub events: SessionEvents,
    pub cancel: CancellationToken,
    pub hello_timeout: Duration,
    pub keepalive_interval: Duration,
    pub resolver: Option<ApiClient>,
}

impl Session {
    /// Drive the connection until it is lost or the session is cancelled.
    pub async fn run(mut self) {
        let hello_deadline = tokio::time::sleep(self.hello_timeout);
        tokio::pin!(hello_deadline);

        let period = self.keepalive_interval;
        let mut keepalive = tokio::time::interval_at(Instant::now() + period, period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut greeted = false;

        let outcome = loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break None,

                _ = &mut hello_deadline, if !greeted => {
                    break Some(SessionEvent::Lost(format!(
                        "no hello within {}s",
                        self.hello_timeout.as_secs()
                    )));
                }

                _ = keepalive.tick(), if greeted => {
                    if let Err(e) = self.conn.ping().await {
                        break Some(SessionEvent::Lost(format!("keepalive failed: {}", e)));
                    }
                    trace!(connection = %self.conn.id(), "Keepalive sent");
                }

                frame = self.conn.recv() => match frame {
                    Ok(Some(text)) => {
                        if let Some(event) = self.handle_frame(&text, &mut greeted).await {
                            break Some(event);
                        }
                    }
                    Ok(None) => break Some(SessionEvent::Lost("closed by remote".to_string())),
                    Err(e) => break Some(SessionEvent::Lost(e.to_string())),
                },
            }
        };

        if tokio::time::timeout(CLOSE_TIMEOUT, self.conn.close())
            .await
            .is_err()
        {
            debug!(connection = %self.conn.id(), "Close timed out");
        }

        if let Some(event) = outcome {
            let _ = self.events.send((self.generation, event));
        }
    }

    /// Process one text frame. Returns an event when the session must end.
    async fn handle_frame(&mut self, text: &str, greeted: &mut bool) -> Option<SessionEvent> {
        let envelope = match codec::decode_envelope(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                metrics::record_decode_error("envelope");
                debug!(connection = %self.conn.id(), error = %e, "Skipping undecodable frame");
                return None;
            }
        };
        metrics::record_envelope(envelope_label(envelope.kind));

        match envelope.kind {
            EnvelopeKind::Hello => {
                if !*greeted {
                    *greeted = true;
                    info!(connection = %self.conn.id(), generation = self.generation, "Hello received");
                    let _ = self.events.send((self.generation, SessionEvent::Hello));
                    self.dispatcher.connected();
                }
                None
            }
            EnvelopeKind::Disconnect => {
                info!(
                    connection = %self.conn.id(),
                    reason = envelope.reason.as_deref().unwrap_or("unspecified"),
                    "Remote requested disconnect"
                );
                Some(SessionEvent::Disconnect(envelope.reason))
            }
            EnvelopeKind::EventsApi => {
                if let Some(envelope_id) = envelope.pending_ack() {
                    // Acknowledge before anything else can fail.
                    let ack = match codec::encode_ack(envelope_id) {
                        Ok(ack) => ack,
                        Err(e) => {
                            warn!(envelope_id = %envelope_id, error = %e, "Failed to encode ack");
                            return None;
                        }
                    };
                    if let Err(e) = self.conn.send(ack).await {
                        return Some(SessionEvent::Lost(format!("ack failed: {}", e)));
                    }
                    metrics::record_ack();
                    trace!(envelope_id = %envelope_id, "Acknowledged");
                }

                if self.cancel.is_cancelled() {
                    return None;
                }

                match codec::decode_event(&envelope) {
                    Ok(Some(event)) => self.deliver(&event),
                    Ok(None) => {}
                    Err(e) => {
                        metrics::record_decode_error("event");
                        debug!(
                            envelope_id = envelope.envelope_id.as_deref().unwrap_or("-"),
                            error = %e,
                            "Skipping event"
                        );
                    }
                }
                None
            }
            EnvelopeKind::Other => {
                trace!("Ignoring envelope of unhandled type");
                None
            }
        }
    }

    fn deliver(&self, event: &DomainEvent) {
        metrics::record_event(event.kind());
        let consumers = self.dispatcher.dispatch(event);
        trace!(kind = event.kind().as_str(), consumers, "Delivered event");

        let Some(api) = &self.resolver else {
            return;
        };

        // Warm the identity caches so listeners can resolve names locally.
        let user = event
            .actor()
            .filter(|id| !api.caches().users.contains(id))
            .map(str::to_string);
        let channel = event
            .channel()
            .filter(|id| !api.caches().channels.contains(id))
            .map(str::to_string);
        if user.is_none() && channel.is_none() {
            return;
        }

        let api = api.clone();
        tokio::spawn(async move {
            if let Some(user) = user {
                api.prefetch::<User, _, _>([user]).await;
            }
            if let Some(channel) = channel {
                api.prefetch::<Channel, _, _>([channel]).await;
            }
        });
    }
}

fn envelope_label(kind: EnvelopeKind) -> &'static str {
    match kind {
        EnvelopeKind::Hello => "hello",
        EnvelopeKind::Disconnect => "disconnect",
        EnvelopeKind::EventsApi => "events_api",
        EnvelopeKind::Other => "other",
    }
}
