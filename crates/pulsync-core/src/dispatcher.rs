//! Event fan-out.
//!
//! The dispatcher delivers decoded events to two kinds of consumers:
//!
//! - push-style [`EventListener`]s, held as weak references so the
//!   dispatcher never keeps a listener alive;
//! - pull-style per-channel [`EventStream`]s, which end when closed or when
//!   the connection goes away.
//!
//! Dispatch is synchronous on the caller's task. Listeners that need to do
//! real work should hand the event off to their own task.

use std::error::Error;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::task::{Context, Poll};

use dashmap::DashMap;
use futures_util::Stream;
use pulsync_protocol::{ChatMessage, DomainEvent, ReactionEvent};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Receiver of connection events.
///
/// Every method has a no-op default. Override [`on_event`](Self::on_event)
/// to handle the tagged union directly, or the per-kind methods it routes to.
pub trait EventListener: Send + Sync {
    /// Any domain event. Routes to the per-kind methods by default.
    fn on_event(&self, event: &DomainEvent) {
        match event {
            DomainEvent::MessageCreated { channel, message } => {
                self.on_message_created(channel, message)
            }
            DomainEvent::MessageChanged {
                channel, message, ..
            } => self.on_message_changed(channel, message),
            DomainEvent::MessageDeleted {
                channel,
                deleted_ts,
                ..
            } => self.on_message_deleted(channel, deleted_ts),
            DomainEvent::ReactionAdded(reaction) => self.on_reaction_added(reaction),
            DomainEvent::ReactionRemoved(reaction) => self.on_reaction_removed(reaction),
            DomainEvent::Typing { channel, user } => self.on_typing(channel, user),
            DomainEvent::PresenceChange { users, presence } => {
                self.on_presence_change(users, presence)
            }
        }
    }

    fn on_message_created(&self, _channel: &str, _message: &ChatMessage) {}

    fn on_message_changed(&self, _channel: &str, _message: &ChatMessage) {}

    fn on_message_deleted(&self, _channel: &str, _ts: &str) {}

    fn on_reaction_added(&self, _reaction: &ReactionEvent) {}

    fn on_reaction_removed(&self, _reaction: &ReactionEvent) {}

    fn on_typing(&self, _channel: &str, _user: &str) {}

    fn on_presence_change(&self, _users: &[String], _presence: &str) {}

    /// The connection received `hello`.
    fn on_connected(&self) {}

    /// The connection went away.
    fn on_disconnected(&self) {}

    /// A connection-level error.
    fn on_error(&self, _error: &dyn Error) {}
}

type ListenerRef = Weak<dyn EventListener>;

/// Fan-out of domain events to listeners and per-channel streams.
pub struct EventDispatcher {
    listeners: RwLock<Vec<ListenerRef>>,
    streams: DashMap<String, Vec<mpsc::UnboundedSender<DomainEvent>>>,
}

impl EventDispatcher {
    /// Create an empty dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            streams: DashMap::new(),
        }
    }

    /// Register a listener without taking ownership of it.
    ///
    /// Registering the same listener twice has no effect. Returns `true` if
    /// the listener was added.
    pub fn subscribe<L>(&self, listener: &Arc<L>) -> bool
    where
        L: EventListener + 'static,
    {
        let target = Arc::as_ptr(listener) as *const ();
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        prune(&mut listeners);

        if listeners.iter().any(|w| w.as_ptr() as *const () == target) {
            return false;
        }

        let weak: Weak<L> = Arc::downgrade(listener);
        listeners.push(weak);
        debug!(listeners = listeners.len(), "Listener subscribed");
        true
    }

    /// Remove a listener. Returns `true` if it was registered.
    pub fn unsubscribe<L>(&self, listener: &Arc<L>) -> bool
    where
        L: EventListener + 'static,
    {
        let target = Arc::as_ptr(listener) as *const ();
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        prune(&mut listeners);

        let before = listeners.len();
        listeners.retain(|w| w.as_ptr() as *const () != target);
        let removed = listeners.len() != before;
        if removed {
            debug!(listeners = listeners.len(), "Listener unsubscribed");
        }
        removed
    }

    /// Number of registered listeners, including ones not yet pruned.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Open a pull-style stream of events for one channel.
    ///
    /// The stream ends when [`EventStream::close`] is called or the
    /// connection disconnects. Streams already closed or dropped on any
    /// channel are pruned here.
    #[must_use]
    pub fn subscribe_channel(&self, channel: impl Into<String>) -> EventStream {
        self.streams.retain(|_, senders| {
            senders.retain(|tx| !tx.is_closed());
            !senders.is_empty()
        });

        let channel = channel.into();
        let (tx, rx) = mpsc::unbounded_channel();
        debug!(channel = %channel, "Channel stream opened");
        self.streams.entry(channel).or_default().push(tx);
        EventStream { rx, closed: false }
    }

    /// Number of open channel streams.
    #[must_use]
    pub fn stream_count(&self) -> usize {
        self.streams.iter().map(|e| e.value().len()).sum()
    }

    /// Deliver an event to every live listener and matching channel stream.
    ///
    /// Returns the number of consumers reached.
    pub fn dispatch(&self, event: &DomainEvent) -> usize {
        let live = self.live_listeners();
        for listener in &live {
            listener.on_event(event);
        }

        let mut delivered = live.len();
        if let Some(channel) = event.channel() {
            let mut emptied = false;
            if let Some(mut senders) = self.streams.get_mut(channel) {
                senders.retain(|tx| tx.send(event.clone()).is_ok());
                delivered += senders.len();
                emptied = senders.is_empty();
            }
            if emptied {
                self.streams.remove_if(channel, |_, senders| senders.is_empty());
            }
        }

        trace!(kind = event.kind().as_str(), consumers = delivered, "Dispatched event");
        delivered
    }

    /// Notify listeners that the connection is up.
    pub fn connected(&self) {
        for listener in self.live_listeners() {
            listener.on_connected();
        }
    }

    /// Notify listeners that the connection went away and end every channel stream.
    pub fn disconnected(&self) {
        for listener in self.live_listeners() {
            listener.on_disconnected();
        }
        let closed = self.stream_count();
        self.streams.clear();
        if closed > 0 {
            debug!(streams = closed, "Closed channel streams");
        }
    }

    /// Notify listeners of a connection-level error.
    pub fn error(&self, error: &dyn Error) {
        for listener in self.live_listeners() {
            listener.on_error(error);
        }
    }

    fn live_listeners(&self) -> Vec<Arc<dyn EventListener>> {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("listeners", &self.listener_count())
            .field("streams", &self.stream_count())
            .finish()
    }
}

fn prune(listeners: &mut Vec<ListenerRef>) {
    listeners.retain(|w| w.strong_count() > 0);
}

/// Events for one channel, in dispatch order.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<DomainEvent>,
    closed: bool,
}

impl EventStream {
    /// Wait for the next event. Returns `None` once the stream has ended.
    pub async fn recv(&mut self) -> Option<DomainEvent> {
        if self.closed {
            return None;
        }
        self.rx.recv().await
    }

    /// End the stream. Buffered events are discarded.
    pub fn close(&mut self) {
        self.closed = true;
        self.rx.close();
    }

    /// Check if the stream was closed by its consumer.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Stream for EventStream {
    type Item = DomainEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.closed {
            return Poll::Ready(None);
        }
        self.rx.poll_recv(cx)
    }
}
