//! Domain events carried inside `events_api` envelopes.
//!
//! The remote sends loosely-typed JSON objects keyed by `type` (and, for
//! messages, `subtype`). [`DomainEvent::decode`] maps the subset this layer
//! understands into a closed tagged union.

use serde::{Deserialize, Serialize};

use crate::codec::ProtocolError;

/// A chat message as carried by push events and history listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message timestamp; unique per channel and used as the message ID.
    pub ts: String,
    /// Author user ID (absent for some bot messages).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Message body.
    #[serde(default)]
    pub text: String,
    /// Parent thread timestamp, if this is a thread message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<String>,
    /// Message subtype (`me_message`, `bot_message`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    /// Bot ID for bot-authored messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_id: Option<String>,
    /// Display name override used by some integrations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Number of replies when this message is a thread parent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_count: Option<u32>,
    /// Aggregated reactions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reactions: Vec<ReactionSummary>,
    /// Present when the message has been edited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited: Option<Edited>,
}

impl ChatMessage {
    /// Check if this message starts a thread with replies.
    #[must_use]
    pub fn is_thread_parent(&self) -> bool {
        self.reply_count.is_some_and(|n| n > 0)
    }

    /// Check if this message is a reply inside a thread.
    #[must_use]
    pub fn is_thread_reply(&self) -> bool {
        self.thread_ts.as_deref().is_some_and(|t| t != self.ts)
    }

    /// Whole seconds of the message timestamp.
    #[must_use]
    pub fn epoch_seconds(&self) -> Option<i64> {
        self.ts.split('.').next().and_then(|s| s.parse().ok())
    }
}

/// A reaction aggregated on a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionSummary {
    /// Emoji name without colons.
    pub name: String,
    /// Number of users who reacted.
    pub count: u32,
    /// Reacting user IDs (may be truncated by the server).
    #[serde(default)]
    pub users: Vec<String>,
}

/// Edit marker on a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edited {
    /// Editing user.
    pub user: String,
    /// Edit timestamp.
    pub ts: String,
}

/// A reaction being added to or removed from a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionEvent {
    /// Channel of the reacted message.
    pub channel: String,
    /// User who reacted.
    pub user: String,
    /// Emoji name.
    pub reaction: String,
    /// Timestamp of the reacted message.
    pub item_ts: String,
    /// Author of the reacted message.
    pub item_user: Option<String>,
    /// Event timestamp.
    pub event_ts: Option<String>,
}

/// Discriminant of a [`DomainEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    MessageCreated,
    MessageChanged,
    MessageDeleted,
    ReactionAdded,
    ReactionRemoved,
    Typing,
    PresenceChange,
}

impl EventKind {
    /// Stable name, used as a metrics label.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::MessageCreated => "message_created",
            EventKind::MessageChanged => "message_changed",
            EventKind::MessageDeleted => "message_deleted",
            EventKind::ReactionAdded => "reaction_added",
            EventKind::ReactionRemoved => "reaction_removed",
            EventKind::Typing => "typing",
            EventKind::PresenceChange => "presence_change",
        }
    }
}

/// A decoded workspace event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    /// A new message was posted.
    MessageCreated { channel: String, message: ChatMessage },
    /// An existing message was edited.
    MessageChanged {
        channel: String,
        message: ChatMessage,
        event_ts: Option<String>,
    },
    /// A message was deleted.
    MessageDeleted {
        channel: String,
        deleted_ts: String,
        event_ts: Option<String>,
    },
    /// A reaction was added.
    ReactionAdded(ReactionEvent),
    /// A reaction was removed.
    ReactionRemoved(ReactionEvent),
    /// A user started typing.
    Typing { channel: String, user: String },
    /// One or more users changed presence (`active` / `away`).
    PresenceChange { users: Vec<String>, presence: String },
}

impl DomainEvent {
    /// Decode a raw event object.
    ///
    /// # Errors
    ///
    /// Returns an error if the object is malformed, lacks a field required
    /// for its type, or has a type this layer does not handle.
    pub fn decode(value: &serde_json::Value) -> Result<Self, ProtocolError> {
        let raw = RawEvent::deserialize(value)?;

        match raw.kind.as_str() {
            "message" => decode_message(raw),
            "reaction_added" => decode_reaction(raw).map(DomainEvent::ReactionAdded),
            "reaction_removed" => decode_reaction(raw).map(DomainEvent::ReactionRemoved),
            "user_typing" => Ok(DomainEvent::Typing {
                channel: required(raw.channel, "channel")?,
                user: required(raw.user, "user")?,
            }),
            "presence_change" => {
                let users = match (raw.user, raw.users) {
                    (Some(user), _) => vec![user],
                    (None, Some(users)) if !users.is_empty() => users,
                    _ => return Err(ProtocolError::MissingField("user")),
                };
                Ok(DomainEvent::PresenceChange {
                    users,
                    presence: required(raw.presence, "presence")?,
                })
            }
            other => Err(ProtocolError::UnsupportedEvent(other.to_string())),
        }
    }

    /// Get the event discriminant.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            DomainEvent::MessageCreated { .. } => EventKind::MessageCreated,
            DomainEvent::MessageChanged { .. } => EventKind::MessageChanged,
            DomainEvent::MessageDeleted { .. } => EventKind::MessageDeleted,
            DomainEvent::ReactionAdded(_) => EventKind::ReactionAdded,
            DomainEvent::ReactionRemoved(_) => EventKind::ReactionRemoved,
            DomainEvent::Typing { .. } => EventKind::Typing,
            DomainEvent::PresenceChange { .. } => EventKind::PresenceChange,
        }
    }

    /// Channel the event happened in. Presence changes have none.
    #[must_use]
    pub fn channel(&self) -> Option<&str> {
        match self {
            DomainEvent::MessageCreated { channel, .. }
            | DomainEvent::MessageChanged { channel, .. }
            | DomainEvent::MessageDeleted { channel, .. }
            | DomainEvent::Typing { channel, .. } => Some(channel),
            DomainEvent::ReactionAdded(r) | DomainEvent::ReactionRemoved(r) => Some(&r.channel),
            DomainEvent::PresenceChange { .. } => None,
        }
    }

    /// User who caused the event, when known.
    #[must_use]
    pub fn actor(&self) -> Option<&str> {
        match self {
            DomainEvent::MessageCreated { message, .. }
            | DomainEvent::MessageChanged { message, .. } => message.user.as_deref(),
            DomainEvent::MessageDeleted { .. } => None,
            DomainEvent::ReactionAdded(r) | DomainEvent::ReactionRemoved(r) => Some(&r.user),
            DomainEvent::Typing { user, .. } => Some(user),
            DomainEvent::PresenceChange { users, .. } => users.first().map(String::as_str),
        }
    }

    /// Event timestamp, when the remote provides one.
    #[must_use]
    pub fn timestamp(&self) -> Option<&str> {
        match self {
            DomainEvent::MessageCreated { message, .. } => Some(&message.ts),
            DomainEvent::MessageChanged {
                message, event_ts, ..
            } => event_ts.as_deref().or(Some(&message.ts)),
            DomainEvent::MessageDeleted {
                deleted_ts,
                event_ts,
                ..
            } => event_ts.as_deref().or(Some(deleted_ts)),
            DomainEvent::ReactionAdded(r) | DomainEvent::ReactionRemoved(r) => {
                r.event_ts.as_deref()
            }
            DomainEvent::Typing { .. } | DomainEvent::PresenceChange { .. } => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    users: Option<Vec<String>>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    event_ts: Option<String>,
    #[serde(default)]
    thread_ts: Option<String>,
    #[serde(default)]
    message: Option<ChatMessage>,
    #[serde(default)]
    previous_message: Option<ChatMessage>,
    #[serde(default)]
    deleted_ts: Option<String>,
    #[serde(default)]
    reaction: Option<String>,
    #[serde(default)]
    item_user: Option<String>,
    #[serde(default)]
    item: Option<RawItem>,
    #[serde(default)]
    presence: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawItem {
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    ts: Option<String>,
}

fn required<T>(value: Option<T>, field: &'static str) -> Result<T, ProtocolError> {
    value.ok_or(ProtocolError::MissingField(field))
}

fn decode_message(raw: RawEvent) -> Result<DomainEvent, ProtocolError> {
    let channel = required(raw.channel, "channel")?;

    match raw.subtype.as_deref() {
        Some("message_changed") => Ok(DomainEvent::MessageChanged {
            channel,
            message: required(raw.message, "message")?,
            event_ts: raw.event_ts.or(raw.ts),
        }),
        Some("message_deleted") => {
            let deleted_ts = raw
                .previous_message
                .map(|m| m.ts)
                .or(raw.deleted_ts)
                .or_else(|| raw.ts.clone());
            Ok(DomainEvent::MessageDeleted {
                channel,
                deleted_ts: required(deleted_ts, "deleted_ts")?,
                event_ts: raw.event_ts.or(raw.ts),
            })
        }
        subtype => {
            // Plain and /me messages must name their author; other subtypes
            // (bot_message, file_share, ...) are accepted without one.
            let user = match subtype {
                None | Some("me_message") => Some(required(raw.user, "user")?),
                Some(_) => raw.user,
            };
            Ok(DomainEvent::MessageCreated {
                channel,
                message: ChatMessage {
                    ts: required(raw.ts, "ts")?,
                    user,
                    text: required(raw.text, "text")?,
                    thread_ts: raw.thread_ts,
                    subtype: raw.subtype,
                    bot_id: None,
                    username: None,
                    reply_count: None,
                    reactions: Vec::new(),
                    edited: None,
                },
            })
        }
    }
}

fn decode_reaction(raw: RawEvent) -> Result<ReactionEvent, ProtocolError> {
    let item = required(raw.item, "item")?;
    Ok(ReactionEvent {
        channel: required(item.channel, "item.channel")?,
        user: required(raw.user, "user")?,
        reaction: required(raw.reaction, "reaction")?,
        item_ts: required(item.ts, "item.ts")?,
        item_user: raw.item_user,
        event_ts: raw.event_ts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_new_message() {
        let event = DomainEvent::decode(&json!({
            "type": "message",
            "channel": "C1",
            "user": "U1",
            "text": "hello",
            "ts": "1700000000.000100",
            "thread_ts": "1700000000.000001"
        }))
        .unwrap();

        assert_eq!(event.kind(), EventKind::MessageCreated);
        assert_eq!(event.channel(), Some("C1"));
        assert_eq!(event.actor(), Some("U1"));
        assert_eq!(event.timestamp(), Some("1700000000.000100"));
        if let DomainEvent::MessageCreated { message, .. } = event {
            assert!(message.is_thread_reply());
            assert_eq!(message.epoch_seconds(), Some(1_700_000_000));
        }
    }

    #[test]
    fn test_decode_plain_message_requires_user() {
        let err = DomainEvent::decode(&json!({
            "type": "message", "channel": "C1", "text": "hi", "ts": "1.0"
        }))
        .unwrap_err();
        assert!(matches!(err, ProtocolError::MissingField("user")));

        // Bot messages may omit the user.
        let event = DomainEvent::decode(&json!({
            "type": "message", "subtype": "bot_message", "channel": "C1", "text": "hi", "ts": "1.0"
        }))
        .unwrap();
        assert_eq!(event.actor(), None);
    }

    #[test]
    fn test_decode_message_changed() {
        let event = DomainEvent::decode(&json!({
            "type": "message",
            "subtype": "message_changed",
            "channel": "C1",
            "event_ts": "2.0",
            "message": {"ts": "1.0", "user": "U1", "text": "edited"}
        }))
        .unwrap();

        match event {
            DomainEvent::MessageChanged { message, event_ts, .. } => {
                assert_eq!(message.text, "edited");
                assert_eq!(event_ts.as_deref(), Some("2.0"));
            }
            other => panic!("Expected MessageChanged, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_message_deleted_prefers_previous_message() {
        let event = DomainEvent::decode(&json!({
            "type": "message",
            "subtype": "message_deleted",
            "channel": "C1",
            "ts": "9.0",
            "deleted_ts": "3.0",
            "previous_message": {"ts": "1.0", "text": "gone"}
        }))
        .unwrap();
        assert!(matches!(
            event,
            DomainEvent::MessageDeleted { ref deleted_ts, .. } if deleted_ts == "1.0"
        ));

        let event = DomainEvent::decode(&json!({
            "type": "message", "subtype": "message_deleted", "channel": "C1", "ts": "9.0"
        }))
        .unwrap();
        assert!(matches!(
            event,
            DomainEvent::MessageDeleted { ref deleted_ts, .. } if deleted_ts == "9.0"
        ));
    }

    #[test]
    fn test_decode_reaction() {
        let event = DomainEvent::decode(&json!({
            "type": "reaction_removed",
            "user": "U2",
            "reaction": "thumbsup",
            "item_user": "U1",
            "item": {"type": "message", "channel": "C9", "ts": "5.0"},
            "event_ts": "6.0"
        }))
        .unwrap();

        assert_eq!(event.kind(), EventKind::ReactionRemoved);
        assert_eq!(event.channel(), Some("C9"));
        assert_eq!(event.actor(), Some("U2"));
        assert_eq!(event.timestamp(), Some("6.0"));
    }

    #[test]
    fn test_decode_typing_and_presence() {
        let typing = DomainEvent::decode(&json!({
            "type": "user_typing", "channel": "C1", "user": "U1"
        }))
        .unwrap();
        assert_eq!(typing.kind(), EventKind::Typing);

        let presence = DomainEvent::decode(&json!({
            "type": "presence_change", "users": ["U1", "U2"], "presence": "away"
        }))
        .unwrap();
        assert_eq!(presence.channel(), None);
        assert_eq!(presence.actor(), Some("U1"));
    }

    #[test]
    fn test_decode_unsupported() {
        let err = DomainEvent::decode(&json!({"type": "channel_created"})).unwrap_err();
        assert!(matches!(err, ProtocolError::UnsupportedEvent(t) if t == "channel_created"));

        assert!(DomainEvent::decode(&json!({"no_type": true})).is_err());
    }
}
