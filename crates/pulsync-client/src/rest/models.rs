//! Workspace resources returned by the REST API.

use pulsync_core::IdCache;
use pulsync_protocol::ChatMessage;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A resource that can be listed with a cursor and fetched by ID.
pub trait Resource: DeserializeOwned + Clone + Send + Sync + 'static {
    /// Listing endpoint.
    const LIST_ENDPOINT: &'static str;
    /// Response member holding the listed items.
    const LIST_FIELD: &'static str;
    /// Point-lookup endpoint.
    const INFO_ENDPOINT: &'static str;
    /// Response member holding the looked-up item.
    const INFO_FIELD: &'static str;
    /// Query parameter carrying the ID on lookups.
    const INFO_PARAM: &'static str;

    /// Extra fixed query parameters for listing.
    fn list_params() -> &'static [(&'static str, &'static str)] {
        &[]
    }

    /// Remote ID.
    fn id(&self) -> &str;

    /// Cache holding this resource.
    fn cache(caches: &Caches) -> &IdCache<Self>;
}

/// Per-resource caches of one client.
#[derive(Debug, Default)]
pub struct Caches {
    pub channels: IdCache<Channel>,
    pub users: IdCache<User>,
}

impl Caches {
    /// Drop all cached entries.
    pub fn clear(&self) {
        self.channels.clear();
        self.users.clear();
    }
}

/// A conversation: public or private channel, DM or group DM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub is_member: bool,
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default)]
    pub is_im: bool,
    #[serde(default)]
    pub is_mpim: bool,
    /// Peer user of a DM.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<TextField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<TextField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_members: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
}

impl Channel {
    /// `#name` for channels, the bare name otherwise.
    #[must_use]
    pub fn display_name(&self) -> String {
        if self.is_im || self.is_mpim {
            self.name.clone()
        } else {
            format!("#{}", self.name)
        }
    }
}

impl Resource for Channel {
    const LIST_ENDPOINT: &'static str = "conversations.list";
    const LIST_FIELD: &'static str = "channels";
    const INFO_ENDPOINT: &'static str = "conversations.info";
    const INFO_FIELD: &'static str = "channel";
    const INFO_PARAM: &'static str = "channel";

    fn list_params() -> &'static [(&'static str, &'static str)] {
        &[
            ("exclude_archived", "true"),
            ("types", "public_channel,private_channel"),
        ]
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn cache(caches: &Caches) -> &IdCache<Self> {
        &caches.channels
    }
}

/// Topic or purpose of a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextField {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_set: Option<i64>,
}

/// A workspace member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub real_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tz: Option<String>,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub profile: Profile,
}

impl User {
    /// Best human-readable name: profile display name, then real name,
    /// then the handle.
    #[must_use]
    pub fn display_name(&self) -> &str {
        non_empty(self.profile.display_name.as_deref())
            .or_else(|| non_empty(self.profile.real_name.as_deref()))
            .or_else(|| non_empty(self.real_name.as_deref()))
            .unwrap_or(&self.name)
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.filter(|s| !s.is_empty())
}

impl Resource for User {
    const LIST_ENDPOINT: &'static str = "users.list";
    const LIST_FIELD: &'static str = "members";
    const INFO_ENDPOINT: &'static str = "users.info";
    const INFO_FIELD: &'static str = "user";
    const INFO_PARAM: &'static str = "user";

    fn id(&self) -> &str {
        &self.id
    }

    fn cache(caches: &Caches) -> &IdCache<Self> {
        &caches.users
    }
}

/// Profile fields of a user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub real_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_emoji: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_48: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_192: Option<String>,
}

/// One page of a cursor listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Cursor for the next page; `None` on the last page.
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    /// Check if this is the last page.
    #[must_use]
    pub fn is_last(&self) -> bool {
        self.next_cursor.is_none()
    }
}

/// Bounds of a history query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryQuery {
    pub cursor: Option<String>,
    /// Only messages after this timestamp.
    pub oldest: Option<String>,
    /// Only messages before this timestamp.
    pub latest: Option<String>,
    /// Include messages exactly at `oldest` / `latest`.
    pub inclusive: bool,
    pub limit: Option<u32>,
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            cursor: None,
            oldest: None,
            latest: None,
            inclusive: true,
            limit: None,
        }
    }
}

impl HistoryQuery {
    /// Query the newest `limit` messages.
    #[must_use]
    pub fn latest(limit: u32) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    /// Continue from a cursor.
    #[must_use]
    pub fn with_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }
}

/// One page of channel or thread history, newest first.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryPage {
    pub messages: Vec<ChatMessage>,
    pub has_more: bool,
    pub next_cursor: Option<String>,
}
