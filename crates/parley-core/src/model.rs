//! Domain records: users, rooms and messages.

use chrono::{DateTime, Utc};
use parley_protocol::UserSummary;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

pub use parley_protocol::{MessageId, RoomId, RoomKind, UserId};

/// Display name given to direct rooms.
pub const DIRECT_ROOM_NAME: &str = "Direct Chat";

/// Generate a new time-ordered identifier.
#[must_use]
pub fn new_id() -> Uuid {
    Uuid::now_v7()
}

/// Current time truncated to milliseconds, the precision every store keeps.
#[must_use]
pub fn now() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

/// An opaque push delivery descriptor registered by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushEndpoint {
    /// Delivery URL.
    pub endpoint: String,
    /// Transport-specific key material, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keys: Option<serde_json::Value>,
}

impl PushEndpoint {
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            keys: None,
        }
    }
}

/// A user known to the identity service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub avatar: Option<String>,
    pub endpoints: Vec<PushEndpoint>,
}

impl User {
    /// Create a user with a fresh id and no endpoints.
    #[must_use]
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            email: email.into(),
            avatar: None,
            endpoints: Vec::new(),
        }
    }

    /// Add a push endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: PushEndpoint) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    /// Public profile.
    #[must_use]
    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id,
            name: self.name.clone(),
            email: self.email.clone(),
            avatar: self.avatar.clone(),
        }
    }
}

/// Uniqueness key of a direct room: the sorted member pair.
#[must_use]
pub fn direct_key(a: UserId, b: UserId) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{}:{}", lo.simple(), hi.simple())
}

/// A chat room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub kind: RoomKind,
    /// Unique member ids, kept sorted.
    pub members: Vec<UserId>,
    pub last_message_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Room {
    /// Create a room. Members are sorted and de-duplicated.
    #[must_use]
    pub fn new(
        kind: RoomKind,
        name: impl Into<String>,
        members: impl IntoIterator<Item = UserId>,
        at: DateTime<Utc>,
    ) -> Self {
        let mut members: Vec<UserId> = members.into_iter().collect();
        members.sort_unstable();
        members.dedup();

        Self {
            id: new_id(),
            name: name.into(),
            kind,
            members,
            last_message_at: at,
            created_at: at,
            updated_at: at,
        }
    }

    /// Check if a user belongs to the room.
    #[must_use]
    pub fn is_member(&self, user_id: UserId) -> bool {
        self.members.binary_search(&user_id).is_ok()
    }

    /// Uniqueness key for direct rooms, `None` for groups.
    #[must_use]
    pub fn direct_key(&self) -> Option<String> {
        match (self.kind, self.members.as_slice()) {
            (RoomKind::Direct, [a, b]) => Some(direct_key(*a, *b)),
            _ => None,
        }
    }
}

/// Reference to a file held by the object storage service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub url: String,
    pub mime_type: Option<String>,
}

impl Attachment {
    /// Build an attachment from optional wire fields. An absent or blank url
    /// means no attachment.
    #[must_use]
    pub fn from_parts(url: Option<String>, mime_type: Option<String>) -> Option<Self> {
        let url = url?.trim().to_string();
        if url.is_empty() {
            return None;
        }
        Some(Self { url, mime_type })
    }
}

/// Lifecycle status of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageState {
    Active,
    /// Tombstone: body and attachment cleared, row kept.
    Deleted,
}

/// A chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub room_id: RoomId,
    pub sender_id: UserId,
    /// Trimmed body, empty when the message only carries an attachment.
    pub body: String,
    pub attachment: Option<Attachment>,
    pub edited: bool,
    pub state: MessageState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    /// Create an active message.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the trimmed body is empty and there is
    /// no attachment.
    pub fn new(
        room_id: RoomId,
        sender_id: UserId,
        body: Option<&str>,
        attachment: Option<Attachment>,
        at: DateTime<Utc>,
    ) -> CoreResult<Self> {
        let body = body.map(str::trim).unwrap_or_default().to_string();
        if body.is_empty() && attachment.is_none() {
            return Err(CoreError::validation("message cannot be empty"));
        }

        Ok(Self {
            id: new_id(),
            room_id,
            sender_id,
            body,
            attachment,
            edited: false,
            state: MessageState::Active,
            created_at: at,
            updated_at: at,
        })
    }

    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.state == MessageState::Deleted
    }

    /// Replace the body.
    ///
    /// # Errors
    ///
    /// Tombstones cannot be edited; the new body must not be blank.
    pub fn apply_edit(&mut self, body: &str, at: DateTime<Utc>) -> CoreResult<()> {
        if self.is_deleted() {
            return Err(CoreError::invalid_state("message is deleted"));
        }
        let body = body.trim();
        if body.is_empty() {
            return Err(CoreError::validation("message text is required"));
        }
        self.body = body.to_string();
        self.edited = true;
        self.updated_at = at;
        Ok(())
    }

    /// Turn the message into a tombstone.
    ///
    /// Returns `false` if it already was one.
    pub fn tombstone(&mut self, at: DateTime<Utc>) -> bool {
        if self.is_deleted() {
            return false;
        }
        self.state = MessageState::Deleted;
        self.body.clear();
        self.attachment = None;
        self.updated_at = at;
        true
    }
}
