//! Row types and conversions between rows and domain records.

use chrono::{DateTime, Utc};
use parley_core::model::{Attachment, Message, MessageState, PushEndpoint, Room, RoomKind, User};
use parley_core::StoreError;
use uuid::Uuid;

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct UserRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub avatar: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct EndpointRow {
    pub user_id: String,
    pub endpoint: String,
    pub keys: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct RoomRow {
    pub id: String,
    pub name: String,
    pub kind: String,
    pub last_message_at: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct MemberRow {
    pub room_id: String,
    pub user_id: String,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct MessageRow {
    pub id: String,
    pub room_id: String,
    pub sender_id: String,
    pub body: String,
    pub file_url: Option<String>,
    pub file_type: Option<String>,
    pub edited: bool,
    pub deleted: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

pub(crate) fn parse_id(raw: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(raw).map_err(|e| StoreError::Backend(format!("bad id '{raw}': {e}")))
}

pub(crate) fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::Backend(format!("bad timestamp {ms}")))
}

pub(crate) fn kind_str(kind: RoomKind) -> &'static str {
    match kind {
        RoomKind::Direct => "direct",
        RoomKind::Group => "group",
    }
}

fn parse_kind(raw: &str) -> Result<RoomKind, StoreError> {
    match raw {
        "direct" => Ok(RoomKind::Direct),
        "group" => Ok(RoomKind::Group),
        other => Err(StoreError::Backend(format!("bad room kind '{other}'"))),
    }
}

impl EndpointRow {
    pub(crate) fn into_endpoint(self) -> PushEndpoint {
        PushEndpoint {
            endpoint: self.endpoint,
            keys: self.keys.and_then(|k| serde_json::from_str(&k).ok()),
        }
    }
}

impl UserRow {
    pub(crate) fn into_user(self, endpoints: Vec<PushEndpoint>) -> Result<User, StoreError> {
        Ok(User {
            id: parse_id(&self.id)?,
            name: self.name,
            email: self.email,
            avatar: self.avatar,
            endpoints,
        })
    }
}

impl RoomRow {
    pub(crate) fn into_room(self, members: Vec<Uuid>) -> Result<Room, StoreError> {
        let mut members = members;
        members.sort_unstable();
        members.dedup();
        Ok(Room {
            id: parse_id(&self.id)?,
            name: self.name,
            kind: parse_kind(&self.kind)?,
            members,
            last_message_at: from_millis(self.last_message_at)?,
            created_at: from_millis(self.created_at)?,
            updated_at: from_millis(self.updated_at)?,
        })
    }
}

impl TryFrom<MessageRow> for Message {
    type Error = StoreError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let attachment = row.file_url.map(|url| Attachment {
            url,
            mime_type: row.file_type,
        });
        Ok(Message {
            id: parse_id(&row.id)?,
            room_id: parse_id(&row.room_id)?,
            sender_id: parse_id(&row.sender_id)?,
            body: row.body,
            attachment,
            edited: row.edited,
            state: if row.deleted {
                MessageState::Deleted
            } else {
                MessageState::Active
            },
            created_at: from_millis(row.created_at)?,
            updated_at: from_millis(row.updated_at)?,
        })
    }
}
