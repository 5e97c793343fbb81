//! Formatted views of rooms, messages and users.
//!
//! Views are what crosses the component boundary: room references are bare
//! ids, and senders are either a bare id or a populated summary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A user identifier.
pub type UserId = Uuid;

/// A room identifier.
pub type RoomId = Uuid;

/// A message identifier.
pub type MessageId = Uuid;

/// Public profile of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: UserId,
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// Reference to the sender of a message.
///
/// Serialized untagged: a bare id is a JSON string, a populated sender is an
/// object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SenderRef {
    /// Sender enriched with its public profile.
    Populated(UserSummary),
    /// Bare sender id.
    Id(UserId),
}

impl SenderRef {
    /// The sender id, whichever form the reference takes.
    #[must_use]
    pub fn id(&self) -> UserId {
        match self {
            SenderRef::Populated(user) => user.id,
            SenderRef::Id(id) => *id,
        }
    }

    /// Whether the reference carries a profile.
    #[must_use]
    pub fn is_populated(&self) -> bool {
        matches!(self, SenderRef::Populated(_))
    }
}

/// A message as delivered to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: MessageId,
    pub room: RoomId,
    pub sender: SenderRef,
    /// Message text, empty when the message only carries a file or is deleted.
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    pub edited: bool,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Room kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomKind {
    /// One-to-one room between exactly two users.
    Direct,
    /// Named room with one or more members.
    Group,
}

impl RoomKind {
    #[must_use]
    pub fn is_group(self) -> bool {
        self == RoomKind::Group
    }
}

/// A room as listed to its members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomView {
    pub id: RoomId,
    pub name: String,
    pub kind: RoomKind,
    pub is_group: bool,
    pub members: Vec<UserSummary>,
    pub last_message_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn summary() -> UserSummary {
        UserSummary {
            id: Uuid::nil(),
            name: "Alice".into(),
            email: "alice@example.com".into(),
            avatar: None,
        }
    }

    #[test]
    fn test_sender_ref_shapes() {
        let bare = serde_json::to_value(SenderRef::Id(Uuid::nil())).unwrap();
        assert_eq!(bare, json!("00000000-0000-0000-0000-000000000000"));

        let populated = serde_json::to_value(SenderRef::Populated(summary())).unwrap();
        assert_eq!(populated["name"], "Alice");
        assert!(populated.get("avatar").is_none());
    }

    #[test]
    fn test_sender_ref_parses_both_shapes() {
        let bare: SenderRef =
            serde_json::from_value(json!("00000000-0000-0000-0000-000000000000")).unwrap();
        assert!(!bare.is_populated());

        let populated: SenderRef = serde_json::from_value(json!({
            "id": "00000000-0000-0000-0000-000000000000",
            "name": "Alice",
            "email": "alice@example.com"
        }))
        .unwrap();
        assert!(populated.is_populated());
        assert_eq!(bare.id(), populated.id());
    }

    #[test]
    fn test_room_kind_lowercase() {
        assert_eq!(serde_json::to_value(RoomKind::Direct).unwrap(), json!("direct"));
        assert!(RoomKind::Group.is_group());
    }
}
