//! Frame types for the Parley channel.
//!
//! Inbound frames are client intents, outbound frames are server events.
//! Both are adjacently tagged: `{"event": "sendMessage", "data": {...}}`.

use serde::{Deserialize, Serialize};

use crate::version::Version;
use crate::views::{MessageId, MessageView, RoomId, UserId};

/// Event kind identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EventKind {
    JoinRoom = 0x01,
    LeaveRoom = 0x02,
    Typing = 0x03,
    SendMessage = 0x04,
    EditMessage = 0x05,
    DeleteMessage = 0x06,
    Connected = 0x10,
    NewMessage = 0x11,
    MessageEdited = 0x12,
    MessageDeleted = 0x13,
    UserTyping = 0x14,
}

impl EventKind {
    /// Wire name of the event.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::JoinRoom => "joinRoom",
            EventKind::LeaveRoom => "leaveRoom",
            EventKind::Typing => "typing",
            EventKind::SendMessage => "sendMessage",
            EventKind::EditMessage => "editMessage",
            EventKind::DeleteMessage => "deleteMessage",
            EventKind::Connected => "connected",
            EventKind::NewMessage => "newMessage",
            EventKind::MessageEdited => "messageEdited",
            EventKind::MessageDeleted => "messageDeleted",
            EventKind::UserTyping => "userTyping",
        }
    }

    /// Whether this kind is sent by clients.
    #[must_use]
    pub fn is_inbound(self) -> bool {
        (self as u8) < 0x10
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typing signal sent by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingSignal {
    pub room_id: RoomId,
    pub is_typing: bool,
}

/// New message sent by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    pub room_id: RoomId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
}

/// Edit of a previously sent message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditMessage {
    pub message_id: MessageId,
    #[serde(default)]
    pub text: String,
}

/// Deletion of a previously sent message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteMessage {
    pub message_id: MessageId,
}

/// An inbound client intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientIntent {
    /// Subscribe the session to a room.
    JoinRoom(RoomId),
    /// Unsubscribe the session from a room.
    LeaveRoom(RoomId),
    /// Typing indicator for a room.
    Typing(TypingSignal),
    /// Post a message.
    SendMessage(SendMessage),
    /// Replace the text of an own message.
    EditMessage(EditMessage),
    /// Tombstone an own message.
    DeleteMessage(DeleteMessage),
}

impl ClientIntent {
    /// Get the event kind.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            ClientIntent::JoinRoom(_) => EventKind::JoinRoom,
            ClientIntent::LeaveRoom(_) => EventKind::LeaveRoom,
            ClientIntent::Typing(_) => EventKind::Typing,
            ClientIntent::SendMessage(_) => EventKind::SendMessage,
            ClientIntent::EditMessage(_) => EventKind::EditMessage,
            ClientIntent::DeleteMessage(_) => EventKind::DeleteMessage,
        }
    }

    /// Create a join intent.
    #[must_use]
    pub fn join(room_id: RoomId) -> Self {
        ClientIntent::JoinRoom(room_id)
    }

    /// Create a leave intent.
    #[must_use]
    pub fn leave(room_id: RoomId) -> Self {
        ClientIntent::LeaveRoom(room_id)
    }

    /// Create a text message intent.
    #[must_use]
    pub fn send_text(room_id: RoomId, text: impl Into<String>) -> Self {
        ClientIntent::SendMessage(SendMessage {
            room_id,
            text: Some(text.into()),
            file_url: None,
            file_type: None,
        })
    }

    /// Create an edit intent.
    #[must_use]
    pub fn edit(message_id: MessageId, text: impl Into<String>) -> Self {
        ClientIntent::EditMessage(EditMessage {
            message_id,
            text: text.into(),
        })
    }

    /// Create a delete intent.
    #[must_use]
    pub fn delete(message_id: MessageId) -> Self {
        ClientIntent::DeleteMessage(DeleteMessage { message_id })
    }

    /// Create a typing intent.
    #[must_use]
    pub fn typing(room_id: RoomId, is_typing: bool) -> Self {
        ClientIntent::Typing(TypingSignal { room_id, is_typing })
    }
}

/// Handshake acknowledgement sent once the session is authenticated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Welcome {
    /// Unique session identifier.
    pub session_id: String,
    /// Authenticated user.
    pub user_id: UserId,
    /// Protocol version spoken by the server.
    pub protocol: Version,
}

/// Typing indicator relayed to other sessions of a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingNotice {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub is_typing: bool,
}

/// An outbound server event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Session established.
    Connected(Welcome),
    /// A message was appended to a room.
    NewMessage(MessageView),
    /// A message text was replaced.
    MessageEdited(MessageView),
    /// A message was tombstoned.
    MessageDeleted(MessageView),
    /// Someone started or stopped typing.
    UserTyping(TypingNotice),
}

impl ServerEvent {
    /// Get the event kind.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            ServerEvent::Connected(_) => EventKind::Connected,
            ServerEvent::NewMessage(_) => EventKind::NewMessage,
            ServerEvent::MessageEdited(_) => EventKind::MessageEdited,
            ServerEvent::MessageDeleted(_) => EventKind::MessageDeleted,
            ServerEvent::UserTyping(_) => EventKind::UserTyping,
        }
    }

    /// The message carried by this event, if any.
    #[must_use]
    pub fn message(&self) -> Option<&MessageView> {
        match self {
            ServerEvent::NewMessage(m)
            | ServerEvent::MessageEdited(m)
            | ServerEvent::MessageDeleted(m) => Some(m),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn test_event_kind() {
        let join = ClientIntent::join(Uuid::nil());
        assert_eq!(join.kind(), EventKind::JoinRoom);
        assert!(join.kind().is_inbound());
        assert!(!EventKind::NewMessage.is_inbound());
        assert_eq!(EventKind::UserTyping.to_string(), "userTyping");
    }

    #[test]
    fn test_intent_wire_shape() {
        let value = serde_json::to_value(ClientIntent::join(Uuid::nil())).unwrap();
        assert_eq!(
            value,
            json!({"event": "joinRoom", "data": "00000000-0000-0000-0000-000000000000"})
        );
    }

    #[test]
    fn test_send_message_optional_fields() {
        let intent: ClientIntent = serde_json::from_value(json!({
            "event": "sendMessage",
            "data": {
                "roomId": "00000000-0000-0000-0000-000000000000",
                "fileUrl": "https://files.example.com/a.png",
                "fileType": "image/png"
            }
        }))
        .unwrap();

        match intent {
            ClientIntent::SendMessage(send) => {
                assert!(send.text.is_none());
                assert_eq!(send.file_type.as_deref(), Some("image/png"));
            }
            other => panic!("Expected SendMessage, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_event_rejected() {
        let result: Result<ClientIntent, _> =
            serde_json::from_value(json!({"event": "shout", "data": {}}));
        assert!(result.is_err());
    }

    #[test]
    fn test_typing_notice_shape() {
        let event = ServerEvent::UserTyping(TypingNotice {
            room_id: Uuid::nil(),
            user_id: Uuid::nil(),
            is_typing: true,
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "userTyping");
        assert_eq!(value["data"]["isTyping"], true);
        assert!(event.message().is_none());
    }
}
