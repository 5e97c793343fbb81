//! Output shaping for rooms and messages.

use parley_protocol::{MessageView, RoomView, SenderRef};
use std::collections::HashMap;

use crate::model::{Message, Room, User, UserId};

/// Format a message.
///
/// The sender is populated when its record is given and matches, and left as
/// a bare id otherwise.
#[must_use]
pub fn format_message(message: &Message, sender: Option<&User>) -> MessageView {
    let sender = match sender {
        Some(user) if user.id == message.sender_id => SenderRef::Populated(user.summary()),
        _ => SenderRef::Id(message.sender_id),
    };
    let (file_url, file_type) = match &message.attachment {
        Some(a) => (Some(a.url.clone()), a.mime_type.clone()),
        None => (None, None),
    };

    MessageView {
        id: message.id,
        room: message.room_id,
        sender,
        text: message.body.clone(),
        file_url,
        file_type,
        edited: message.edited,
        deleted: message.is_deleted(),
        created_at: message.created_at,
        updated_at: message.updated_at,
    }
}

/// Format a batch of messages, populating senders found in `users`.
#[must_use]
pub fn format_messages(messages: &[Message], users: &[User]) -> Vec<MessageView> {
    let by_id: HashMap<UserId, &User> = users.iter().map(|u| (u.id, u)).collect();
    messages
        .iter()
        .map(|m| format_message(m, by_id.get(&m.sender_id).copied()))
        .collect()
}

/// Format a room with the member records that could be resolved.
#[must_use]
pub fn format_room(room: &Room, users: &[User]) -> RoomView {
    let members = users
        .iter()
        .filter(|u| room.is_member(u.id))
        .map(User::summary)
        .collect();

    RoomView {
        id: room.id,
        name: room.name.clone(),
        kind: room.kind,
        is_group: room.kind.is_group(),
        members,
        last_message_at: room.last_message_at,
        created_at: room.created_at,
        updated_at: room.updated_at,
    }
}
