//! In-memory store backed by concurrent maps.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{MessageStore, RoomStore, StoreError, StoreResult, UserStore};
use crate::model::{direct_key, Message, MessageId, PushEndpoint, Room, RoomId, User, UserId};

/// Process-local store.
///
/// Single-record updates go through DashMap entry locks, so a conditional
/// update cannot interleave with another write on the same record.
#[derive(Debug, Default)]
pub struct MemoryStore {
    users: DashMap<UserId, User>,
    rooms: DashMap<RoomId, Room>,
    /// Direct room index keyed by the sorted member pair.
    direct: DashMap<String, RoomId>,
    messages: DashMap<MessageId, Message>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored messages, tombstones included.
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }
}

#[async_trait]
impl RoomStore for MemoryStore {
    async fn insert_room(&self, room: &Room) -> StoreResult<()> {
        if let Some(key) = room.direct_key() {
            match self.direct.entry(key) {
                Entry::Occupied(_) => {
                    return Err(StoreError::Conflict("direct room already exists".into()));
                }
                Entry::Vacant(slot) => {
                    slot.insert(room.id);
                }
            }
        }
        self.rooms.insert(room.id, room.clone());
        Ok(())
    }

    async fn room(&self, id: RoomId) -> StoreResult<Option<Room>> {
        Ok(self.rooms.get(&id).map(|r| r.clone()))
    }

    async fn find_direct(&self, a: UserId, b: UserId) -> StoreResult<Option<Room>> {
        let Some(id) = self.direct.get(&direct_key(a, b)).map(|id| *id) else {
            return Ok(None);
        };
        self.room(id).await
    }

    async fn rooms_for_member(&self, user_id: UserId) -> StoreResult<Vec<Room>> {
        let mut rooms: Vec<Room> = self
            .rooms
            .iter()
            .filter(|r| r.is_member(user_id))
            .map(|r| r.clone())
            .collect();
        rooms.sort_by(|a, b| {
            b.last_message_at
                .cmp(&a.last_message_at)
                .then_with(|| b.updated_at.cmp(&a.updated_at))
        });
        Ok(rooms)
    }

    async fn is_member(&self, room_id: RoomId, user_id: UserId) -> StoreResult<bool> {
        Ok(self
            .rooms
            .get(&room_id)
            .is_some_and(|r| r.is_member(user_id)))
    }

    async fn touch_room(&self, room_id: RoomId, at: DateTime<Utc>) -> StoreResult<()> {
        let mut room = self.rooms.get_mut(&room_id).ok_or(StoreError::NotFound("room"))?;
        if at > room.last_message_at {
            room.last_message_at = at;
            room.updated_at = at;
        }
        Ok(())
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn insert_message(&self, message: &Message) -> StoreResult<()> {
        self.messages.insert(message.id, message.clone());
        Ok(())
    }

    async fn message(&self, id: MessageId) -> StoreResult<Option<Message>> {
        Ok(self.messages.get(&id).map(|m| m.clone()))
    }

    async fn messages_in_room(&self, room_id: RoomId) -> StoreResult<Vec<Message>> {
        let mut messages: Vec<Message> = self
            .messages
            .iter()
            .filter(|m| m.room_id == room_id)
            .map(|m| m.clone())
            .collect();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(messages)
    }

    async fn update_body(
        &self,
        id: MessageId,
        body: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Message>> {
        let Some(mut message) = self.messages.get_mut(&id) else {
            return Ok(None);
        };
        if message.apply_edit(body, at).is_err() {
            return Ok(None);
        }
        Ok(Some(message.clone()))
    }

    async fn tombstone(&self, id: MessageId, at: DateTime<Utc>) -> StoreResult<Option<Message>> {
        let Some(mut message) = self.messages.get_mut(&id) else {
            return Ok(None);
        };
        if !message.tombstone(at) {
            return Ok(None);
        }
        Ok(Some(message.clone()))
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn upsert_user(&self, user: &User) -> StoreResult<()> {
        self.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn user(&self, id: UserId) -> StoreResult<Option<User>> {
        Ok(self.users.get(&id).map(|u| u.clone()))
    }

    async fn users(&self, ids: &[UserId]) -> StoreResult<Vec<User>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.users.get(id).map(|u| u.clone()))
            .collect())
    }

    async fn find_by_emails(&self, emails: &[String]) -> StoreResult<Vec<UserId>> {
        Ok(self
            .users
            .iter()
            .filter(|u| emails.iter().any(|e| e.eq_ignore_ascii_case(&u.email)))
            .map(|u| u.id)
            .collect())
    }

    async fn add_endpoint(&self, user_id: UserId, endpoint: &PushEndpoint) -> StoreResult<bool> {
        let mut user = self.users.get_mut(&user_id).ok_or(StoreError::NotFound("user"))?;
        if user.endpoints.iter().any(|e| e.endpoint == endpoint.endpoint) {
            return Ok(false);
        }
        user.endpoints.push(endpoint.clone());
        Ok(true)
    }
}
