//! Storage traits for rooms, messages and users.
//!
//! The core only talks to storage through these traits. [`MemoryStore`] is the
//! in-process implementation; the durable one lives in `parley-store`.

mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::{Message, MessageId, PushEndpoint, Room, RoomId, User, UserId};

pub use memory::MemoryStore;

/// Storage errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The addressed record does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// A uniqueness constraint was violated.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The backend failed.
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Result alias for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Room persistence.
#[async_trait]
pub trait RoomStore: Send + Sync {
    /// Insert a new room.
    ///
    /// Fails with [`StoreError::Conflict`] when a direct room already exists
    /// for the same member pair.
    async fn insert_room(&self, room: &Room) -> StoreResult<()>;

    /// Get a room by id.
    async fn room(&self, id: RoomId) -> StoreResult<Option<Room>>;

    /// Find the direct room between two users.
    async fn find_direct(&self, a: UserId, b: UserId) -> StoreResult<Option<Room>>;

    /// Rooms a user belongs to, most recent activity first.
    async fn rooms_for_member(&self, user_id: UserId) -> StoreResult<Vec<Room>>;

    /// Check membership.
    async fn is_member(&self, room_id: RoomId, user_id: UserId) -> StoreResult<bool>;

    /// Record activity on a room.
    async fn touch_room(&self, room_id: RoomId, at: DateTime<Utc>) -> StoreResult<()>;
}

/// Message persistence.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Insert a new message.
    async fn insert_message(&self, message: &Message) -> StoreResult<()>;

    /// Get a message by id.
    async fn message(&self, id: MessageId) -> StoreResult<Option<Message>>;

    /// Messages of a room, oldest first, ties broken by id.
    async fn messages_in_room(&self, room_id: RoomId) -> StoreResult<Vec<Message>>;

    /// Replace the body of a message that is not deleted.
    ///
    /// Returns the updated message, or `None` if the message is deleted or
    /// does not exist. The check and the write are one atomic step.
    async fn update_body(
        &self,
        id: MessageId,
        body: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Message>>;

    /// Tombstone a message that is not deleted yet.
    ///
    /// Returns the tombstone, or `None` if the message already was one or
    /// does not exist.
    async fn tombstone(&self, id: MessageId, at: DateTime<Utc>) -> StoreResult<Option<Message>>;
}

/// User lookups and push endpoint registration.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert or replace a user.
    async fn upsert_user(&self, user: &User) -> StoreResult<()>;

    /// Get a user by id.
    async fn user(&self, id: UserId) -> StoreResult<Option<User>>;

    /// Get several users. Unknown ids are skipped.
    async fn users(&self, ids: &[UserId]) -> StoreResult<Vec<User>>;

    /// Resolve email addresses to user ids. Unknown addresses are skipped.
    async fn find_by_emails(&self, emails: &[String]) -> StoreResult<Vec<UserId>>;

    /// Register a push endpoint.
    ///
    /// Returns `false` if an endpoint with the same URL was already stored.
    async fn add_endpoint(&self, user_id: UserId, endpoint: &PushEndpoint) -> StoreResult<bool>;
}

/// A backend implementing every store trait.
pub trait Store: RoomStore + MessageStore + UserStore {}

impl<T: RoomStore + MessageStore + UserStore> Store for T {}
