//! Message Log.
//!
//! Durable, ordered, append-mostly message store per room. The log knows
//! nothing about fan-out; callers broadcast what it returns.

use std::sync::Arc;
use tracing::{debug, trace};

use crate::directory::RoomDirectory;
use crate::error::{CoreError, CoreResult};
use crate::model::{now, Attachment, Message, MessageId, RoomId, UserId};
use crate::store::MessageStore;

/// Append, edit, delete and list messages.
#[derive(Clone)]
pub struct MessageLog {
    directory: RoomDirectory,
    messages: Arc<dyn MessageStore>,
}

impl MessageLog {
    #[must_use]
    pub fn new(directory: RoomDirectory, messages: Arc<dyn MessageStore>) -> Self {
        Self {
            directory,
            messages,
        }
    }

    /// Append a message to a room and record the room activity.
    ///
    /// # Errors
    ///
    /// In order of precedence: `Validation` when there is neither a body nor
    /// an attachment, `NotFound` for an unknown room, `AccessDenied` when the
    /// sender is not a member.
    pub async fn append(
        &self,
        room_id: RoomId,
        sender_id: UserId,
        body: Option<&str>,
        attachment: Option<Attachment>,
    ) -> CoreResult<Message> {
        let message = Message::new(room_id, sender_id, body, attachment, now())?;

        let room = self.directory.room(room_id).await?;
        if !room.is_member(sender_id) {
            return Err(CoreError::access_denied("not a member of this room"));
        }

        self.messages.insert_message(&message).await?;
        self.directory
            .touch_activity(room_id, message.created_at)
            .await?;

        debug!(room = %room_id, message = %message.id, user = %sender_id, "Message appended");
        Ok(message)
    }

    /// Replace the body of an own message.
    ///
    /// # Errors
    ///
    /// In order of precedence: `NotFound`, `AccessDenied` when the requester
    /// is not the sender, `InvalidState` for a tombstone, `Validation` for a
    /// blank body.
    pub async fn edit(
        &self,
        message_id: MessageId,
        requester: UserId,
        body: &str,
    ) -> CoreResult<Message> {
        let current = self.load(message_id).await?;
        if current.sender_id != requester {
            return Err(CoreError::access_denied("only the sender can edit a message"));
        }
        if current.is_deleted() {
            return Err(CoreError::invalid_state("message is deleted"));
        }
        let body = body.trim();
        if body.is_empty() {
            return Err(CoreError::validation("message text is required"));
        }

        match self.messages.update_body(message_id, body, now()).await? {
            Some(edited) => {
                debug!(message = %message_id, "Message edited");
                Ok(edited)
            }
            // Deleted between the read and the conditional write.
            None => Err(CoreError::invalid_state("message is deleted")),
        }
    }

    /// Tombstone an own message.
    ///
    /// Deleting a tombstone again returns it unchanged.
    ///
    /// # Errors
    ///
    /// `NotFound`, or `AccessDenied` when the requester is not the sender.
    pub async fn delete(&self, message_id: MessageId, requester: UserId) -> CoreResult<Message> {
        let current = self.load(message_id).await?;
        if current.sender_id != requester {
            return Err(CoreError::access_denied("only the sender can delete a message"));
        }
        if current.is_deleted() {
            trace!(message = %message_id, "Message already deleted");
            return Ok(current);
        }

        match self.messages.tombstone(message_id, now()).await? {
            Some(tombstone) => {
                debug!(message = %message_id, "Message deleted");
                Ok(tombstone)
            }
            // A concurrent delete won, return its tombstone.
            None => self.load(message_id).await,
        }
    }

    /// Messages of a room, oldest first.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown room, `AccessDenied` for a non-member.
    pub async fn list_by_room(&self, room_id: RoomId, requester: UserId) -> CoreResult<Vec<Message>> {
        let room = self.directory.room(room_id).await?;
        if !room.is_member(requester) {
            return Err(CoreError::access_denied("not a member of this room"));
        }
        Ok(self.messages.messages_in_room(room_id).await?)
    }

    /// Look up a single message.
    ///
    /// # Errors
    ///
    /// `NotFound` if the id does not resolve.
    pub async fn load(&self, message_id: MessageId) -> CoreResult<Message> {
        self.messages
            .message(message_id)
            .await?
            .ok_or(CoreError::NotFound("message"))
    }
}

impl std::fmt::Debug for MessageLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageLog").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::NewRoom;
    use crate::model::{new_id, RoomKind};
    use crate::store::MemoryStore;

    struct Fixture {
        log: MessageLog,
        directory: RoomDirectory,
        room: RoomId,
        alice: UserId,
        bob: UserId,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let directory = RoomDirectory::new(store.clone(), store.clone());
        let log = MessageLog::new(directory.clone(), store);

        let alice = new_id();
        let bob = new_id();
        let room = directory
            .create_room(
                alice,
                NewRoom {
                    kind: Some(RoomKind::Direct),
                    member_ids: vec![bob],
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .room
            .id;

        Fixture {
            log,
            directory,
            room,
            alice,
            bob,
        }
    }

    #[tokio::test]
    async fn test_append_then_list() {
        let f = fixture().await;
        let before = f.directory.room(f.room).await.unwrap().last_message_at;

        let msg = f.log.append(f.room, f.alice, Some(" hello "), None).await.unwrap();
        assert_eq!(msg.body, "hello");

        let listed = f.log.list_by_room(f.room, f.bob).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, msg.id);
        assert!(!listed[0].edited);
        assert!(!listed[0].is_deleted());

        let after = f.directory.room(f.room).await.unwrap().last_message_at;
        assert!(after >= before);
        assert_eq!(after, msg.created_at.max(before));
    }

    #[tokio::test]
    async fn test_append_error_precedence() {
        let f = fixture().await;

        // Validation wins over an unknown room.
        assert!(matches!(
            f.log.append(new_id(), f.alice, Some("  "), None).await,
            Err(CoreError::Validation(_))
        ));
        assert_eq!(
            f.log.append(new_id(), f.alice, Some("hi"), None).await.unwrap_err(),
            CoreError::NotFound("room")
        );
        assert!(matches!(
            f.log.append(f.room, new_id(), Some("hi"), None).await,
            Err(CoreError::AccessDenied(_))
        ));
    }

    #[tokio::test]
    async fn test_list_order() {
        let f = fixture().await;
        let mut sent = Vec::new();
        for text in ["one", "two", "three"] {
            sent.push(f.log.append(f.room, f.alice, Some(text), None).await.unwrap().id);
        }
        let listed: Vec<_> = f
            .log
            .list_by_room(f.room, f.alice)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(listed, sent);
    }

    #[tokio::test]
    async fn test_list_requires_membership() {
        let f = fixture().await;
        f.log.append(f.room, f.alice, Some("secret"), None).await.unwrap();

        assert!(matches!(
            f.log.list_by_room(f.room, new_id()).await,
            Err(CoreError::AccessDenied(_))
        ));
        assert_eq!(
            f.log.list_by_room(new_id(), f.alice).await.unwrap_err(),
            CoreError::NotFound("room")
        );
    }

    #[tokio::test]
    async fn test_only_sender_edits_and_deletes() {
        let f = fixture().await;
        let msg = f.log.append(f.room, f.alice, Some("mine"), None).await.unwrap();

        assert!(matches!(
            f.log.edit(msg.id, f.bob, "yours").await,
            Err(CoreError::AccessDenied(_))
        ));
        assert!(matches!(
            f.log.delete(msg.id, f.bob).await,
            Err(CoreError::AccessDenied(_))
        ));
        assert_eq!(
            f.log.edit(new_id(), f.alice, "x").await.unwrap_err(),
            CoreError::NotFound("message")
        );
    }

    #[tokio::test]
    async fn test_edit() {
        let f = fixture().await;
        let msg = f.log.append(f.room, f.alice, Some("draft"), None).await.unwrap();

        assert!(matches!(
            f.log.edit(msg.id, f.alice, "   ").await,
            Err(CoreError::Validation(_))
        ));

        let edited = f.log.edit(msg.id, f.alice, "final").await.unwrap();
        assert_eq!(edited.body, "final");
        assert!(edited.edited);
        assert!(edited.updated_at >= msg.updated_at);
    }

    #[tokio::test]
    async fn test_delete_idempotent_and_final() {
        let f = fixture().await;
        let msg = f.log.append(f.room, f.alice, Some("oops"), None).await.unwrap();

        let first = f.log.delete(msg.id, f.alice).await.unwrap();
        assert!(first.is_deleted());
        assert!(first.body.is_empty());
        assert!(first.attachment.is_none());

        let second = f.log.delete(msg.id, f.alice).await.unwrap();
        assert_eq!(first, second);

        for body in ["", "restored"] {
            assert!(matches!(
                f.log.edit(msg.id, f.alice, body).await,
                Err(CoreError::InvalidState(_))
            ));
        }

        let listed = f.log.list_by_room(f.room, f.bob).await.unwrap();
        assert!(listed[0].is_deleted());
    }
}
