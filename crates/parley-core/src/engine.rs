//! The synchronization engine.
//!
//! Runs the pipeline shared by the channel and REST surfaces: mutate through
//! the Message Log, fan out through the Broadcaster, then notify offline
//! devices on a detached task. No lock is held across the three steps.

use parley_protocol::{MessageView, RoomView, ServerEvent};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::broadcaster::{Broadcaster, BroadcasterConfig};
use crate::directory::{NewRoom, RoomDirectory};
use crate::error::{CoreError, CoreResult};
use crate::format::{format_message, format_messages, format_room};
use crate::message_log::MessageLog;
use crate::model::{Attachment, Message, MessageId, PushEndpoint, RoomId, User, UserId};
use crate::notify::{DispatchReport, Notification, NotificationDispatcher, NotifyPolicy, PushGateway};
use crate::store::{Store, UserStore};

/// Engine configuration.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub broadcaster: BroadcasterConfig,
    pub notify_policy: NotifyPolicy,
}

/// Body of a new message.
#[derive(Debug, Clone, Default)]
pub struct Draft {
    pub text: Option<String>,
    pub file_url: Option<String>,
    pub file_type: Option<String>,
}

impl Draft {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }
}

/// Room creation outcome as seen by clients.
#[derive(Debug, Clone)]
pub struct RoomCreation {
    pub room: RoomView,
    pub created: bool,
}

/// Room and message operations with fan-out and notification.
#[derive(Clone)]
pub struct Engine {
    directory: RoomDirectory,
    log: MessageLog,
    users: Arc<dyn UserStore>,
    broadcaster: Arc<Broadcaster>,
    dispatcher: Option<Arc<NotificationDispatcher>>,
    policy: NotifyPolicy,
}

impl Engine {
    /// Build an engine over a store. Push notification is off until
    /// [`Engine::with_push`] is called.
    #[must_use]
    pub fn new<S: Store + 'static>(store: Arc<S>, config: EngineConfig) -> Self {
        let directory = RoomDirectory::new(store.clone(), store.clone());
        let log = MessageLog::new(directory.clone(), store.clone());
        let broadcaster = Arc::new(Broadcaster::with_config(directory.clone(), config.broadcaster));

        Self {
            directory,
            log,
            users: store,
            broadcaster,
            dispatcher: None,
            policy: config.notify_policy,
        }
    }

    /// Enable push notification through the given gateway.
    #[must_use]
    pub fn with_push(mut self, gateway: Arc<dyn PushGateway>, timeout: Duration) -> Self {
        let dispatcher = NotificationDispatcher::new(self.users.clone(), gateway).with_timeout(timeout);
        self.dispatcher = Some(Arc::new(dispatcher));
        self
    }

    #[must_use]
    pub fn directory(&self) -> &RoomDirectory {
        &self.directory
    }

    #[must_use]
    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    #[must_use]
    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    #[must_use]
    pub fn users(&self) -> &Arc<dyn UserStore> {
        &self.users
    }

    /// Whether push notification is enabled.
    #[must_use]
    pub fn push_enabled(&self) -> bool {
        self.dispatcher.is_some()
    }

    /// Rooms of a user with resolved members, most recent activity first.
    ///
    /// # Errors
    ///
    /// Fails only on storage errors.
    pub async fn list_rooms(&self, user_id: UserId) -> CoreResult<Vec<RoomView>> {
        let rooms = self.directory.list_rooms_for_user(user_id).await?;
        let member_ids: BTreeSet<UserId> = rooms.iter().flat_map(|r| r.members.iter().copied()).collect();
        let member_ids: Vec<UserId> = member_ids.into_iter().collect();
        let users = self.users.users(&member_ids).await?;
        Ok(rooms.iter().map(|r| format_room(r, &users)).collect())
    }

    /// Create a room or find the existing direct room.
    ///
    /// # Errors
    ///
    /// See [`RoomDirectory::create_room`].
    pub async fn create_room(&self, requester: UserId, request: NewRoom) -> CoreResult<RoomCreation> {
        let created = self.directory.create_room(requester, request).await?;
        let users = self.users.users(&created.room.members).await?;
        Ok(RoomCreation {
            room: format_room(&created.room, &users),
            created: created.created,
        })
    }

    /// Messages of a room with populated senders, oldest first.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown room, `AccessDenied` for a non-member.
    pub async fn list_messages(&self, room_id: RoomId, requester: UserId) -> CoreResult<Vec<MessageView>> {
        let messages = self.log.list_by_room(room_id, requester).await?;
        let senders: BTreeSet<UserId> = messages.iter().map(|m| m.sender_id).collect();
        let senders: Vec<UserId> = senders.into_iter().collect();
        let users = self.users.users(&senders).await?;
        Ok(format_messages(&messages, &users))
    }

    /// Append a message, broadcast `newMessage` and notify the other members.
    ///
    /// Returns the message with a populated sender.
    ///
    /// # Errors
    ///
    /// See [`MessageLog::append`]. Notification never fails the send.
    pub async fn send_message(&self, sender_id: UserId, room_id: RoomId, draft: Draft) -> CoreResult<MessageView> {
        let attachment = Attachment::from_parts(draft.file_url, draft.file_type);
        let message = self
            .log
            .append(room_id, sender_id, draft.text.as_deref(), attachment)
            .await?;

        let view = self.populated(&message).await;
        let delivered = self
            .broadcaster
            .broadcast(room_id, ServerEvent::NewMessage(view.clone()));
        debug!(room = %room_id, message = %message.id, delivered, "New message fanned out");

        self.spawn_notify(&message);
        Ok(view)
    }

    /// Edit an own message and broadcast `messageEdited`.
    ///
    /// # Errors
    ///
    /// See [`MessageLog::edit`].
    pub async fn edit_message(&self, requester: UserId, message_id: MessageId, text: &str) -> CoreResult<MessageView> {
        let message = self.log.edit(message_id, requester, text).await?;
        self.broadcaster.broadcast(
            message.room_id,
            ServerEvent::MessageEdited(format_message(&message, None)),
        );
        Ok(self.populated(&message).await)
    }

    /// Delete an own message and broadcast `messageDeleted`.
    ///
    /// # Errors
    ///
    /// See [`MessageLog::delete`].
    pub async fn delete_message(&self, requester: UserId, message_id: MessageId) -> CoreResult<MessageView> {
        let message = self.log.delete(message_id, requester).await?;
        self.broadcaster.broadcast(
            message.room_id,
            ServerEvent::MessageDeleted(format_message(&message, None)),
        );
        Ok(self.populated(&message).await)
    }

    /// Register a push endpoint for a user.
    ///
    /// Returns `false` if the endpoint URL was already registered.
    ///
    /// # Errors
    ///
    /// `Validation` for a blank endpoint, `NotFound` for an unknown user.
    pub async fn subscribe_push(&self, user_id: UserId, endpoint: PushEndpoint) -> CoreResult<bool> {
        if endpoint.endpoint.trim().is_empty() {
            return Err(CoreError::validation("endpoint is required"));
        }
        Ok(self.users.add_endpoint(user_id, &endpoint).await?)
    }

    /// Look up a user.
    ///
    /// # Errors
    ///
    /// `NotFound` if the id does not resolve.
    pub async fn user(&self, user_id: UserId) -> CoreResult<User> {
        self.users
            .user(user_id)
            .await?
            .ok_or(CoreError::NotFound("user"))
    }

    async fn populated(&self, message: &Message) -> MessageView {
        let sender = match self.users.user(message.sender_id).await {
            Ok(sender) => sender,
            Err(e) => {
                warn!(user = %message.sender_id, error = %e, "Sender lookup failed");
                None
            }
        };
        format_message(message, sender.as_ref())
    }

    /// Notify the other members of the message's room on a detached task.
    fn spawn_notify(&self, message: &Message) -> Option<JoinHandle<DispatchReport>> {
        let Some(dispatcher) = self.dispatcher.clone() else {
            debug!(message = %message.id, "Push disabled, skipping notification");
            return None;
        };

        // Snapshot who is online now, before the task runs.
        let online: HashSet<UserId> = match self.policy {
            NotifyPolicy::AllMembers => HashSet::new(),
            NotifyPolicy::OfflineOnly => self.broadcaster.joined_users(message.room_id),
        };
        let directory = self.directory.clone();
        let notification = Notification::new_message(message);
        let room_id = message.room_id;
        let sender_id = message.sender_id;

        Some(tokio::spawn(async move {
            let room = match directory.room(room_id).await {
                Ok(room) => room,
                Err(e) => {
                    warn!(room = %room_id, error = %e, "Could not load room for notification");
                    return DispatchReport::default();
                }
            };
            let recipients: Vec<UserId> = room
                .members
                .into_iter()
                .filter(|id| *id != sender_id && !online.contains(id))
                .collect();
            dispatcher.notify(&recipients, &notification).await
        }))
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("broadcaster", &self.broadcaster)
            .field("dispatcher", &self.dispatcher)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcaster::SessionHandle;
    use crate::model::{new_id, RoomKind};
    use crate::notify::tests::RecordingGateway;
    use crate::store::MemoryStore;
    use parley_protocol::SenderRef;
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio::time::timeout;

    struct Fixture {
        engine: Engine,
        alice: User,
        bob: User,
        room: RoomId,
        pushes: UnboundedReceiver<(String, serde_json::Value)>,
    }

    async fn fixture(policy: NotifyPolicy) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let alice = User::new("Alice", "alice@example.com").with_endpoint(PushEndpoint::new("https://push/alice"));
        let bob = User::new("Bob", "bob@example.com").with_endpoint(PushEndpoint::new("https://push/bob"));
        store.upsert_user(&alice).await.unwrap();
        store.upsert_user(&bob).await.unwrap();

        let (gateway, pushes) = RecordingGateway::new();
        let engine = Engine::new(
            store,
            EngineConfig {
                notify_policy: policy,
                ..Default::default()
            },
        )
        .with_push(Arc::new(gateway), Duration::from_secs(1));

        let room = engine
            .create_room(
                alice.id,
                NewRoom {
                    kind: Some(RoomKind::Direct),
                    member_emails: vec!["bob@example.com".into()],
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .room
            .id;

        Fixture {
            engine,
            alice,
            bob,
            room,
            pushes,
        }
    }

    #[tokio::test]
    async fn test_send_fans_out_and_notifies_others() {
        let mut f = fixture(NotifyPolicy::AllMembers).await;
        let broadcaster = f.engine.broadcaster().clone();
        let mut sub_a = broadcaster
            .join(&SessionHandle::new("s-a", f.alice.id), f.room)
            .await
            .unwrap()
            .unwrap();
        let mut sub_b = broadcaster
            .join(&SessionHandle::new("s-b", f.bob.id), f.room)
            .await
            .unwrap()
            .unwrap();

        let sent = f
            .engine
            .send_message(f.alice.id, f.room, Draft::text("hello"))
            .await
            .unwrap();
        assert!(sent.sender.is_populated());

        for sub in [&mut sub_a, &mut sub_b] {
            let event = sub.recv().await.unwrap();
            let ServerEvent::NewMessage(view) = event.as_ref() else {
                panic!("Expected newMessage, got {:?}", event);
            };
            assert_eq!(view.id, sent.id);
            assert_eq!(view.text, "hello");
            assert!(view.sender.is_populated());
        }

        let (endpoint, payload) = timeout(Duration::from_secs(1), f.pushes.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(endpoint, "https://push/bob");
        assert_eq!(payload["body"], "hello");
        assert_eq!(payload["data"]["roomId"], f.room.to_string());

        // The sender is never notified.
        assert!(timeout(Duration::from_millis(50), f.pushes.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_offline_only_skips_joined_members() {
        let mut f = fixture(NotifyPolicy::OfflineOnly).await;
        let _sub_b = f
            .engine
            .broadcaster()
            .join(&SessionHandle::new("s-b", f.bob.id), f.room)
            .await
            .unwrap()
            .unwrap();

        f.engine
            .send_message(f.alice.id, f.room, Draft::text("you're here"))
            .await
            .unwrap();
        assert!(timeout(Duration::from_millis(50), f.pushes.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_edit_then_late_join_sees_edit() {
        let f = fixture(NotifyPolicy::AllMembers).await;
        let mut sub_a = f
            .engine
            .broadcaster()
            .join(&SessionHandle::new("s-a", f.alice.id), f.room)
            .await
            .unwrap()
            .unwrap();

        let sent = f
            .engine
            .send_message(f.alice.id, f.room, Draft::text("first"))
            .await
            .unwrap();
        f.engine.edit_message(f.alice.id, sent.id, "second").await.unwrap();

        assert!(matches!(sub_a.recv().await.as_deref(), Some(ServerEvent::NewMessage(_))));
        let edited = sub_a.recv().await.unwrap();
        let ServerEvent::MessageEdited(view) = edited.as_ref() else {
            panic!("Expected messageEdited, got {:?}", edited);
        };
        assert_eq!(view.text, "second");
        assert_eq!(view.sender, SenderRef::Id(f.alice.id));

        // Bob joins late and lists.
        let history = f.engine.list_messages(f.room, f.bob.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].text, "second");
        assert!(history[0].edited);
        assert!(history[0].sender.is_populated());
    }

    #[tokio::test]
    async fn test_delete_broadcasts_tombstone() {
        let f = fixture(NotifyPolicy::AllMembers).await;
        let mut sub_b = f
            .engine
            .broadcaster()
            .join(&SessionHandle::new("s-b", f.bob.id), f.room)
            .await
            .unwrap()
            .unwrap();

        let sent = f
            .engine
            .send_message(f.alice.id, f.room, Draft::text("oops"))
            .await
            .unwrap();
        let deleted = f.engine.delete_message(f.alice.id, sent.id).await.unwrap();
        assert!(deleted.deleted);
        assert!(deleted.text.is_empty());

        sub_b.recv().await.unwrap();
        let event = sub_b.recv().await.unwrap();
        let ServerEvent::MessageDeleted(view) = event.as_ref() else {
            panic!("Expected messageDeleted, got {:?}", event);
        };
        assert!(view.deleted);
        assert!(!view.sender.is_populated());
    }

    #[tokio::test]
    async fn test_rejected_send_has_no_side_effects() {
        let mut f = fixture(NotifyPolicy::AllMembers).await;
        let stranger = new_id();

        let err = f
            .engine
            .send_message(stranger, f.room, Draft::text("let me in"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::AccessDenied(_)));
        assert!(f.engine.list_messages(f.room, f.alice.id).await.unwrap().is_empty());
        assert!(timeout(Duration::from_millis(50), f.pushes.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_list_rooms_resolves_members() {
        let f = fixture(NotifyPolicy::AllMembers).await;
        let rooms = f.engine.list_rooms(f.bob.id).await.unwrap();
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0].members.len(), 2);
        assert!(!rooms[0].is_group);
    }

    #[tokio::test]
    async fn test_subscribe_push_dedup() {
        let f = fixture(NotifyPolicy::AllMembers).await;
        let endpoint = PushEndpoint::new("https://push/alice-2");

        assert!(f.engine.subscribe_push(f.alice.id, endpoint.clone()).await.unwrap());
        assert!(!f.engine.subscribe_push(f.alice.id, endpoint).await.unwrap());
        assert!(matches!(
            f.engine.subscribe_push(f.alice.id, PushEndpoint::new(" ")).await,
            Err(CoreError::Validation(_))
        ));
        assert_eq!(f.engine.user(f.alice.id).await.unwrap().endpoints.len(), 2);
    }

    #[tokio::test]
    async fn test_push_disabled() {
        let store = Arc::new(MemoryStore::new());
        let engine = Engine::new(store, EngineConfig::default());
        assert!(!engine.push_enabled());

        let alice = new_id();
        let room = engine
            .create_room(
                alice,
                NewRoom {
                    kind: Some(RoomKind::Group),
                    name: Some("solo".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(room.created);

        let sent = engine
            .send_message(alice, room.room.id, Draft::text("note to self"))
            .await
            .unwrap();
        // Unknown sender record: bare id.
        assert_eq!(sent.sender, SenderRef::Id(alice));
    }
}
