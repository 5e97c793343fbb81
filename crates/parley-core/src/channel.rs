//! Per-room fan-out channel.
//!
//! Every joined room owns one broadcast channel; each joined session holds a
//! receiver. A slow receiver lags and skips instead of blocking the sender.

use parley_protocol::ServerEvent;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::model::{RoomId, UserId};

/// Default broadcast channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// A session identifier.
pub type SessionId = String;

/// An event in flight, optionally hidden from the session that caused it.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub event: Arc<ServerEvent>,
    pub exclude: Option<SessionId>,
}

impl Envelope {
    /// Whether the given session should receive this envelope.
    #[must_use]
    pub fn is_for(&self, session_id: &str) -> bool {
        self.exclude.as_deref() != Some(session_id)
    }
}

/// Fan-out channel of a single room.
#[derive(Debug)]
pub struct RoomChannel {
    room_id: RoomId,
    sender: broadcast::Sender<Envelope>,
    /// Joined sessions and the user behind each.
    subscribers: HashMap<SessionId, UserId>,
    capacity: usize,
}

impl RoomChannel {
    #[must_use]
    pub fn new(room_id: RoomId) -> Self {
        Self::with_capacity(room_id, DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a channel with a specific capacity.
    #[must_use]
    pub fn with_capacity(room_id: RoomId, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            room_id,
            sender,
            subscribers: HashMap::new(),
            capacity,
        }
    }

    #[must_use]
    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    #[must_use]
    pub fn is_subscribed(&self, session_id: &str) -> bool {
        self.subscribers.contains_key(session_id)
    }

    /// Whether any session of the user is joined.
    #[must_use]
    pub fn has_user(&self, user_id: UserId) -> bool {
        self.subscribers.values().any(|u| *u == user_id)
    }

    /// Distinct users with at least one joined session.
    #[must_use]
    pub fn users(&self) -> HashSet<UserId> {
        self.subscribers.values().copied().collect()
    }

    /// Join a session and hand out its receiver.
    pub fn subscribe(
        &mut self,
        session_id: impl Into<SessionId>,
        user_id: UserId,
    ) -> broadcast::Receiver<Envelope> {
        let session_id = session_id.into();
        debug!(room = %self.room_id, session = %session_id, user = %user_id, "Session joined room");
        self.subscribers.insert(session_id, user_id);
        self.sender.subscribe()
    }

    /// Remove a session. Returns the user it belonged to.
    pub fn unsubscribe(&mut self, session_id: &str) -> Option<UserId> {
        let user = self.subscribers.remove(session_id);
        if user.is_some() {
            debug!(room = %self.room_id, session = %session_id, "Session left room");
        }
        user
    }

    /// Publish an event to every joined session except `exclude`.
    ///
    /// Returns the number of sessions the event was handed to.
    pub fn publish(&self, event: Arc<ServerEvent>, exclude: Option<SessionId>) -> usize {
        let skipped = exclude
            .as_deref()
            .is_some_and(|s| self.is_subscribed(s));
        let envelope = Envelope { event, exclude };
        trace!(room = %self.room_id, "Publishing event");
        let handed = self.sender.send(envelope).unwrap_or_default();
        handed.saturating_sub(usize::from(skipped))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::new_id;
    use parley_protocol::TypingNotice;

    fn typing_event(room_id: RoomId) -> Arc<ServerEvent> {
        Arc::new(ServerEvent::UserTyping(TypingNotice {
            room_id,
            user_id: new_id(),
            is_typing: true,
        }))
    }

    #[test]
    fn test_subscribe_unsubscribe() {
        let room = new_id();
        let user = new_id();
        let mut channel = RoomChannel::new(room);
        assert!(channel.is_empty());

        let _rx = channel.subscribe("s-1", user);
        let _rx2 = channel.subscribe("s-2", user);
        assert_eq!(channel.subscriber_count(), 2);
        assert_eq!(channel.users().len(), 1);

        assert_eq!(channel.unsubscribe("s-1"), Some(user));
        assert!(channel.has_user(user));
        assert_eq!(channel.unsubscribe("s-1"), None);
        assert_eq!(channel.unsubscribe("s-2"), Some(user));
        assert!(!channel.has_user(user));
    }

    #[tokio::test]
    async fn test_publish_with_exclusion() {
        let room = new_id();
        let mut channel = RoomChannel::new(room);
        let mut rx1 = channel.subscribe("s-1", new_id());
        let mut rx2 = channel.subscribe("s-2", new_id());

        let handed = channel.publish(typing_event(room), Some("s-1".into()));
        assert_eq!(handed, 1);

        let env1 = rx1.recv().await.unwrap();
        let env2 = rx2.recv().await.unwrap();
        assert!(!env1.is_for("s-1"));
        assert!(env2.is_for("s-2"));
    }

    #[test]
    fn test_publish_without_receivers() {
        let room = new_id();
        let channel = RoomChannel::with_capacity(room, 4);
        assert_eq!(channel.publish(typing_event(room), None), 0);
        assert_eq!(channel.capacity(), 4);
    }
}
