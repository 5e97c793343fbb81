//! Realtime Broadcaster.
//!
//! Maps rooms to joined sessions and fans events out to them. All state here
//! is derived from live connections and is never authoritative: losing it
//! only means clients have to join again.

use dashmap::{DashMap, DashSet};
use parley_protocol::{ServerEvent, TypingNotice};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::{debug, info, trace, warn};

use crate::channel::{Envelope, RoomChannel, SessionId, DEFAULT_CHANNEL_CAPACITY};
use crate::directory::RoomDirectory;
use crate::error::CoreError;
use crate::model::{now, RoomId, UserId};
use crate::typing::TypingBoard;

/// Broadcaster errors.
#[derive(Debug, Error)]
pub enum BroadcastError {
    /// The session already joined the room.
    #[error("Already joined room {0}")]
    AlreadyJoined(RoomId),

    /// The session joined too many rooms.
    #[error("Maximum joined rooms reached")]
    SubscriptionLimit,

    /// Membership lookup failed.
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Broadcaster configuration.
#[derive(Debug, Clone)]
pub struct BroadcasterConfig {
    /// Maximum rooms a single session may join.
    pub max_rooms_per_session: usize,
    /// Broadcast capacity of each room channel.
    pub channel_capacity: usize,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            max_rooms_per_session: 100,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// A connected session as seen by the broadcaster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    pub id: SessionId,
    pub user_id: UserId,
}

impl SessionHandle {
    #[must_use]
    pub fn new(id: impl Into<SessionId>, user_id: UserId) -> Self {
        Self {
            id: id.into(),
            user_id,
        }
    }
}

/// Stream of events of one room for one session.
#[derive(Debug)]
pub struct RoomSubscription {
    room_id: RoomId,
    session_id: SessionId,
    receiver: broadcast::Receiver<Envelope>,
}

impl RoomSubscription {
    #[must_use]
    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    /// Next event for this session.
    ///
    /// Events excluded for this session are skipped, as are events lost to
    /// lag. Returns `None` once the room channel is gone.
    pub async fn recv(&mut self) -> Option<Arc<ServerEvent>> {
        loop {
            match self.receiver.recv().await {
                Ok(envelope) if envelope.is_for(&self.session_id) => return Some(envelope.event),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(room = %self.room_id, session = %self.session_id, skipped, "Subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next event if one is ready.
    pub fn try_recv(&mut self) -> Option<Arc<ServerEvent>> {
        loop {
            match self.receiver.try_recv() {
                Ok(envelope) if envelope.is_for(&self.session_id) => return Some(envelope.event),
                Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }
}

struct RoomEntry {
    channel: RoomChannel,
    typing: TypingBoard,
}

impl RoomEntry {
    fn new(room_id: RoomId, capacity: usize) -> Self {
        Self {
            channel: RoomChannel::with_capacity(room_id, capacity),
            typing: TypingBoard::new(),
        }
    }
}

/// Room to session fan-out.
pub struct Broadcaster {
    /// Rooms with at least one joined session.
    rooms: DashMap<RoomId, RoomEntry>,
    /// Joined rooms per session.
    sessions: DashMap<SessionId, DashSet<RoomId>>,
    directory: RoomDirectory,
    config: BroadcasterConfig,
}

impl Broadcaster {
    #[must_use]
    pub fn new(directory: RoomDirectory) -> Self {
        Self::with_config(directory, BroadcasterConfig::default())
    }

    #[must_use]
    pub fn with_config(directory: RoomDirectory, config: BroadcasterConfig) -> Self {
        info!("Creating broadcaster with config: {:?}", config);
        Self {
            rooms: DashMap::new(),
            sessions: DashMap::new(),
            directory,
            config,
        }
    }

    /// Join a session to a room.
    ///
    /// Returns `Ok(None)` when the session's user is not a member; the join
    /// is ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the session already joined the room, hit its room
    /// limit, or the membership lookup failed.
    pub async fn join(
        &self,
        session: &SessionHandle,
        room_id: RoomId,
    ) -> Result<Option<RoomSubscription>, BroadcastError> {
        if !self.directory.is_member(room_id, session.user_id).await? {
            debug!(room = %room_id, session = %session.id, "Join ignored for non-member");
            return Ok(None);
        }

        let joined = self.sessions.entry(session.id.clone()).or_default();
        if joined.contains(&room_id) {
            return Err(BroadcastError::AlreadyJoined(room_id));
        }
        if joined.len() >= self.config.max_rooms_per_session {
            return Err(BroadcastError::SubscriptionLimit);
        }

        let mut entry = self.rooms.entry(room_id).or_insert_with(|| {
            debug!(room = %room_id, "Opening room channel");
            RoomEntry::new(room_id, self.config.channel_capacity)
        });
        let receiver = entry.channel.subscribe(session.id.clone(), session.user_id);
        joined.insert(room_id);

        debug!(
            room = %room_id,
            session = %session.id,
            sessions = entry.channel.subscriber_count(),
            "Joined"
        );

        Ok(Some(RoomSubscription {
            room_id,
            session_id: session.id.clone(),
            receiver,
        }))
    }

    /// Remove a session from a room. Returns `false` if it was not joined.
    pub fn leave(&self, session_id: &str, room_id: RoomId) -> bool {
        let was_joined = self
            .sessions
            .get(session_id)
            .is_some_and(|rooms| rooms.remove(&room_id).is_some());
        if was_joined {
            self.detach(session_id, room_id);
        }
        was_joined
    }

    /// Remove a session from every room it joined.
    pub fn leave_all(&self, session_id: &str) {
        if let Some((_, rooms)) = self.sessions.remove(session_id) {
            for room_id in rooms.iter() {
                self.detach(session_id, *room_id);
            }
        }
        debug!(session = %session_id, "Left all rooms");
    }

    fn detach(&self, session_id: &str, room_id: RoomId) {
        let Some(mut entry) = self.rooms.get_mut(&room_id) else {
            return;
        };
        let Some(user_id) = entry.channel.unsubscribe(session_id) else {
            return;
        };

        // Other sessions must not keep showing the indicator of a user
        // whose last session just left.
        if !entry.channel.has_user(user_id) && entry.typing.clear(user_id) {
            let stopped = ServerEvent::UserTyping(TypingNotice {
                room_id,
                user_id,
                is_typing: false,
            });
            entry.channel.publish(Arc::new(stopped), None);
        }
        drop(entry);

        if self
            .rooms
            .remove_if(&room_id, |_, e| e.channel.is_empty())
            .is_some()
        {
            debug!(room = %room_id, "Closed empty room channel");
        }
    }

    /// Deliver an event to every session joined to the room.
    ///
    /// Returns the number of sessions it was handed to.
    pub fn broadcast(&self, room_id: RoomId, event: ServerEvent) -> usize {
        self.publish(room_id, event, None)
    }

    /// Deliver an event to every joined session except the originator.
    pub fn relay(&self, room_id: RoomId, event: ServerEvent, exclude: &str) -> usize {
        self.publish(room_id, event, Some(exclude.to_string()))
    }

    fn publish(&self, room_id: RoomId, event: ServerEvent, exclude: Option<SessionId>) -> usize {
        match self.rooms.get(&room_id) {
            Some(entry) => {
                let kind = event.kind();
                let count = entry.channel.publish(Arc::new(event), exclude);
                trace!(room = %room_id, event = %kind, recipients = count, "Fanned out");
                count
            }
            None => {
                trace!(room = %room_id, "No joined sessions");
                0
            }
        }
    }

    /// Record and relay a typing signal.
    ///
    /// Signals from sessions not joined to the room are dropped.
    pub fn typing(&self, session: &SessionHandle, room_id: RoomId, is_typing: bool) -> usize {
        let Some(mut entry) = self.rooms.get_mut(&room_id) else {
            debug!(room = %room_id, session = %session.id, "Typing for unjoined room dropped");
            return 0;
        };
        if !entry.channel.is_subscribed(&session.id) {
            debug!(room = %room_id, session = %session.id, "Typing for unjoined room dropped");
            return 0;
        }

        entry.typing.set(session.user_id, is_typing, now());
        let notice = ServerEvent::UserTyping(TypingNotice {
            room_id,
            user_id: session.user_id,
            is_typing,
        });
        entry.channel.publish(Arc::new(notice), Some(session.id.clone()))
    }

    /// Users with at least one session joined to the room.
    #[must_use]
    pub fn joined_users(&self, room_id: RoomId) -> HashSet<UserId> {
        self.rooms
            .get(&room_id)
            .map(|e| e.channel.users())
            .unwrap_or_default()
    }

    /// Check if a session is joined to a room.
    #[must_use]
    pub fn is_joined(&self, session_id: &str, room_id: RoomId) -> bool {
        self.sessions
            .get(session_id)
            .is_some_and(|rooms| rooms.contains(&room_id))
    }

    /// Rooms a session is joined to.
    #[must_use]
    pub fn session_rooms(&self, session_id: &str) -> Vec<RoomId> {
        self.sessions
            .get(session_id)
            .map(|rooms| rooms.iter().map(|r| *r).collect())
            .unwrap_or_default()
    }

    /// Whether a user is marked typing in a room.
    #[must_use]
    pub fn is_typing(&self, room_id: RoomId, user_id: UserId) -> bool {
        self.rooms
            .get(&room_id)
            .is_some_and(|e| e.typing.is_typing(user_id))
    }

    #[must_use]
    pub fn stats(&self) -> BroadcasterStats {
        BroadcasterStats {
            room_count: self.rooms.len(),
            session_count: self.sessions.len(),
            total_subscriptions: self.sessions.iter().map(|s| s.len()).sum(),
        }
    }
}

impl std::fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broadcaster")
            .field("stats", &self.stats())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Broadcaster statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcasterStats {
    /// Rooms with at least one joined session.
    pub room_count: usize,
    /// Sessions that joined at least once.
    pub session_count: usize,
    /// Total session/room pairs.
    pub total_subscriptions: usize,
}
