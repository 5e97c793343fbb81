//! Channel session lifecycle.
//!
//! `Connecting -> Authenticated -> Joined(rooms) -> Closed`. Leaving the last
//! room goes back to `Authenticated`; any state can close.

use parley_protocol::RoomId;
use std::collections::BTreeSet;

/// State of one channel session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Connecting,
    Authenticated,
    Joined(BTreeSet<RoomId>),
    Closed,
}

impl SessionState {
    /// Credential accepted. Only valid while connecting.
    pub fn authenticate(&mut self) -> bool {
        if *self != SessionState::Connecting {
            return false;
        }
        *self = SessionState::Authenticated;
        true
    }

    /// Record a joined room. Returns `false` if the state does not allow it
    /// or the room was already joined.
    pub fn join(&mut self, room_id: RoomId) -> bool {
        match self {
            SessionState::Authenticated => {
                *self = SessionState::Joined(BTreeSet::from([room_id]));
                true
            }
            SessionState::Joined(rooms) => rooms.insert(room_id),
            SessionState::Connecting | SessionState::Closed => false,
        }
    }

    /// Forget a joined room.
    pub fn leave(&mut self, room_id: RoomId) -> bool {
        let SessionState::Joined(rooms) = self else {
            return false;
        };
        let removed = rooms.remove(&room_id);
        if rooms.is_empty() {
            *self = SessionState::Authenticated;
        }
        removed
    }

    /// Close the session, returning the rooms it had joined.
    pub fn close(&mut self) -> BTreeSet<RoomId> {
        match std::mem::replace(self, SessionState::Closed) {
            SessionState::Joined(rooms) => rooms,
            _ => BTreeSet::new(),
        }
    }

    /// Whether intents from the client are processed.
    #[must_use]
    pub fn accepts_intents(&self) -> bool {
        matches!(self, SessionState::Authenticated | SessionState::Joined(_))
    }

    #[must_use]
    pub fn is_joined(&self, room_id: RoomId) -> bool {
        matches!(self, SessionState::Joined(rooms) if rooms.contains(&room_id))
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Connecting => "connecting",
            SessionState::Authenticated => "authenticated",
            SessionState::Joined(_) => "joined",
            SessionState::Closed => "closed",
        }
    }
}
