//! Typing board.
//!
//! Ephemeral, per-room typing state. Nothing here is persisted.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::trace;

use crate::model::UserId;

/// Typing state of one user in one room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypingState {
    pub is_typing: bool,
    pub updated_at: DateTime<Utc>,
}

/// Last-write-wins typing state per user.
#[derive(Debug, Default)]
pub struct TypingBoard {
    users: HashMap<UserId, TypingState>,
}

impl TypingBoard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a typing signal.
    ///
    /// Signals older than the stored one are ignored. Returns `true` if the
    /// signal was applied.
    pub fn set(&mut self, user_id: UserId, is_typing: bool, at: DateTime<Utc>) -> bool {
        match self.users.get_mut(&user_id) {
            Some(state) if state.updated_at > at => {
                trace!(user = %user_id, "Stale typing signal ignored");
                false
            }
            Some(state) => {
                state.is_typing = is_typing;
                state.updated_at = at;
                true
            }
            None => {
                self.users.insert(user_id, TypingState { is_typing, updated_at: at });
                true
            }
        }
    }

    #[must_use]
    pub fn is_typing(&self, user_id: UserId) -> bool {
        self.users.get(&user_id).is_some_and(|s| s.is_typing)
    }

    #[must_use]
    pub fn get(&self, user_id: UserId) -> Option<TypingState> {
        self.users.get(&user_id).copied()
    }

    /// Forget a user. Returns `true` if they were marked typing.
    pub fn clear(&mut self, user_id: UserId) -> bool {
        self.users.remove(&user_id).is_some_and(|s| s.is_typing)
    }

    /// Users currently typing.
    #[must_use]
    pub fn typing_users(&self) -> Vec<UserId> {
        self.users
            .iter()
            .filter(|(_, s)| s.is_typing)
            .map(|(id, _)| *id)
            .collect()
    }
}
