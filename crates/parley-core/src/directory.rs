//! Room Directory.
//!
//! Owns room membership and metadata. Every access check in the system
//! funnels through [`RoomDirectory::is_member`].

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{CoreError, CoreResult};
use crate::model::{now, Room, RoomId, RoomKind, User, UserId, DIRECT_ROOM_NAME};
use crate::store::{RoomStore, StoreError, UserStore};

/// Room creation request.
#[derive(Debug, Clone, Default)]
pub struct NewRoom {
    pub kind: Option<RoomKind>,
    pub member_ids: Vec<UserId>,
    pub member_emails: Vec<String>,
    pub name: Option<String>,
}

/// Result of a room creation.
#[derive(Debug, Clone)]
pub struct CreatedRoom {
    pub room: Room,
    /// `false` when an existing direct room was returned.
    pub created: bool,
}

/// Room membership and metadata service.
#[derive(Clone)]
pub struct RoomDirectory {
    rooms: Arc<dyn RoomStore>,
    users: Arc<dyn UserStore>,
}

impl RoomDirectory {
    /// Create a directory over the given stores.
    #[must_use]
    pub fn new(rooms: Arc<dyn RoomStore>, users: Arc<dyn UserStore>) -> Self {
        Self { rooms, users }
    }

    /// Rooms the user belongs to, most recent activity first.
    ///
    /// # Errors
    ///
    /// Fails only on storage errors.
    pub async fn list_rooms_for_user(&self, user_id: UserId) -> CoreResult<Vec<Room>> {
        Ok(self.rooms.rooms_for_member(user_id).await?)
    }

    /// Create a group room, or find or create the direct room of a pair.
    ///
    /// Emails that resolve to no user are dropped. The requester is always a
    /// member. A missing kind means direct.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a group without a name or a direct
    /// room whose member set does not have exactly two users.
    pub async fn create_room(&self, requester: UserId, request: NewRoom) -> CoreResult<CreatedRoom> {
        let kind = request.kind.unwrap_or(RoomKind::Direct);

        let mut members: BTreeSet<UserId> = request.member_ids.into_iter().collect();
        if !request.member_emails.is_empty() {
            members.extend(self.users.find_by_emails(&request.member_emails).await?);
        }
        members.insert(requester);

        match kind {
            RoomKind::Group => {
                let name = request.name.as_deref().map(str::trim).unwrap_or_default();
                if name.is_empty() {
                    return Err(CoreError::validation("group name is required"));
                }
                let room = Room::new(RoomKind::Group, name, members, now());
                self.rooms.insert_room(&room).await?;
                info!(room = %room.id, members = room.members.len(), "Group room created");
                Ok(CreatedRoom {
                    room,
                    created: true,
                })
            }
            RoomKind::Direct => {
                let pair: Vec<UserId> = members.into_iter().collect();
                let [a, b] = pair[..] else {
                    return Err(CoreError::validation(
                        "direct rooms need exactly two distinct members",
                    ));
                };
                self.find_or_create_direct(a, b).await
            }
        }
    }

    async fn find_or_create_direct(&self, a: UserId, b: UserId) -> CoreResult<CreatedRoom> {
        if let Some(room) = self.rooms.find_direct(a, b).await? {
            return Ok(CreatedRoom {
                room,
                created: false,
            });
        }

        let room = Room::new(RoomKind::Direct, DIRECT_ROOM_NAME, [a, b], now());
        match self.rooms.insert_room(&room).await {
            Ok(()) => {
                info!(room = %room.id, "Direct room created");
                Ok(CreatedRoom {
                    room,
                    created: true,
                })
            }
            Err(StoreError::Conflict(_)) => {
                debug!("Lost direct room creation race, re-reading");
                let room = self
                    .rooms
                    .find_direct(a, b)
                    .await?
                    .ok_or_else(|| CoreError::invalid_state("direct room vanished"))?;
                Ok(CreatedRoom {
                    room,
                    created: false,
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Check if a user belongs to a room. Unknown rooms have no members.
    ///
    /// # Errors
    ///
    /// Fails only on storage errors.
    pub async fn is_member(&self, room_id: RoomId, user_id: UserId) -> CoreResult<bool> {
        Ok(self.rooms.is_member(room_id, user_id).await?)
    }

    /// Record a message on the room.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the room does not exist.
    pub async fn touch_activity(&self, room_id: RoomId, at: DateTime<Utc>) -> CoreResult<()> {
        Ok(self.rooms.touch_room(room_id, at).await?)
    }

    /// Look up a room.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the room does not exist.
    pub async fn room(&self, room_id: RoomId) -> CoreResult<Room> {
        self.rooms
            .room(room_id)
            .await?
            .ok_or(CoreError::NotFound("room"))
    }

    /// Member records of a room.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the room does not exist.
    pub async fn members(&self, room_id: RoomId) -> CoreResult<Vec<User>> {
        let room = self.room(room_id).await?;
        Ok(self.users.users(&room.members).await?)
    }
}

impl std::fmt::Debug for RoomDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomDirectory").finish_non_exhaustive()
    }
}
