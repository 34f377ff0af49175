//! Persistence layer: the Room Store and the profile lookup.
//!
//! [`RoomStore`] is the durable side of room lifecycle: room rows,
//! membership rows, host succession and the one-shot deactivation used to
//! close a room. [`ProfileStore`] resolves the display identity of an
//! authenticated user. Both have a PostgreSQL implementation on
//! `sqlx::PgPool` ([`postgres::PostgresStore`]) and an in-memory one
//! ([`memory::MemoryStore`]) used by tests and when persistence is
//! disabled.

pub mod memory;
pub mod models;
pub mod postgres;

use std::fmt::Debug;

use async_trait::async_trait;

pub use memory::MemoryStore;
pub use models::{Room, RoomFilter, RoomMembership, UserProfile};
pub use postgres::PostgresStore;

use crate::domain::{RoomId, UserId};
use crate::error::HubError;

/// Durable storage for rooms and memberships.
#[async_trait]
pub trait RoomStore: Send + Sync + Debug {
    /// Fetches a room by id, active or not.
    async fn get_room(&self, room_id: RoomId) -> Result<Option<Room>, HubError>;

    /// Lists active rooms matching `filter`, newest first, together with
    /// the total number of matches.
    async fn list_active_rooms(
        &self,
        filter: &RoomFilter,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<Room>, i64), HubError>;

    /// Inserts a room together with its host membership, as one unit.
    async fn create_room(&self, room: &Room, host: &RoomMembership) -> Result<(), HubError>;

    /// Sets the persisted member count of an active room.
    ///
    /// Touches no other column and leaves inactive rooms alone, so a
    /// concurrent close or host transfer is never undone. Returns `false`
    /// if the room is missing or inactive.
    async fn set_member_count(&self, room_id: RoomId, count: i32) -> Result<bool, HubError>;

    /// Marks an active room inactive with zero members.
    ///
    /// Returns `true` only for the call that performed the transition, so
    /// concurrent closers can agree on who announces it.
    async fn deactivate_room(&self, room_id: RoomId) -> Result<bool, HubError>;

    /// Fetches one membership row.
    async fn get_membership(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<Option<RoomMembership>, HubError>;

    /// Inserts a membership. Returns `false` if the pair already existed.
    async fn create_membership(&self, membership: &RoomMembership) -> Result<bool, HubError>;

    /// Deletes a membership. Returns `false` if there was none.
    async fn delete_membership(&self, room_id: RoomId, user_id: UserId) -> Result<bool, HubError>;

    /// Number of membership rows of a room.
    async fn count_memberships(&self, room_id: RoomId) -> Result<i64, HubError>;

    /// All membership rows of a room, oldest first.
    async fn list_memberships(&self, room_id: RoomId) -> Result<Vec<RoomMembership>, HubError>;

    /// Clears every host flag in the room, sets it on `new_host` and makes
    /// `new_host` the room's owner of record, as one unit.
    async fn transfer_host(&self, room_id: RoomId, new_host: UserId) -> Result<(), HubError>;
}

/// Read access to user profiles.
#[async_trait]
pub trait ProfileStore: Send + Sync + Debug {
    /// Fetches a user's profile, or `None` if the user does not exist.
    async fn get_profile(&self, user_id: UserId) -> Result<Option<UserProfile>, HubError>;
}
