//! Durable records: rooms, memberships and user profiles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::domain::{Identity, RoomId, UserId};

/// A row of the `practice_rooms` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Room {
    /// Room identifier.
    pub id: RoomId,
    /// Current host (owner of record). Changes on host succession.
    pub owner_id: UserId,
    /// Display title.
    pub title: String,
    /// Topic, e.g. `"daily-conversation"`.
    pub theme: String,
    /// Room type, e.g. `"public"`.
    #[serde(rename = "type")]
    pub room_type: String,
    /// Optional long description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Capacity.
    pub max_members: i32,
    /// Persisted member count.
    pub current_members: i32,
    /// `false` once the room has been closed. Rooms are never deleted.
    pub is_active: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl Room {
    /// Builds a fresh, active room with its owner counted as the only member.
    #[must_use]
    pub fn new(
        owner_id: UserId,
        title: impl Into<String>,
        theme: impl Into<String>,
        room_type: impl Into<String>,
        max_members: i32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: RoomId::new(),
            owner_id,
            title: title.into(),
            theme: theme.into(),
            room_type: room_type.into(),
            description: None,
            max_members,
            current_members: 1,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns `true` when no further member fits.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.current_members >= self.max_members
    }
}

/// A row of the `practice_room_members` table. `(room_id, user_id)` is unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RoomMembership {
    /// Row identifier.
    pub id: Uuid,
    /// Room.
    pub room_id: RoomId,
    /// Member.
    pub user_id: UserId,
    /// Host flag. At most one member of an active room carries it.
    pub is_host: bool,
    /// When the membership was created.
    pub joined_at: DateTime<Utc>,
}

impl RoomMembership {
    /// Builds a new membership stamped with the current time.
    #[must_use]
    pub fn new(room_id: RoomId, user_id: UserId, is_host: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            room_id,
            user_id,
            is_host,
            joined_at: Utc::now(),
        }
    }
}

/// Public profile fields needed to identify a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// User.
    pub user_id: UserId,
    /// Display name.
    pub username: String,
    /// Avatar URL, if the user set one.
    pub avatar_url: Option<String>,
}

impl UserProfile {
    /// Converts into the identity attached to a connection.
    #[must_use]
    pub fn into_identity(self) -> Identity {
        Identity::new(self.user_id, self.username, self.avatar_url)
    }
}

/// Optional filters for listing active rooms.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomFilter {
    /// Exact theme match.
    pub theme: Option<String>,
    /// Exact type match.
    pub room_type: Option<String>,
}

impl RoomFilter {
    /// Returns `true` if `room` passes every set filter.
    #[must_use]
    pub fn matches(&self, room: &Room) -> bool {
        self.theme.as_ref().is_none_or(|t| *t == room.theme)
            && self.room_type.as_ref().is_none_or(|t| *t == room.room_type)
    }
}
