//! In-memory Room Store, used by tests and when persistence is disabled.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::models::{Room, RoomFilter, RoomMembership, UserProfile};
use super::{ProfileStore, RoomStore};
use crate::domain::{RoomId, UserId};
use crate::error::HubError;

#[derive(Debug, Default)]
struct Tables {
    rooms: HashMap<RoomId, Room>,
    members: Vec<RoomMembership>,
    profiles: HashMap<UserId, UserProfile>,
}

/// Room Store holding every table behind one mutex.
///
/// Each trait call takes the lock once, so multi-row operations such as
/// [`RoomStore::transfer_host`] are atomic just like their SQL
/// counterparts.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    guest_profiles: bool,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store whose profile lookups never miss.
    ///
    /// Unknown users get a generated `guest-xxxxxxxx` profile, so any
    /// valid token can connect when there is no user table to consult.
    #[must_use]
    pub fn with_guest_profiles() -> Self {
        Self {
            guest_profiles: true,
            ..Self::default()
        }
    }

    /// Inserts or replaces a user profile.
    pub async fn upsert_profile(&self, profile: UserProfile) {
        self.tables
            .lock()
            .await
            .profiles
            .insert(profile.user_id, profile);
    }
}

#[async_trait]
impl RoomStore for MemoryStore {
    async fn get_room(&self, room_id: RoomId) -> Result<Option<Room>, HubError> {
        Ok(self.tables.lock().await.rooms.get(&room_id).cloned())
    }

    async fn list_active_rooms(
        &self,
        filter: &RoomFilter,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<Room>, i64), HubError> {
        let tables = self.tables.lock().await;
        let mut rooms: Vec<Room> = tables
            .rooms
            .values()
            .filter(|r| r.is_active && filter.matches(r))
            .cloned()
            .collect();
        rooms.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = i64::try_from(rooms.len()).unwrap_or(i64::MAX);
        let page = rooms
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(0))
            .take(usize::try_from(limit).unwrap_or(0))
            .collect();
        Ok((page, total))
    }

    async fn create_room(&self, room: &Room, host: &RoomMembership) -> Result<(), HubError> {
        let mut tables = self.tables.lock().await;
        if tables.rooms.contains_key(&room.id) {
            return Err(HubError::PersistenceError(format!(
                "duplicate room id: {}",
                room.id
            )));
        }
        tables.rooms.insert(room.id, room.clone());
        tables.members.push(host.clone());
        Ok(())
    }

    async fn set_member_count(&self, room_id: RoomId, count: i32) -> Result<bool, HubError> {
        let mut tables = self.tables.lock().await;
        match tables.rooms.get_mut(&room_id) {
            Some(room) if room.is_active => {
                room.current_members = count;
                room.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn deactivate_room(&self, room_id: RoomId) -> Result<bool, HubError> {
        let mut tables = self.tables.lock().await;
        match tables.rooms.get_mut(&room_id) {
            Some(room) if room.is_active => {
                room.is_active = false;
                room.current_members = 0;
                room.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_membership(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<Option<RoomMembership>, HubError> {
        Ok(self
            .tables
            .lock()
            .await
            .members
            .iter()
            .find(|m| m.room_id == room_id && m.user_id == user_id)
            .cloned())
    }

    async fn create_membership(&self, membership: &RoomMembership) -> Result<bool, HubError> {
        let mut tables = self.tables.lock().await;
        let exists = tables
            .members
            .iter()
            .any(|m| m.room_id == membership.room_id && m.user_id == membership.user_id);
        if exists {
            return Ok(false);
        }
        tables.members.push(membership.clone());
        Ok(true)
    }

    async fn delete_membership(&self, room_id: RoomId, user_id: UserId) -> Result<bool, HubError> {
        let mut tables = self.tables.lock().await;
        let before = tables.members.len();
        tables
            .members
            .retain(|m| !(m.room_id == room_id && m.user_id == user_id));
        Ok(tables.members.len() < before)
    }

    async fn count_memberships(&self, room_id: RoomId) -> Result<i64, HubError> {
        let tables = self.tables.lock().await;
        let count = tables.members.iter().filter(|m| m.room_id == room_id).count();
        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }

    async fn list_memberships(&self, room_id: RoomId) -> Result<Vec<RoomMembership>, HubError> {
        let tables = self.tables.lock().await;
        let mut members: Vec<RoomMembership> = tables
            .members
            .iter()
            .filter(|m| m.room_id == room_id)
            .cloned()
            .collect();
        members.sort_by_key(|m| m.joined_at);
        Ok(members)
    }

    async fn transfer_host(&self, room_id: RoomId, new_host: UserId) -> Result<(), HubError> {
        let mut tables = self.tables.lock().await;
        for member in tables.members.iter_mut().filter(|m| m.room_id == room_id) {
            member.is_host = member.user_id == new_host;
        }
        if let Some(room) = tables.rooms.get_mut(&room_id) {
            room.owner_id = new_host;
            room.updated_at = Utc::now();
        }
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for MemoryStore {
    async fn get_profile(&self, user_id: UserId) -> Result<Option<UserProfile>, HubError> {
        let seeded = self.tables.lock().await.profiles.get(&user_id).cloned();
        if seeded.is_some() || !self.guest_profiles {
            return Ok(seeded);
        }
        let short: String = user_id.to_string().chars().take(8).collect();
        Ok(Some(UserProfile {
            user_id,
            username: format!("guest-{short}"),
            avatar_url: None,
        }))
    }
}
