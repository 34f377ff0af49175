//! Room service: creates, lists and joins rooms, and hands departures to
//! the lifecycle reconciler.

use std::sync::Arc;

use crate::domain::{Channel, RoomId, UserId};
use crate::error::HubError;
use crate::hub::{BroadcastTarget, HubHandle};
use crate::lifecycle::{DepartureOutcome, Reconciler, RoomMonitors};
use crate::persistence::{Room, RoomFilter, RoomMembership, RoomStore};
use crate::ws::messages::{Message, MessageKind};

/// Fields a caller supplies when opening a room.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewRoom {
    /// Display title.
    pub title: String,
    /// Topic.
    pub theme: String,
    /// Room type.
    pub room_type: String,
    /// Optional long description.
    pub description: Option<String>,
    /// Capacity; the configured default when `None`.
    pub max_members: Option<i32>,
}

/// A room together with its membership rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomDetails {
    /// Room row.
    pub room: Room,
    /// Membership rows, oldest first.
    pub members: Vec<RoomMembership>,
}

/// Orchestration layer for room operations.
///
/// Owns no state of its own: durable data lives in the [`RoomStore`], live
/// presence in the hub, and departures are delegated to the
/// [`Reconciler`].
#[derive(Debug, Clone)]
pub struct RoomService {
    store: Arc<dyn RoomStore>,
    hub: HubHandle,
    reconciler: Arc<Reconciler>,
    monitors: Arc<RoomMonitors>,
    default_max_members: i32,
}

impl RoomService {
    /// Creates a new `RoomService`.
    #[must_use]
    pub fn new(
        reconciler: Arc<Reconciler>,
        monitors: Arc<RoomMonitors>,
        default_max_members: i32,
    ) -> Self {
        Self {
            store: Arc::clone(reconciler.store()),
            hub: reconciler.hub().clone(),
            reconciler,
            monitors,
            default_max_members,
        }
    }

    /// Returns the hub this service announces through.
    #[must_use]
    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    /// Returns the per-room monitor registry.
    #[must_use]
    pub fn monitors(&self) -> &Arc<RoomMonitors> {
        &self.monitors
    }

    /// Opens a room owned by `owner`, who becomes its host and only member.
    ///
    /// Global connections are told with `room_created`, and the room's
    /// monitor is started.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::InvalidRequest`] for blank fields or a
    /// non-positive capacity, or a persistence error.
    pub async fn create_room(&self, owner: UserId, new: NewRoom) -> Result<Room, HubError> {
        for (field, value) in [
            ("title", &new.title),
            ("theme", &new.theme),
            ("type", &new.room_type),
        ] {
            if value.trim().is_empty() {
                return Err(HubError::InvalidRequest(format!("{field} must not be empty")));
            }
        }
        let max_members = new.max_members.unwrap_or(self.default_max_members);
        if max_members < 1 {
            return Err(HubError::InvalidRequest(
                "max_members must be at least 1".to_string(),
            ));
        }

        let mut room = Room::new(owner, new.title, new.theme, new.room_type, max_members);
        room.description = new.description.filter(|d| !d.trim().is_empty());
        let host = RoomMembership::new(room.id, owner, true);
        self.store.create_room(&room, &host).await?;
        tracing::info!(room_id = %room.id, owner_id = %owner, "room created");

        let data =
            serde_json::to_value(&room).map_err(|e| HubError::Internal(e.to_string()))?;
        let notice = Message::new(MessageKind::RoomCreated)
            .in_channel(Channel::Global)
            .with_data(data)
            .stamped();
        if let Err(e) = self.hub.broadcast(BroadcastTarget::Global, notice).await {
            tracing::warn!(room_id = %room.id, error = %e, "room_created not announced");
        }

        self.monitors.ensure(room.id);
        Ok(room)
    }

    /// Lists active rooms, newest first. `page` is 1-based.
    ///
    /// # Errors
    ///
    /// Returns a persistence error.
    pub async fn list_rooms(
        &self,
        filter: &RoomFilter,
        page: u32,
        per_page: u32,
    ) -> Result<(Vec<Room>, i64), HubError> {
        let offset = i64::from(page.max(1) - 1) * i64::from(per_page);
        self.store
            .list_active_rooms(filter, offset, i64::from(per_page))
            .await
    }

    /// Fetches a room and its members.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::RoomNotFound`] or a persistence error.
    pub async fn get_room(&self, room_id: RoomId) -> Result<RoomDetails, HubError> {
        let room = self
            .store
            .get_room(room_id)
            .await?
            .ok_or(HubError::RoomNotFound(room_id))?;
        let members = self.store.list_memberships(room_id).await?;
        Ok(RoomDetails { room, members })
    }

    /// Adds `user_id` to the room.
    ///
    /// Joining a room one already belongs to succeeds without changes, except
    /// that the owner of record regains the host flag if it was lost.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::RoomNotFound`], [`HubError::RoomInactive`],
    /// [`HubError::RoomFull`] or a persistence error.
    pub async fn join_room(&self, room_id: RoomId, user_id: UserId) -> Result<Room, HubError> {
        let mut room = self
            .store
            .get_room(room_id)
            .await?
            .ok_or(HubError::RoomNotFound(room_id))?;
        if !room.is_active {
            return Err(HubError::RoomInactive(room_id));
        }

        if let Some(existing) = self.store.get_membership(room_id, user_id).await? {
            if room.owner_id == user_id && !existing.is_host {
                self.store.transfer_host(room_id, user_id).await?;
            }
            return Ok(room);
        }

        if room.is_full() {
            return Err(HubError::RoomFull(room_id));
        }

        let membership = RoomMembership::new(room_id, user_id, room.owner_id == user_id);
        if self.store.create_membership(&membership).await? {
            let count = self.store.count_memberships(room_id).await?;
            room.current_members = i32::try_from(count).unwrap_or(i32::MAX);
            if !self
                .store
                .set_member_count(room_id, room.current_members)
                .await?
            {
                // Closed while joining: the row must not keep a dead room alive.
                self.store.delete_membership(room_id, user_id).await?;
                return Err(HubError::RoomInactive(room_id));
            }
            tracing::info!(%room_id, %user_id, members = room.current_members, "member joined");
        }
        Ok(room)
    }

    /// Makes sure a connecting user holds a membership in the room,
    /// creating one if needed.
    ///
    /// # Errors
    ///
    /// Same as [`RoomService::join_room`].
    pub async fn ensure_membership(&self, room_id: RoomId, user_id: UserId) -> Result<Room, HubError> {
        let room = self.join_room(room_id, user_id).await?;
        self.monitors.ensure(room_id);
        Ok(room)
    }

    /// Removes `user_id` from the room and runs departure reconciliation.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::RoomNotFound`], [`HubError::MembershipNotFound`]
    /// or a persistence error.
    pub async fn leave_room(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<DepartureOutcome, HubError> {
        if self.store.get_room(room_id).await?.is_none() {
            return Err(HubError::RoomNotFound(room_id));
        }
        if self.store.get_membership(room_id, user_id).await?.is_none() {
            return Err(HubError::MembershipNotFound { room_id, user_id });
        }
        let outcome = self
            .reconciler
            .handle_departure(room_id, user_id, None)
            .await?;
        tracing::info!(%room_id, %user_id, ?outcome, "member left");
        Ok(outcome)
    }
}
