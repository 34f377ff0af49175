//! Host succession and room closure after a member departs.

use std::sync::Arc;

use serde_json::json;

use crate::domain::{Channel, ConnId, RoomId, UserId};
use crate::error::HubError;
use crate::hub::{BroadcastTarget, HubHandle};
use crate::persistence::RoomStore;
use crate::ws::messages::{Message, MessageKind};

/// What a departure reconciliation ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepartureOutcome {
    /// The departing host handed over to this user.
    HostTransferred(UserId),
    /// The room was deactivated by this call.
    RoomClosed,
    /// The room stays open with its host unchanged.
    RoomKept,
}

/// Aligns durable membership with live presence.
///
/// Every closure goes through [`RoomStore::deactivate_room`], whose
/// compare-and-set result decides which caller announces `room_deleted`.
/// The disconnect path and the periodic monitor may therefore race
/// without double announcements.
#[derive(Debug)]
pub struct Reconciler {
    store: Arc<dyn RoomStore>,
    hub: HubHandle,
}

impl Reconciler {
    /// Creates a reconciler over the given store and hub.
    #[must_use]
    pub fn new(store: Arc<dyn RoomStore>, hub: HubHandle) -> Self {
        Self { store, hub }
    }

    /// The Room Store this reconciler writes to.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn RoomStore> {
        &self.store
    }

    /// The hub this reconciler announces through.
    #[must_use]
    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    /// Snapshots the room's on-mic set, then reconciles.
    ///
    /// Used by the REST leave route, where no connection is departing.
    ///
    /// # Errors
    ///
    /// See [`Reconciler::reconcile_departure`].
    pub async fn handle_departure(
        &self,
        room_id: RoomId,
        user_id: UserId,
        departing: Option<ConnId>,
    ) -> Result<DepartureOutcome, HubError> {
        let on_mic = self.hub.on_mic_users(room_id).await;
        self.reconcile_departure(room_id, user_id, &on_mic, departing)
            .await
    }

    /// Removes `user_id` from the room and decides host succession and
    /// closure.
    ///
    /// `on_mic` must be captured before the departing connection is
    /// unregistered. `departing` is left out of the live count even if the
    /// hub has not processed its unregistration yet.
    ///
    /// Storage failures while removing the membership are logged and do
    /// not stop the rest of the reconciliation.
    ///
    /// # Errors
    ///
    /// Returns a [`HubError`] if a store call needed for a decision fails.
    pub async fn reconcile_departure(
        &self,
        room_id: RoomId,
        user_id: UserId,
        on_mic: &[UserId],
        departing: Option<ConnId>,
    ) -> Result<DepartureOutcome, HubError> {
        let was_host = match self.store.get_membership(room_id, user_id).await {
            Ok(membership) => membership.is_some_and(|m| m.is_host),
            Err(e) => {
                tracing::error!(%room_id, %user_id, error = %e, "membership lookup failed");
                false
            }
        };

        if let Err(e) = self.remove_member(room_id, user_id).await {
            tracing::error!(%room_id, %user_id, error = %e, "failed to remove membership");
        }

        if !was_host {
            return Ok(if self.close_if_empty(room_id, departing).await? {
                DepartureOutcome::RoomClosed
            } else {
                DepartureOutcome::RoomKept
            });
        }

        for &candidate in on_mic.iter().filter(|&&u| u != user_id) {
            if self.store.get_membership(room_id, candidate).await?.is_some() {
                self.promote(room_id, candidate).await?;
                return Ok(DepartureOutcome::HostTransferred(candidate));
            }
        }

        if self.close_if_empty(room_id, departing).await? {
            return Ok(DepartureOutcome::RoomClosed);
        }

        // Nobody on-mic but members remain: the longest-standing one inherits.
        let members = self.store.list_memberships(room_id).await?;
        match members.into_iter().find(|m| m.user_id != user_id) {
            Some(successor) => {
                self.promote(room_id, successor.user_id).await?;
                Ok(DepartureOutcome::HostTransferred(successor.user_id))
            }
            None => Ok(DepartureOutcome::RoomKept),
        }
    }

    /// Deactivates the room if it has neither live connections (other than
    /// `departing`) nor persisted members. Returns `true` if this call
    /// closed it, in which case `room_deleted` went out to everyone.
    ///
    /// The persisted count is always read after the live count.
    ///
    /// # Errors
    ///
    /// Returns a [`HubError`] if a store call fails.
    pub async fn close_if_empty(
        &self,
        room_id: RoomId,
        departing: Option<ConnId>,
    ) -> Result<bool, HubError> {
        let live = match departing {
            Some(conn_id) => self.hub.room_member_count_excluding(room_id, conn_id).await,
            None => self.hub.room_member_count(room_id).await,
        };
        if live > 0 {
            return Ok(false);
        }

        let persisted = self.store.count_memberships(room_id).await?;
        tracing::debug!(%room_id, live, persisted, "closure check");
        if persisted > 0 {
            return Ok(false);
        }

        if !self.store.deactivate_room(room_id).await? {
            return Ok(false);
        }

        tracing::info!(%room_id, "room closed");
        let notice = Message::new(MessageKind::RoomDeleted)
            .in_channel(Channel::Room(room_id))
            .with_data(json!({ "room_id": room_id.to_string() }))
            .stamped();
        self.hub.broadcast(BroadcastTarget::Everyone, notice).await?;
        Ok(true)
    }

    async fn remove_member(&self, room_id: RoomId, user_id: UserId) -> Result<(), HubError> {
        self.store.delete_membership(room_id, user_id).await?;

        let count = self.store.count_memberships(room_id).await?;
        self.store
            .set_member_count(room_id, i32::try_from(count).unwrap_or(i32::MAX))
            .await?;
        Ok(())
    }

    async fn promote(&self, room_id: RoomId, new_host: UserId) -> Result<(), HubError> {
        self.store.transfer_host(room_id, new_host).await?;
        tracing::info!(%room_id, %new_host, "host transferred");

        let notice = Message::new(MessageKind::RoomUpdate)
            .in_channel(Channel::Room(room_id))
            .with_data(json!({ "new_host_id": new_host.to_string() }))
            .stamped();
        self.hub
            .broadcast(BroadcastTarget::Room(room_id), notice)
            .await
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::config::HubConfig;
    use crate::domain::Identity;
    use crate::hub::{ClientHandle, Hub, OutboundReceiver};
    use crate::persistence::{MemoryStore, Room, RoomFilter, RoomMembership};

    struct Fixture {
        store: Arc<MemoryStore>,
        reconciler: Reconciler,
        room: Room,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let hub = Hub::spawn(&HubConfig::default());
        let room = Room::new(UserId::new(), "Evening chat", "daily", "public", 7);
        let host = RoomMembership::new(room.id, room.owner_id, true);
        let Ok(()) = store.create_room(&room, &host).await else {
            panic!("create failed");
        };
        let dyn_store: Arc<dyn RoomStore> = Arc::clone(&store) as Arc<dyn RoomStore>;
        Fixture {
            reconciler: Reconciler::new(dyn_store, hub),
            store,
            room,
        }
    }

    async fn connect(hub: &HubHandle, room_id: RoomId, user_id: UserId) -> (Arc<ClientHandle>, OutboundReceiver) {
        let (client, rx) = ClientHandle::new(
            Identity::new(user_id, "member", None),
            Channel::Room(room_id),
            32,
        );
        let client = Arc::new(client);
        let Ok(()) = hub.register(Arc::clone(&client)).await else {
            panic!("hub stopped");
        };
        (client, rx)
    }

    async fn drain_until(rx: &mut OutboundReceiver, kind: MessageKind) -> Message {
        loop {
            let Some(msg) = rx.recv().await else {
                panic!("queue closed before {kind}");
            };
            if msg.kind == kind {
                return msg;
            }
        }
    }

    #[tokio::test]
    async fn host_hands_over_to_on_mic_member() {
        let f = fixture().await;
        let hub = f.reconciler.hub().clone();
        let host = f.room.owner_id;
        let (b, c) = (UserId::new(), UserId::new());
        for user in [b, c] {
            let _ = f
                .store
                .create_membership(&RoomMembership::new(f.room.id, user, false))
                .await;
        }

        let (host_conn, _host_rx) = connect(&hub, f.room.id, host).await;
        let (_b_conn, mut b_rx) = connect(&hub, f.room.id, b).await;
        let (_c_conn, _c_rx) = connect(&hub, f.room.id, c).await;
        let _ = hub.set_on_mic(f.room.id, b, true).await;

        let on_mic = hub.on_mic_users(f.room.id).await;
        let _ = hub.unregister(Arc::clone(&host_conn)).await;
        let outcome = f
            .reconciler
            .reconcile_departure(f.room.id, host, &on_mic, Some(host_conn.conn_id()))
            .await;

        assert!(matches!(outcome, Ok(DepartureOutcome::HostTransferred(u)) if u == b));
        let update = drain_until(&mut b_rx, MessageKind::RoomUpdate).await;
        assert_eq!(update.data_str("new_host_id"), Some(b.to_string().as_str()));

        let Ok(Some(room)) = f.store.get_room(f.room.id).await else {
            panic!("room missing");
        };
        assert!(room.is_active);
        assert_eq!(room.owner_id, b);
        assert_eq!(room.current_members, 2);
    }

    #[tokio::test]
    async fn lone_host_departure_closes_room_once() {
        let f = fixture().await;
        let hub = f.reconciler.hub().clone();
        let host = f.room.owner_id;

        let (watcher, mut watcher_rx) = ClientHandle::new(
            Identity::new(UserId::new(), "lobby", None),
            Channel::Global,
            32,
        );
        let _ = hub.register(Arc::new(watcher)).await;
        let (host_conn, _host_rx) = connect(&hub, f.room.id, host).await;

        let outcome = f
            .reconciler
            .reconcile_departure(f.room.id, host, &[], Some(host_conn.conn_id()))
            .await;
        assert!(matches!(outcome, Ok(DepartureOutcome::RoomClosed)));

        // A second closer (the monitor) loses the race and stays silent.
        assert!(matches!(f.reconciler.close_if_empty(f.room.id, None).await, Ok(false)));

        let deleted = drain_until(&mut watcher_rx, MessageKind::RoomDeleted).await;
        assert_eq!(deleted.data_str("room_id"), Some(f.room.id.to_string().as_str()));
        assert!(watcher_rx.try_recv().is_none());

        let Ok(Some(room)) = f.store.get_room(f.room.id).await else {
            panic!("room missing");
        };
        assert!(!room.is_active);
        assert_eq!(room.current_members, 0);
    }

    #[tokio::test]
    async fn live_connection_keeps_room_open() {
        let f = fixture().await;
        let hub = f.reconciler.hub().clone();
        let member = UserId::new();
        let _ = f
            .store
            .create_membership(&RoomMembership::new(f.room.id, member, false))
            .await;
        let (_member_conn, _rx) = connect(&hub, f.room.id, member).await;

        let outcome = f
            .reconciler
            .reconcile_departure(f.room.id, member, &[], None)
            .await;
        assert!(matches!(outcome, Ok(DepartureOutcome::RoomKept)));
        let Ok(Some(room)) = f.store.get_room(f.room.id).await else {
            panic!("room missing");
        };
        assert!(room.is_active);
        assert_eq!(room.current_members, 1);
    }

    /// Store that lets a competing closer deactivate the room right after
    /// the first member count is read.
    #[derive(Debug)]
    struct ClosingStore {
        inner: MemoryStore,
        armed: AtomicBool,
        deactivations: AtomicUsize,
    }

    impl ClosingStore {
        fn new(inner: MemoryStore) -> Self {
            Self {
                inner,
                armed: AtomicBool::new(true),
                deactivations: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl RoomStore for ClosingStore {
        async fn get_room(&self, room_id: RoomId) -> Result<Option<Room>, HubError> {
            self.inner.get_room(room_id).await
        }

        async fn list_active_rooms(
            &self,
            filter: &RoomFilter,
            offset: i64,
            limit: i64,
        ) -> Result<(Vec<Room>, i64), HubError> {
            self.inner.list_active_rooms(filter, offset, limit).await
        }

        async fn create_room(&self, room: &Room, host: &RoomMembership) -> Result<(), HubError> {
            self.inner.create_room(room, host).await
        }

        async fn set_member_count(&self, room_id: RoomId, count: i32) -> Result<bool, HubError> {
            self.inner.set_member_count(room_id, count).await
        }

        async fn deactivate_room(&self, room_id: RoomId) -> Result<bool, HubError> {
            let closed = self.inner.deactivate_room(room_id).await?;
            if closed {
                self.deactivations.fetch_add(1, Ordering::SeqCst);
            }
            Ok(closed)
        }

        async fn get_membership(
            &self,
            room_id: RoomId,
            user_id: UserId,
        ) -> Result<Option<RoomMembership>, HubError> {
            self.inner.get_membership(room_id, user_id).await
        }

        async fn create_membership(&self, membership: &RoomMembership) -> Result<bool, HubError> {
            self.inner.create_membership(membership).await
        }

        async fn delete_membership(&self, room_id: RoomId, user_id: UserId) -> Result<bool, HubError> {
            self.inner.delete_membership(room_id, user_id).await
        }

        async fn count_memberships(&self, room_id: RoomId) -> Result<i64, HubError> {
            let count = self.inner.count_memberships(room_id).await?;
            if self.armed.swap(false, Ordering::SeqCst) {
                let _ = self.deactivate_room(room_id).await?;
            }
            Ok(count)
        }

        async fn list_memberships(&self, room_id: RoomId) -> Result<Vec<RoomMembership>, HubError> {
            self.inner.list_memberships(room_id).await
        }

        async fn transfer_host(&self, room_id: RoomId, new_host: UserId) -> Result<(), HubError> {
            self.inner.transfer_host(room_id, new_host).await
        }
    }

    #[tokio::test]
    async fn concurrent_close_is_not_undone_by_count_refresh() {
        let inner = MemoryStore::new();
        let room = Room::new(UserId::new(), "Evening chat", "daily", "public", 7);
        let Ok(()) = inner
            .create_room(&room, &RoomMembership::new(room.id, room.owner_id, true))
            .await
        else {
            panic!("create failed");
        };
        let store = Arc::new(ClosingStore::new(inner));
        let hub = Hub::spawn(&HubConfig::default());
        let (watcher, mut watcher_rx) = ClientHandle::new(
            Identity::new(UserId::new(), "lobby", None),
            Channel::Global,
            32,
        );
        let _ = hub.register(Arc::new(watcher)).await;
        let reconciler = Reconciler::new(Arc::clone(&store) as Arc<dyn RoomStore>, hub.clone());

        let outcome = reconciler
            .reconcile_departure(room.id, room.owner_id, &[], None)
            .await;

        assert!(matches!(outcome, Ok(DepartureOutcome::RoomKept)));
        assert_eq!(store.deactivations.load(Ordering::SeqCst), 1);
        let Ok(Some(stored)) = store.get_room(room.id).await else {
            panic!("room missing");
        };
        assert!(!stored.is_active);
        assert_eq!(stored.current_members, 0);

        // Nothing was announced by the reconciler; the competing closer owns it.
        let _ = hub.stats().await;
        assert!(watcher_rx.try_recv().is_none());
    }

    #[tokio::test]
    async fn last_non_host_departure_closes_room() {
        let f = fixture().await;
        let hub = f.reconciler.hub().clone();
        let member = UserId::new();
        let _ = f
            .store
            .create_membership(&RoomMembership::new(f.room.id, member, false))
            .await;
        let _ = f.store.delete_membership(f.room.id, f.room.owner_id).await;

        let (watcher, mut watcher_rx) = ClientHandle::new(
            Identity::new(UserId::new(), "lobby", None),
            Channel::Global,
            32,
        );
        let _ = hub.register(Arc::new(watcher)).await;

        let outcome = f
            .reconciler
            .reconcile_departure(f.room.id, member, &[], None)
            .await;
        assert!(matches!(outcome, Ok(DepartureOutcome::RoomClosed)));

        let Ok(Some(room)) = f.store.get_room(f.room.id).await else {
            panic!("room missing");
        };
        assert!(!room.is_active);
        assert_eq!(room.current_members, 0);

        let deleted = drain_until(&mut watcher_rx, MessageKind::RoomDeleted).await;
        assert_eq!(deleted.data_str("room_id"), Some(f.room.id.to_string().as_str()));
        let _ = hub.stats().await;
        assert!(watcher_rx.try_recv().is_none());
    }

    #[tokio::test]
    async fn host_without_on_mic_successor_hands_to_oldest_member() {
        let f = fixture().await;
        let member = UserId::new();
        let _ = f
            .store
            .create_membership(&RoomMembership::new(f.room.id, member, false))
            .await;

        let outcome = f
            .reconciler
            .reconcile_departure(f.room.id, f.room.owner_id, &[], None)
            .await;
        assert!(matches!(outcome, Ok(DepartureOutcome::HostTransferred(u)) if u == member));
    }
}
