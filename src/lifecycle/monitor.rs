//! Per-room safety-net monitor.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};

use super::reconciler::Reconciler;
use crate::domain::RoomId;

/// Runs at most one background monitor per room.
///
/// Each monitor periodically re-checks whether its room has neither live
/// connections nor persisted members and closes it if so, catching any
/// departure whose reconciliation failed or never ran. A monitor stops once
/// its room is inactive or gone.
#[derive(Debug)]
pub struct RoomMonitors {
    reconciler: Arc<Reconciler>,
    interval: Duration,
    running: Arc<Mutex<HashSet<RoomId>>>,
}

impl RoomMonitors {
    /// Creates a registry whose monitors tick every `interval`.
    #[must_use]
    pub fn new(reconciler: Arc<Reconciler>, interval: Duration) -> Self {
        Self {
            reconciler,
            interval,
            running: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Starts a monitor for `room_id` unless one is already running.
    /// Returns `true` if a new monitor was spawned.
    pub fn ensure(&self, room_id: RoomId) -> bool {
        let inserted = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(room_id);
        if !inserted {
            return false;
        }

        let reconciler = Arc::clone(&self.reconciler);
        let running = Arc::clone(&self.running);
        let period = self.interval;
        tokio::spawn(async move {
            watch(&reconciler, room_id, period).await;
            running
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&room_id);
        });
        tracing::debug!(%room_id, "room monitor started");
        true
    }

    /// Returns `true` if a monitor is running for `room_id`.
    #[must_use]
    pub fn is_running(&self, room_id: RoomId) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&room_id)
    }
}

async fn watch(reconciler: &Reconciler, room_id: RoomId, period: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        match reconciler.store().get_room(room_id).await {
            Ok(Some(room)) if room.is_active => {}
            Ok(_) => break,
            Err(e) => {
                tracing::warn!(%room_id, error = %e, "monitor could not load room");
                continue;
            }
        }

        match reconciler.close_if_empty(room_id, None).await {
            Ok(true) => {
                tracing::info!(%room_id, "monitor closed empty room");
                break;
            }
            Ok(false) => {}
            Err(e) => tracing::warn!(%room_id, error = %e, "monitor check failed"),
        }
    }

    tracing::debug!(%room_id, "room monitor stopped");
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::config::HubConfig;
    use crate::domain::UserId;
    use crate::hub::Hub;
    use crate::persistence::{MemoryStore, Room, RoomMembership, RoomStore};

    #[tokio::test]
    async fn monitor_closes_abandoned_room_and_stops() {
        let store = Arc::new(MemoryStore::new());
        let room = Room::new(UserId::new(), "Abandoned", "daily", "public", 7);
        let host = RoomMembership::new(room.id, room.owner_id, true);
        let Ok(()) = store.create_room(&room, &host).await else {
            panic!("create failed");
        };
        // The creator's membership vanished without a reconciliation.
        let _ = store.delete_membership(room.id, room.owner_id).await;

        let dyn_store: Arc<dyn RoomStore> = Arc::clone(&store) as Arc<dyn RoomStore>;
        let reconciler = Arc::new(Reconciler::new(dyn_store, Hub::spawn(&HubConfig::default())));
        let monitors = RoomMonitors::new(reconciler, Duration::from_millis(20));

        assert!(monitors.ensure(room.id));
        assert!(!monitors.ensure(room.id));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while monitors.is_running(room.id) {
            assert!(tokio::time::Instant::now() < deadline, "monitor never stopped");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let Ok(Some(stored)) = store.get_room(room.id).await else {
            panic!("room missing");
        };
        assert!(!stored.is_active);
    }

    #[tokio::test]
    async fn monitor_leaves_occupied_room_alone() {
        let store = Arc::new(MemoryStore::new());
        let room = Room::new(UserId::new(), "Busy", "daily", "public", 7);
        let host = RoomMembership::new(room.id, room.owner_id, true);
        let _ = store.create_room(&room, &host).await;

        let dyn_store: Arc<dyn RoomStore> = Arc::clone(&store) as Arc<dyn RoomStore>;
        let reconciler = Arc::new(Reconciler::new(dyn_store, Hub::spawn(&HubConfig::default())));
        let monitors = RoomMonitors::new(reconciler, Duration::from_millis(10));
        monitors.ensure(room.id);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(monitors.is_running(room.id));
        let Ok(Some(stored)) = store.get_room(room.id).await else {
            panic!("room missing");
        };
        assert!(stored.is_active);
    }
}
