//! Room lifecycle: what happens to durable state when people leave.
//!
//! - [`Reconciler`]: removes the departing membership, hands the host role
//!   to an on-mic member, and closes rooms that are empty both live and in
//!   the Room Store.
//! - [`RoomMonitors`]: periodic per-room backstop for failed or skipped
//!   reconciliations.
//! - [`DisconnectHandler`]: the hook a room connection runs exactly once
//!   when its read side terminates.

pub mod monitor;
pub mod reconciler;

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;

pub use monitor::RoomMonitors;
pub use reconciler::{DepartureOutcome, Reconciler};

use crate::domain::{ConnId, RoomId, UserId};

/// Hook invoked once when a connection goes away, before the hub is told.
#[async_trait]
pub trait DisconnectHandler: Send + Sync + Debug {
    /// Called with the id of the departing connection.
    async fn on_disconnect(&self, conn_id: ConnId);
}

/// Disconnect hook of a room connection: schedules departure
/// reconciliation for its (room, user) pair.
#[derive(Debug)]
pub struct RoomDepartureHandler {
    reconciler: Arc<Reconciler>,
    room_id: RoomId,
    user_id: UserId,
}

impl RoomDepartureHandler {
    /// Binds a handler to one room membership.
    #[must_use]
    pub fn new(reconciler: Arc<Reconciler>, room_id: RoomId, user_id: UserId) -> Self {
        Self {
            reconciler,
            room_id,
            user_id,
        }
    }
}

#[async_trait]
impl DisconnectHandler for RoomDepartureHandler {
    async fn on_disconnect(&self, conn_id: ConnId) {
        // The hub still lists this connection, so on-mic state is intact.
        let on_mic = self.reconciler.hub().on_mic_users(self.room_id).await;

        let reconciler = Arc::clone(&self.reconciler);
        let (room_id, user_id) = (self.room_id, self.user_id);
        tokio::spawn(async move {
            match reconciler
                .reconcile_departure(room_id, user_id, &on_mic, Some(conn_id))
                .await
            {
                Ok(outcome) => {
                    tracing::debug!(%room_id, %user_id, ?outcome, "departure reconciled");
                }
                Err(e) => {
                    tracing::error!(%room_id, %user_id, error = %e, "departure reconciliation failed");
                }
            }
        });
    }
}
