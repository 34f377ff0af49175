//! The hub: single serialized coordinator for all live room state.
//!
//! [`Hub::run`] is the only writer of [`HubState`]. Everything else talks
//! to it through a cloneable [`HubHandle`], either by submitting a
//! [`HubEvent`] (processed strictly in arrival order) or through read-only
//! accessors that take the shared lock just long enough to copy a value out.

pub mod client;
pub mod matchmaking;
pub mod outbound;
pub mod state;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{RwLock, mpsc};

pub use client::ClientHandle;
pub use outbound::{DeliveryError, OutboundReceiver, OutboundSender};
pub use state::{BroadcastTarget, HubState};

use crate::config::HubConfig;
use crate::domain::{ConnId, RoomId, UserId};
use crate::error::HubError;
use crate::ws::messages::Message;

/// Work submitted to the hub event loop.
#[derive(Debug)]
pub enum HubEvent {
    /// A connection finished its upgrade and authentication.
    Register(Arc<ClientHandle>),
    /// A connection's read side terminated.
    Unregister(Arc<ClientHandle>),
    /// Fan a message out to a set of connections.
    Broadcast {
        /// Recipients.
        target: BroadcastTarget,
        /// Payload.
        message: Message,
        /// Connection to skip, usually the sender.
        exclude: Option<ConnId>,
    },
    /// Deliver a message to one user, resolved relative to the sender.
    Direct {
        /// Originating connection.
        sender: Arc<ClientHandle>,
        /// Recipient user.
        target: UserId,
        /// Payload.
        message: Message,
    },
    /// Flag or clear a user as on-mic in a room.
    SetOnMic {
        /// Room.
        room_id: RoomId,
        /// User.
        user_id: UserId,
        /// `true` for `mic_on`.
        on: bool,
    },
    /// `1v1_match_request` from a connection.
    MatchRequest(Arc<ClientHandle>),
    /// `1v1_match_cancel` from a connection.
    MatchCancel(Arc<ClientHandle>),
}

/// Point-in-time counters for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubStats {
    /// Rooms with at least one live connection.
    pub live_rooms: usize,
    /// Users with a live global connection.
    pub global_users: usize,
    /// Users waiting for a 1v1 partner.
    pub waiting_for_match: usize,
}

/// The hub actor. Create with [`Hub::new`], then drive with [`Hub::run`].
#[derive(Debug)]
pub struct Hub {
    state: Arc<RwLock<HubState>>,
    events: mpsc::Receiver<HubEvent>,
    match_timeout: Duration,
    match_sweep_interval: Duration,
}

/// Cloneable entry point to a running [`Hub`].
#[derive(Debug, Clone)]
pub struct HubHandle {
    events: mpsc::Sender<HubEvent>,
    state: Arc<RwLock<HubState>>,
}

impl Hub {
    /// Creates a hub and the handle used to reach it.
    #[must_use]
    pub fn new(config: &HubConfig) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::channel(config.hub_event_capacity.max(1));
        let state = Arc::new(RwLock::new(HubState::new()));
        let hub = Self {
            state: Arc::clone(&state),
            events: rx,
            match_timeout: config.match_timeout,
            match_sweep_interval: config.match_sweep_interval,
        };
        (hub, HubHandle { events: tx, state })
    }

    /// Creates a hub and spawns its event loop on the current runtime.
    #[must_use]
    pub fn spawn(config: &HubConfig) -> HubHandle {
        let (hub, handle) = Self::new(config);
        tokio::spawn(hub.run());
        handle
    }

    /// Processes events one at a time until every [`HubHandle`] is dropped.
    ///
    /// Between events a timer expires stale matchmaking entries. A fault in
    /// one event only ever affects the connections that event names.
    pub async fn run(mut self) {
        let mut sweep = tokio::time::interval(self.match_sweep_interval);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!("hub event loop started");

        loop {
            tokio::select! {
                event = self.events.recv() => {
                    let Some(event) = event else { break };
                    self.handle(event).await;
                }
                _ = sweep.tick() => {
                    let expired = self
                        .state
                        .write()
                        .await
                        .expire_matches(Instant::now(), self.match_timeout);
                    if expired > 0 {
                        tracing::info!(expired, "matchmaking requests timed out");
                    }
                }
            }
        }

        tracing::info!("hub event loop stopped");
    }

    async fn handle(&self, event: HubEvent) {
        let mut state = self.state.write().await;
        match event {
            HubEvent::Register(client) => state.register(client),
            HubEvent::Unregister(client) => state.unregister(&client),
            HubEvent::Broadcast {
                target,
                message,
                exclude,
            } => {
                let delivered = state.broadcast(target, &message, exclude);
                tracing::debug!(?target, kind = %message.kind, delivered, "broadcast");
            }
            HubEvent::Direct {
                sender,
                target,
                message,
            } => {
                state.deliver_direct(&sender, target, message);
            }
            HubEvent::SetOnMic {
                room_id,
                user_id,
                on,
            } => {
                state.set_on_mic(room_id, user_id, on);
            }
            HubEvent::MatchRequest(client) => {
                state.request_match(&client, Instant::now());
            }
            HubEvent::MatchCancel(client) => {
                if state.cancel_match(&client) {
                    tracing::debug!(user_id = %client.user_id(), "matchmaking request cancelled");
                }
            }
        }
    }
}

impl HubHandle {
    /// Submits an event, waiting for channel capacity if necessary.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::HubUnavailable`] if the event loop has stopped.
    pub async fn submit(&self, event: HubEvent) -> Result<(), HubError> {
        self.events
            .send(event)
            .await
            .map_err(|_| HubError::HubUnavailable)
    }

    /// Registers a freshly authenticated connection.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::HubUnavailable`] if the event loop has stopped.
    pub async fn register(&self, client: Arc<ClientHandle>) -> Result<(), HubError> {
        self.submit(HubEvent::Register(client)).await
    }

    /// Tells the hub a connection has gone away.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::HubUnavailable`] if the event loop has stopped.
    pub async fn unregister(&self, client: Arc<ClientHandle>) -> Result<(), HubError> {
        self.submit(HubEvent::Unregister(client)).await
    }

    /// Fire-and-forget broadcast, e.g. `room_created` from a REST call.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::HubUnavailable`] if the event loop has stopped.
    pub async fn broadcast(&self, target: BroadcastTarget, message: Message) -> Result<(), HubError> {
        self.broadcast_excluding(target, message, None).await
    }

    /// Broadcast that skips one connection.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::HubUnavailable`] if the event loop has stopped.
    pub async fn broadcast_excluding(
        &self,
        target: BroadcastTarget,
        message: Message,
        exclude: Option<ConnId>,
    ) -> Result<(), HubError> {
        self.submit(HubEvent::Broadcast {
            target,
            message,
            exclude,
        })
        .await
    }

    /// Point-to-point delivery to `target`, resolved relative to `sender`.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::HubUnavailable`] if the event loop has stopped.
    pub async fn send_direct(
        &self,
        sender: Arc<ClientHandle>,
        target: UserId,
        message: Message,
    ) -> Result<(), HubError> {
        self.submit(HubEvent::Direct {
            sender,
            target,
            message,
        })
        .await
    }

    /// Flags or clears a user as on-mic.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::HubUnavailable`] if the event loop has stopped.
    pub async fn set_on_mic(&self, room_id: RoomId, user_id: UserId, on: bool) -> Result<(), HubError> {
        self.submit(HubEvent::SetOnMic {
            room_id,
            user_id,
            on,
        })
        .await
    }

    /// Forwards a `1v1_match_request`.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::HubUnavailable`] if the event loop has stopped.
    pub async fn request_match(&self, client: Arc<ClientHandle>) -> Result<(), HubError> {
        self.submit(HubEvent::MatchRequest(client)).await
    }

    /// Forwards a `1v1_match_cancel`.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::HubUnavailable`] if the event loop has stopped.
    pub async fn cancel_match(&self, client: Arc<ClientHandle>) -> Result<(), HubError> {
        self.submit(HubEvent::MatchCancel(client)).await
    }

    /// Live connection count of a room.
    pub async fn room_member_count(&self, room_id: RoomId) -> usize {
        self.state.read().await.room_member_count(room_id)
    }

    /// Live connection count of a room, not counting `conn_id`.
    pub async fn room_member_count_excluding(&self, room_id: RoomId, conn_id: ConnId) -> usize {
        self.state
            .read()
            .await
            .room_member_count_excluding(room_id, conn_id)
    }

    /// On-mic users of a room, copied out in on-mic order.
    pub async fn on_mic_users(&self, room_id: RoomId) -> Vec<UserId> {
        self.state.read().await.on_mic_users(room_id)
    }

    /// Returns `true` if `conn_id` is `user_id`'s current global connection.
    pub async fn is_current_global(&self, user_id: UserId, conn_id: ConnId) -> bool {
        self.state.read().await.is_current_global(user_id, conn_id)
    }

    /// Point-in-time counters.
    pub async fn stats(&self) -> HubStats {
        let state = self.state.read().await;
        HubStats {
            live_rooms: state.live_room_count(),
            global_users: state.global_user_count(),
            waiting_for_match: state.waiting_count(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::{Channel, Identity};
    use crate::ws::messages::MessageKind;

    fn client(channel: Channel) -> (Arc<ClientHandle>, OutboundReceiver) {
        let identity = Identity::new(UserId::new(), "tester", None);
        let (handle, rx) = ClientHandle::new(identity, channel, 32);
        (Arc::new(handle), rx)
    }

    #[tokio::test]
    async fn events_are_applied_in_arrival_order() {
        let hub = Hub::spawn(&HubConfig::default());
        let room = RoomId::new();
        let (a, mut rx) = client(Channel::Room(room));

        let Ok(()) = hub.register(Arc::clone(&a)).await else {
            panic!("hub stopped");
        };
        let Ok(()) = hub.set_on_mic(room, a.user_id(), true).await else {
            panic!("hub stopped");
        };
        let Ok(()) = hub
            .broadcast(BroadcastTarget::Room(room), Message::new(MessageKind::Chat))
            .await
        else {
            panic!("hub stopped");
        };

        let Some(first) = rx.recv().await else {
            panic!("expected join notice");
        };
        assert_eq!(first.kind, MessageKind::MemberUpdate);
        let Some(second) = rx.recv().await else {
            panic!("expected chat");
        };
        assert_eq!(second.kind, MessageKind::Chat);

        assert_eq!(hub.room_member_count(room).await, 1);
        assert_eq!(hub.on_mic_users(room).await, vec![a.user_id()]);
    }

    #[tokio::test]
    async fn unregister_closes_the_queue() {
        let hub = Hub::spawn(&HubConfig::default());
        let (a, mut rx) = client(Channel::Global);
        let _ = hub.register(Arc::clone(&a)).await;
        let _ = hub.unregister(Arc::clone(&a)).await;

        assert!(rx.recv().await.is_none());
        assert_eq!(hub.stats().await.global_users, 0);
    }

    #[tokio::test]
    async fn stopped_hub_reports_unavailable() {
        let (hub, handle) = Hub::new(&HubConfig::default());
        drop(hub);
        let result = handle
            .broadcast(BroadcastTarget::Everyone, Message::new(MessageKind::RoomListUpdate))
            .await;
        assert!(matches!(result, Err(HubError::HubUnavailable)));
    }
}
