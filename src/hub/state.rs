//! Hub-owned ephemeral state: room member sets, the global index, on-mic
//! sets and the matchmaking queue.
//!
//! Every mutating method here is called from the hub event loop only, so
//! all mutations are linearized. Deliveries are non-blocking try-sends; a
//! recipient whose queue is full or closed is evicted on the spot and the
//! fan-out carries on with the remaining recipients.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;

use super::client::ClientHandle;
use super::matchmaking::MatchQueue;
use crate::domain::{Channel, ConnId, OnMicSet, RoomId, UserId};
use crate::ws::messages::{Message, MessageKind};

/// Who a broadcast is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastTarget {
    /// Every live connection in one room.
    Room(RoomId),
    /// Every room-less connection (room-list watchers, matchmaking).
    Global,
    /// Every live connection, room-bound or global.
    Everyone,
}

/// Ephemeral coordinator state. See the module docs for the ownership rule.
#[derive(Debug, Default)]
pub struct HubState {
    rooms: HashMap<RoomId, HashMap<ConnId, Arc<ClientHandle>>>,
    global: HashMap<ConnId, Arc<ClientHandle>>,
    global_by_user: HashMap<UserId, Arc<ClientHandle>>,
    on_mic: HashMap<RoomId, OnMicSet>,
    matches: MatchQueue,
}

impl HubState {
    /// Creates an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a connection to its channel.
    ///
    /// Room connections announce themselves to the whole room with a
    /// `member_update` (`action = "join"`). Global connections take over
    /// the user's slot in the global index; a superseded connection is
    /// unindexed but left open until its own socket fails.
    pub fn register(&mut self, client: Arc<ClientHandle>) {
        let conn_id = client.conn_id();
        let user_id = client.user_id();
        match client.channel() {
            Channel::Room(room_id) => {
                let members = self.rooms.entry(room_id).or_default();
                members.insert(conn_id, Arc::clone(&client));
                let member_count = members.len();
                tracing::debug!(%room_id, %user_id, %conn_id, member_count, "client registered in room");

                let notice = Message::new(MessageKind::MemberUpdate)
                    .in_channel(client.channel())
                    .from_identity(client.identity())
                    .with_data(json!({ "action": "join", "member_count": member_count }))
                    .stamped();
                self.broadcast(BroadcastTarget::Room(room_id), &notice, None);
            }
            Channel::Global => {
                if let Some(previous) = self.global_by_user.insert(user_id, Arc::clone(&client))
                    && previous.conn_id() != conn_id
                {
                    self.global.remove(&previous.conn_id());
                    tracing::debug!(
                        %user_id,
                        previous = %previous.conn_id(),
                        current = %conn_id,
                        "superseded global connection unindexed"
                    );
                }
                self.global.insert(conn_id, client);
                tracing::debug!(%user_id, %conn_id, online = self.global_by_user.len(), "global client registered");
            }
        }
    }

    /// Removes a connection that has gone away and closes its queue.
    ///
    /// A room left with no live members loses its ephemeral entry and its
    /// on-mic set; otherwise the remaining members get a `member_update`
    /// (`action = "leave"`). Persisted membership is reconciled separately
    /// by the connection's disconnect handler.
    pub fn unregister(&mut self, client: &Arc<ClientHandle>) {
        client.close();
        if let Some((room_id, remaining)) = self.detach(client) {
            self.announce_leave(client, room_id, remaining);
        }
    }

    /// Delivers `message` to every recipient of `target` except `exclude`.
    ///
    /// Never blocks. Recipients whose queue is full or closed are evicted
    /// after the fan-out. Returns the number of successful deliveries.
    pub fn broadcast(
        &mut self,
        target: BroadcastTarget,
        message: &Message,
        exclude: Option<ConnId>,
    ) -> usize {
        let recipients = self.recipients(target, exclude);
        let mut delivered = 0;
        let mut dead = Vec::new();
        for client in recipients {
            match client.try_deliver(message.clone()) {
                Ok(()) => delivered += 1,
                Err(err) => {
                    tracing::warn!(
                        user_id = %client.user_id(),
                        conn_id = %client.conn_id(),
                        kind = %message.kind,
                        error = %err,
                        "delivery failed, evicting connection"
                    );
                    dead.push(client);
                }
            }
        }
        for client in &dead {
            self.evict(client);
        }
        delivered
    }

    /// Delivers `message` to one user, resolved relative to the sender.
    ///
    /// Room senders reach a connection of `target` in the same room; global
    /// senders reach the target's current global connection. Returns
    /// `false` if the target is not reachable or the delivery failed.
    pub fn deliver_direct(&mut self, sender: &ClientHandle, target: UserId, message: Message) -> bool {
        let recipient = match sender.channel() {
            Channel::Room(room_id) => self.rooms.get(&room_id).and_then(|members| {
                members
                    .values()
                    .find(|c| c.user_id() == target && c.conn_id() != sender.conn_id())
                    .map(Arc::clone)
            }),
            Channel::Global => self.global_by_user.get(&target).map(Arc::clone),
        };
        let Some(recipient) = recipient else {
            tracing::debug!(
                from = %sender.user_id(),
                to = %target,
                kind = %message.kind,
                "direct delivery target not connected"
            );
            return false;
        };
        self.deliver_or_evict(&recipient, message)
    }

    /// Flags or clears `user_id` as on-mic in a live room. Ignored for
    /// rooms with no live entry.
    pub fn set_on_mic(&mut self, room_id: RoomId, user_id: UserId, on: bool) -> bool {
        if !self.rooms.contains_key(&room_id) {
            return false;
        }
        let set = self.on_mic.entry(room_id).or_default();
        if on { set.insert(user_id) } else { set.remove(user_id) }
    }

    /// Handles a `1v1_match_request`.
    ///
    /// The request is re-resolved to the user's current global connection;
    /// users without one are ignored. Offline waiters are pruned, then the
    /// two longest-waiting users are paired while at least two remain.
    /// Returns the number of pairs formed.
    pub fn request_match(&mut self, requester: &ClientHandle, now: Instant) -> usize {
        let user_id = requester.user_id();
        let Some(current) = self.global_by_user.get(&user_id).map(Arc::clone) else {
            tracing::debug!(%user_id, conn_id = %requester.conn_id(), "match request without a global connection ignored");
            return 0;
        };
        if current.conn_id() != requester.conn_id() {
            tracing::debug!(%user_id, stale = %requester.conn_id(), current = %current.conn_id(), "match request re-resolved to current connection");
        }

        let index = &self.global_by_user;
        let pruned = self.matches.prune(|u| index.contains_key(&u));
        if pruned > 0 {
            tracing::debug!(pruned, "pruned offline matchmaking entries");
        }
        self.matches.enqueue(user_id, current.conn_id(), now);

        let mut pairs = 0;
        while let Some((first, second)) = self.matches.pop_pair() {
            let (Some(a), Some(b)) = (
                self.global_by_user.get(&first.user_id).map(Arc::clone),
                self.global_by_user.get(&second.user_id).map(Arc::clone),
            ) else {
                continue;
            };
            tracing::info!(first = %a.user_id(), second = %b.user_id(), "1v1 match formed");
            self.deliver_or_evict(&a, match_success(&b, true));
            self.deliver_or_evict(&b, match_success(&a, false));
            pairs += 1;
        }
        pairs
    }

    /// Handles a `1v1_match_cancel`. Returns `true` if the user was waiting.
    pub fn cancel_match(&mut self, requester: &ClientHandle) -> bool {
        self.matches.remove_user(requester.user_id())
    }

    /// Expires waiters older than `timeout`, notifying each with
    /// `1v1_match_timeout`. Returns the number expired.
    pub fn expire_matches(&mut self, now: Instant, timeout: Duration) -> usize {
        let expired = self.matches.expire(now, timeout);
        for entry in &expired {
            if let Some(client) = self.global_by_user.get(&entry.user_id).map(Arc::clone) {
                let notice = Message::new(MessageKind::MatchTimeout)
                    .in_channel(Channel::Global)
                    .from_identity(client.identity())
                    .stamped();
                self.deliver_or_evict(&client, notice);
            }
        }
        expired.len()
    }

    /// Number of live connections in a room.
    #[must_use]
    pub fn room_member_count(&self, room_id: RoomId) -> usize {
        self.rooms.get(&room_id).map_or(0, HashMap::len)
    }

    /// Number of live connections in a room other than `conn_id`.
    #[must_use]
    pub fn room_member_count_excluding(&self, room_id: RoomId, conn_id: ConnId) -> usize {
        self.rooms
            .get(&room_id)
            .map_or(0, |m| m.keys().filter(|id| **id != conn_id).count())
    }

    /// On-mic users of a room, in on-mic order.
    #[must_use]
    pub fn on_mic_users(&self, room_id: RoomId) -> Vec<UserId> {
        self.on_mic.get(&room_id).map(OnMicSet::to_vec).unwrap_or_default()
    }

    /// Returns `true` if `conn_id` holds `user_id`'s global index slot.
    #[must_use]
    pub fn is_current_global(&self, user_id: UserId, conn_id: ConnId) -> bool {
        self.global_by_user
            .get(&user_id)
            .is_some_and(|c| c.conn_id() == conn_id)
    }

    /// Number of rooms with at least one live connection.
    #[must_use]
    pub fn live_room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Number of users with a live global connection.
    #[must_use]
    pub fn global_user_count(&self) -> usize {
        self.global_by_user.len()
    }

    /// Number of users waiting for a 1v1 partner.
    #[must_use]
    pub fn waiting_count(&self) -> usize {
        self.matches.len()
    }

    fn recipients(&self, target: BroadcastTarget, exclude: Option<ConnId>) -> Vec<Arc<ClientHandle>> {
        let keep = |c: &&Arc<ClientHandle>| Some(c.conn_id()) != exclude;
        match target {
            BroadcastTarget::Room(room_id) => self
                .rooms
                .get(&room_id)
                .map(|m| m.values().filter(keep).map(Arc::clone).collect())
                .unwrap_or_default(),
            BroadcastTarget::Global => self.global.values().filter(keep).map(Arc::clone).collect(),
            BroadcastTarget::Everyone => self
                .rooms
                .values()
                .flat_map(HashMap::values)
                .chain(self.global.values())
                .filter(keep)
                .map(Arc::clone)
                .collect(),
        }
    }

    fn deliver_or_evict(&mut self, client: &Arc<ClientHandle>, message: Message) -> bool {
        match client.try_deliver(message) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(
                    user_id = %client.user_id(),
                    conn_id = %client.conn_id(),
                    error = %err,
                    "direct delivery failed, evicting connection"
                );
                self.evict(client);
                false
            }
        }
    }

    /// Treats a connection as dead: drops it from the hub and closes its
    /// queue. Room peers hear about it as an ordinary leave. Its read pump
    /// still runs the normal termination sequence, which finds nothing
    /// left to detach.
    fn evict(&mut self, client: &Arc<ClientHandle>) {
        client.close();
        if let Some((room_id, remaining)) = self.detach(client) {
            self.announce_leave(client, room_id, remaining);
        }
    }

    fn announce_leave(&mut self, client: &Arc<ClientHandle>, room_id: RoomId, remaining: usize) {
        if remaining == 0 {
            return;
        }
        let notice = Message::new(MessageKind::MemberUpdate)
            .in_channel(client.channel())
            .from_identity(client.identity())
            .with_data(json!({ "action": "leave", "remaining_count": remaining }))
            .stamped();
        self.broadcast(BroadcastTarget::Room(room_id), &notice, None);
    }

    /// Removes `client` from every hub structure. For room connections
    /// returns the room and its remaining live member count.
    fn detach(&mut self, client: &Arc<ClientHandle>) -> Option<(RoomId, usize)> {
        let conn_id = client.conn_id();
        let user_id = client.user_id();
        match client.channel() {
            Channel::Room(room_id) => {
                let members = self.rooms.get_mut(&room_id)?;
                members.remove(&conn_id)?;
                let remaining = members.len();
                let user_still_present = members.values().any(|c| c.user_id() == user_id);
                if remaining == 0 {
                    self.rooms.remove(&room_id);
                    self.on_mic.remove(&room_id);
                    tracing::info!(%room_id, "room has no live members, ephemeral entry dropped");
                } else if !user_still_present && let Some(set) = self.on_mic.get_mut(&room_id) {
                    set.remove(user_id);
                }
                tracing::debug!(%room_id, %user_id, %conn_id, remaining, "client detached from room");
                Some((room_id, remaining))
            }
            Channel::Global => {
                self.global.remove(&conn_id);
                if self.is_current_global(user_id, conn_id) {
                    self.global_by_user.remove(&user_id);
                    self.matches.remove_user(user_id);
                } else {
                    self.matches.remove_conn(conn_id);
                }
                tracing::debug!(%user_id, %conn_id, "global client detached");
                None
            }
        }
    }
}

fn match_success(peer: &ClientHandle, initiator: bool) -> Message {
    let identity = peer.identity();
    Message::new(MessageKind::MatchSuccess)
        .in_channel(Channel::Global)
        .from_identity(identity)
        .with_data(json!({
            "peer_user_id": identity.user_id.to_string(),
            "peer_username": identity.username,
            "peer_avatar_url": identity.avatar_url,
            "initiator": initiator,
        }))
        .stamped()
}
