//! The hub's view of one live connection.

use super::outbound::{DeliveryError, OutboundReceiver, OutboundSender, outbound_queue};
use crate::domain::{Channel, ConnId, Identity, UserId};
use crate::ws::messages::Message;

/// Handle the hub stores in its maps for each registered connection.
///
/// Shared behind an `Arc` between the hub's room set, its global index and
/// the connection's own read pump. Equality is by [`ConnId`]: two sockets
/// of the same user are different clients.
#[derive(Debug)]
pub struct ClientHandle {
    conn_id: ConnId,
    identity: Identity,
    channel: Channel,
    outbound: OutboundSender,
}

impl ClientHandle {
    /// Creates a handle plus the receiving end its write pump will drain.
    #[must_use]
    pub fn new(identity: Identity, channel: Channel, capacity: usize) -> (Self, OutboundReceiver) {
        let (outbound, rx) = outbound_queue(capacity);
        let handle = Self {
            conn_id: ConnId::new(),
            identity,
            channel,
            outbound,
        };
        (handle, rx)
    }

    /// Connection id.
    #[must_use]
    pub const fn conn_id(&self) -> ConnId {
        self.conn_id
    }

    /// Server-known identity.
    #[must_use]
    pub const fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Owning user.
    #[must_use]
    pub const fn user_id(&self) -> UserId {
        self.identity.user_id
    }

    /// Channel assigned at creation. Never changes.
    #[must_use]
    pub const fn channel(&self) -> Channel {
        self.channel
    }

    /// Non-blocking enqueue onto this connection's outbound queue.
    ///
    /// # Errors
    ///
    /// Returns a [`DeliveryError`] when the queue is full or closed.
    pub fn try_deliver(&self, message: Message) -> Result<(), DeliveryError> {
        self.outbound.try_deliver(message)
    }

    /// Closes the outbound queue; safe to call more than once.
    pub fn close(&self) -> bool {
        self.outbound.close()
    }

    /// Returns `true` once the outbound queue has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

impl PartialEq for ClientHandle {
    fn eq(&self, other: &Self) -> bool {
        self.conn_id == other.conn_id
    }
}

impl Eq for ClientHandle {}
