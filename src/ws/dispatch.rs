//! Routing of inbound client frames.
//!
//! Every decoded frame first has its sender fields overwritten with the
//! connection's server-known identity, then is routed by kind:
//!
//! | Kind                                         | Route                                  |
//! |----------------------------------------------|----------------------------------------|
//! | `message`                                    | room, sender included                  |
//! | `mic_on`, `mic_off`                          | update on-mic set, room minus sender   |
//! | `mic_request`                                | room minus sender, requester in `data` |
//! | `mic_approve`                                | `mic_approved` to target and whole room|
//! | `mic_reject`                                 | target only                            |
//! | `webrtc_*`, `1v1_match_accept`/`_reject`     | target only (`data.target_user_id`)    |
//! | `1v1_match_request`, `1v1_match_cancel`      | hub matchmaking                        |
//! | server announcements                         | dropped                                |
//! | anything else                                | room minus sender                      |
//!
//! Room routes are no-ops for global connections.

use std::sync::Arc;

use serde_json::{Value, json};

use crate::domain::{Channel, UserId};
use crate::error::HubError;
use crate::hub::{BroadcastTarget, ClientHandle, HubHandle};
use crate::ws::messages::{Message, MessageKind};

/// Routes the frames of one connection into the hub.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    client: Arc<ClientHandle>,
    hub: HubHandle,
}

impl Dispatcher {
    /// Creates a dispatcher for `client`.
    #[must_use]
    pub fn new(client: Arc<ClientHandle>, hub: HubHandle) -> Self {
        Self { client, hub }
    }

    /// The connection this dispatcher routes for.
    #[must_use]
    pub fn client(&self) -> &Arc<ClientHandle> {
        &self.client
    }

    /// The hub this dispatcher routes into.
    #[must_use]
    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    /// Routes one decoded frame.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::HubUnavailable`] if the hub has stopped.
    pub async fn dispatch(&self, mut msg: Message) -> Result<(), HubError> {
        let identity = self.client.identity();
        msg.overwrite_sender(identity, self.client.channel());

        match msg.kind {
            MessageKind::Chat => self.to_room(msg, false).await,
            MessageKind::MicOn | MessageKind::MicOff => {
                if let Channel::Room(room_id) = self.client.channel() {
                    let on = msg.kind == MessageKind::MicOn;
                    self.hub.set_on_mic(room_id, identity.user_id, on).await?;
                }
                self.to_room(msg, true).await
            }
            MessageKind::MicRequest => {
                let data = msg.data.get_or_insert_with(|| json!({}));
                if let Value::Object(fields) = data {
                    fields
                        .entry("user_id")
                        .or_insert_with(|| json!(identity.user_id.to_string()));
                    fields
                        .entry("username")
                        .or_insert_with(|| json!(identity.username));
                    fields
                        .entry("avatar_url")
                        .or_insert_with(|| json!(identity.avatar_url));
                }
                self.to_room(msg, true).await
            }
            MessageKind::MicApprove => self.approve(&msg).await,
            MessageKind::MicReject => {
                let Some(target) = target_user(&msg) else {
                    return Ok(());
                };
                let notice = self.verdict(MessageKind::MicReject, target);
                self.hub
                    .send_direct(Arc::clone(&self.client), target, notice)
                    .await
            }
            MessageKind::WebRtcOffer
            | MessageKind::WebRtcAnswer
            | MessageKind::WebRtcIce
            | MessageKind::MatchAccept
            | MessageKind::MatchReject => {
                let Some(target) = target_user(&msg) else {
                    return Ok(());
                };
                self.hub
                    .send_direct(Arc::clone(&self.client), target, msg)
                    .await
            }
            MessageKind::MatchRequest => {
                let user_id = identity.user_id;
                let conn_id = self.client.conn_id();
                if !self.hub.is_current_global(user_id, conn_id).await {
                    tracing::debug!(%user_id, %conn_id, "match request from a stale connection");
                }
                self.hub.request_match(Arc::clone(&self.client)).await
            }
            MessageKind::MatchCancel => self.hub.cancel_match(Arc::clone(&self.client)).await,
            MessageKind::MemberUpdate
            | MessageKind::RoomUpdate
            | MessageKind::RoomCreated
            | MessageKind::RoomDeleted
            | MessageKind::RoomListUpdate
            | MessageKind::MatchSuccess
            | MessageKind::MatchTimeout => {
                tracing::debug!(
                    user_id = %identity.user_id,
                    kind = %msg.kind,
                    "client sent a server announcement, dropped"
                );
                Ok(())
            }
            _ => self.to_room(msg, true).await,
        }
    }

    async fn to_room(&self, msg: Message, exclude_sender: bool) -> Result<(), HubError> {
        let Channel::Room(room_id) = self.client.channel() else {
            return Ok(());
        };
        let exclude = exclude_sender.then(|| self.client.conn_id());
        self.hub
            .broadcast_excluding(BroadcastTarget::Room(room_id), msg, exclude)
            .await
    }

    async fn approve(&self, msg: &Message) -> Result<(), HubError> {
        let Some(target) = target_user(msg) else {
            return Ok(());
        };
        let notice = self.verdict(MessageKind::MicApproved, target);
        self.hub
            .send_direct(Arc::clone(&self.client), target, notice.clone())
            .await?;
        self.to_room(notice, false).await
    }

    /// A host decision about `target`, signed by the deciding host.
    fn verdict(&self, kind: MessageKind, target: UserId) -> Message {
        let identity = self.client.identity();
        let mut notice = Message::new(kind)
            .in_channel(self.client.channel())
            .from_identity(identity)
            .with_data(json!({
                "user_id": target.to_string(),
                "target_user_id": target.to_string(),
                "host_id": identity.user_id.to_string(),
            }))
            .stamped();
        notice.user_id = Some(target.to_string());
        notice
    }
}

fn target_user(msg: &Message) -> Option<UserId> {
    let target = msg
        .data_str("target_user_id")
        .and_then(|raw| raw.parse().ok());
    if target.is_none() {
        tracing::debug!(kind = %msg.kind, "point-to-point frame without a valid target_user_id");
    }
    target
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::config::HubConfig;
    use crate::domain::{Identity, RoomId};
    use crate::hub::{Hub, OutboundReceiver};

    async fn join(
        hub: &HubHandle,
        channel: Channel,
        name: &str,
    ) -> (Dispatcher, OutboundReceiver) {
        let (client, rx) = ClientHandle::new(Identity::new(UserId::new(), name, None), channel, 32);
        let client = Arc::new(client);
        let Ok(()) = hub.register(Arc::clone(&client)).await else {
            panic!("hub stopped");
        };
        (Dispatcher::new(client, hub.clone()), rx)
    }

    async fn next_of(rx: &mut OutboundReceiver, kind: MessageKind) -> Message {
        loop {
            let Some(msg) = rx.recv().await else {
                panic!("queue closed before {kind}");
            };
            if msg.kind == kind {
                return msg;
            }
        }
    }

    fn frame(raw: &str) -> Message {
        let Ok(msg) = serde_json::from_str(raw) else {
            panic!("bad fixture: {raw}");
        };
        msg
    }

    #[tokio::test]
    async fn chat_reaches_sender_with_server_identity() {
        let hub = Hub::spawn(&HubConfig::default());
        let room = RoomId::new();
        let (alice, mut alice_rx) = join(&hub, Channel::Room(room), "alice").await;

        let Ok(()) = alice
            .dispatch(frame(r#"{"type":"message","content":"hi","username":"mallory"}"#))
            .await
        else {
            panic!("dispatch failed");
        };

        let echoed = next_of(&mut alice_rx, MessageKind::Chat).await;
        assert_eq!(echoed.username.as_deref(), Some("alice"));
        assert_eq!(echoed.content.as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn mic_on_updates_set_and_skips_sender() {
        let hub = Hub::spawn(&HubConfig::default());
        let room = RoomId::new();
        let (alice, mut alice_rx) = join(&hub, Channel::Room(room), "alice").await;
        let (_bob, mut bob_rx) = join(&hub, Channel::Room(room), "bob").await;

        let _ = alice.dispatch(frame(r#"{"type":"mic_on"}"#)).await;
        let _ = alice.dispatch(frame(r#"{"type":"message"}"#)).await;

        let seen = next_of(&mut bob_rx, MessageKind::MicOn).await;
        assert_eq!(seen.user_id, Some(alice.client().user_id().to_string()));
        // Alice's next frame after her join notices is her own chat echo.
        let mut kinds = Vec::new();
        while let Some(msg) = alice_rx.recv().await {
            kinds.push(msg.kind.clone());
            if msg.kind == MessageKind::Chat {
                break;
            }
        }
        assert!(!kinds.contains(&MessageKind::MicOn));
        assert_eq!(hub.on_mic_users(room).await, vec![alice.client().user_id()]);
    }

    #[tokio::test]
    async fn mic_request_carries_requester() {
        let hub = Hub::spawn(&HubConfig::default());
        let room = RoomId::new();
        let (alice, _alice_rx) = join(&hub, Channel::Room(room), "alice").await;
        let (_bob, mut bob_rx) = join(&hub, Channel::Room(room), "bob").await;

        let _ = alice.dispatch(frame(r#"{"type":"mic_request"}"#)).await;
        let request = next_of(&mut bob_rx, MessageKind::MicRequest).await;
        assert_eq!(request.data_str("username"), Some("alice"));
        assert_eq!(
            request.data_str("user_id"),
            Some(alice.client().user_id().to_string().as_str())
        );
    }

    #[tokio::test]
    async fn mic_approve_goes_direct_and_room_wide() {
        let hub = Hub::spawn(&HubConfig::default());
        let room = RoomId::new();
        let (host, mut host_rx) = join(&hub, Channel::Room(room), "host").await;
        let (bob, mut bob_rx) = join(&hub, Channel::Room(room), "bob").await;
        let (_carol, mut carol_rx) = join(&hub, Channel::Room(room), "carol").await;

        let raw = format!(
            r#"{{"type":"mic_approve","data":{{"target_user_id":"{}"}}}}"#,
            bob.client().user_id()
        );
        let Ok(()) = host.dispatch(frame(&raw)).await else {
            panic!("dispatch failed");
        };

        let bob_id = bob.client().user_id().to_string();
        for rx in [&mut host_rx, &mut carol_rx] {
            let seen = next_of(rx, MessageKind::MicApproved).await;
            assert_eq!(seen.data_str("target_user_id"), Some(bob_id.as_str()));
        }
        let direct = next_of(&mut bob_rx, MessageKind::MicApproved).await;
        let broadcast = next_of(&mut bob_rx, MessageKind::MicApproved).await;
        assert_eq!(direct, broadcast);
        assert_eq!(direct.user_id.as_deref(), Some(bob_id.as_str()));
        assert_eq!(direct.username.as_deref(), Some("host"));
    }

    #[tokio::test]
    async fn mic_approve_from_non_host_is_relayed_with_sender_as_host() {
        let hub = Hub::spawn(&HubConfig::default());
        let room = RoomId::new();
        let (_host, _host_rx) = join(&hub, Channel::Room(room), "host").await;
        let (bob, mut bob_rx) = join(&hub, Channel::Room(room), "bob").await;
        let (carol, _carol_rx) = join(&hub, Channel::Room(room), "carol").await;

        let raw = format!(
            r#"{{"type":"mic_approve","data":{{"target_user_id":"{}"}}}}"#,
            bob.client().user_id()
        );
        let Ok(()) = carol.dispatch(frame(&raw)).await else {
            panic!("dispatch failed");
        };

        let carol_id = carol.client().user_id().to_string();
        let direct = next_of(&mut bob_rx, MessageKind::MicApproved).await;
        assert_eq!(direct.data_str("host_id"), Some(carol_id.as_str()));
        assert_eq!(direct.username.as_deref(), Some("carol"));
    }

    #[tokio::test]
    async fn signaling_is_point_to_point() {
        let hub = Hub::spawn(&HubConfig::default());
        let room = RoomId::new();
        let (alice, _alice_rx) = join(&hub, Channel::Room(room), "alice").await;
        let (bob, mut bob_rx) = join(&hub, Channel::Room(room), "bob").await;
        let (_carol, mut carol_rx) = join(&hub, Channel::Room(room), "carol").await;

        let raw = format!(
            r#"{{"type":"webrtc_offer","data":{{"target_user_id":"{}","sdp":"v=0"}}}}"#,
            bob.client().user_id()
        );
        let _ = alice.dispatch(frame(&raw)).await;
        let _ = alice.dispatch(frame(r#"{"type":"message"}"#)).await;

        let offer = next_of(&mut bob_rx, MessageKind::WebRtcOffer).await;
        assert_eq!(offer.data_str("sdp"), Some("v=0"));
        // Carol sees the later chat but never the offer.
        let mut kinds = Vec::new();
        while let Some(msg) = carol_rx.recv().await {
            kinds.push(msg.kind.clone());
            if msg.kind == MessageKind::Chat {
                break;
            }
        }
        assert!(!kinds.contains(&MessageKind::WebRtcOffer));
    }

    #[tokio::test]
    async fn unknown_kinds_fall_back_to_room() {
        let hub = Hub::spawn(&HubConfig::default());
        let room = RoomId::new();
        let (alice, _alice_rx) = join(&hub, Channel::Room(room), "alice").await;
        let (_bob, mut bob_rx) = join(&hub, Channel::Room(room), "bob").await;

        let _ = alice.dispatch(frame(r#"{"type":"hand_raise"}"#)).await;
        let seen = next_of(&mut bob_rx, MessageKind::Other("hand_raise".into())).await;
        assert_eq!(seen.username.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn forged_announcements_are_dropped() {
        let hub = Hub::spawn(&HubConfig::default());
        let room = RoomId::new();
        let (alice, _alice_rx) = join(&hub, Channel::Room(room), "alice").await;
        let (_bob, mut bob_rx) = join(&hub, Channel::Room(room), "bob").await;

        let _ = alice.dispatch(frame(r#"{"type":"room_deleted"}"#)).await;
        let _ = alice.dispatch(frame(r#"{"type":"message"}"#)).await;

        let mut kinds = Vec::new();
        while let Some(msg) = bob_rx.recv().await {
            kinds.push(msg.kind.clone());
            if msg.kind == MessageKind::Chat {
                break;
            }
        }
        assert!(!kinds.contains(&MessageKind::RoomDeleted));
    }

    #[tokio::test]
    async fn two_global_users_are_matched() {
        let hub = Hub::spawn(&HubConfig::default());
        let (alice, mut alice_rx) = join(&hub, Channel::Global, "alice").await;
        let (bob, mut bob_rx) = join(&hub, Channel::Global, "bob").await;

        let _ = alice.dispatch(frame(r#"{"type":"1v1_match_request"}"#)).await;
        let _ = bob.dispatch(frame(r#"{"type":"1v1_match_request"}"#)).await;

        let a = next_of(&mut alice_rx, MessageKind::MatchSuccess).await;
        let b = next_of(&mut bob_rx, MessageKind::MatchSuccess).await;
        assert_eq!(
            a.data_str("peer_user_id"),
            Some(bob.client().user_id().to_string().as_str())
        );
        assert_eq!(
            b.data_str("peer_user_id"),
            Some(alice.client().user_id().to_string().as_str())
        );
        assert_eq!(hub.stats().await.waiting_for_match, 0);
    }
}
