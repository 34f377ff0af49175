//! Per-connection read and write pumps.
//!
//! The write pump is the only consumer of a connection's outbound queue;
//! the read pump decodes client frames and hands them to the
//! [`Dispatcher`]. Both are generic over the transport so they can be
//! driven by an in-memory sink and stream in tests.

use std::fmt;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::Message as WsMessage;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::time::{Instant, MissedTickBehavior, timeout};

use super::dispatch::Dispatcher;
use super::messages::Message;
use crate::config::HubConfig;
use crate::hub::OutboundReceiver;
use crate::lifecycle::DisconnectHandler;

/// Timing parameters of the pumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpSettings {
    /// Deadline for one socket write.
    pub write_timeout: Duration,
    /// Read deadline, reset by every inbound frame (pongs included).
    pub pong_timeout: Duration,
    /// Keepalive ping period. Must be shorter than `pong_timeout`.
    pub ping_interval: Duration,
}

impl PumpSettings {
    /// Derives pump timings from configuration.
    #[must_use]
    pub fn from_config(config: &HubConfig) -> Self {
        Self {
            write_timeout: config.write_timeout,
            pong_timeout: config.pong_timeout,
            ping_interval: config.ping_interval(),
        }
    }
}

/// One authenticated, registered connection.
#[derive(Debug)]
pub struct Connection {
    dispatcher: Dispatcher,
    on_disconnect: Option<Box<dyn DisconnectHandler>>,
    settings: PumpSettings,
}

impl Connection {
    /// Wraps a registered client.
    #[must_use]
    pub fn new(
        dispatcher: Dispatcher,
        on_disconnect: Option<Box<dyn DisconnectHandler>>,
        settings: PumpSettings,
    ) -> Self {
        Self {
            dispatcher,
            on_disconnect,
            settings,
        }
    }

    /// Runs both pumps until the read side ends, then tears down.
    ///
    /// Teardown always happens in this order: the disconnect handler (at
    /// most once), unregistration from the hub, closure of the outbound
    /// queue. The write pump then flushes a close frame and exits.
    pub async fn run<S, St, E>(mut self, sink: S, stream: St, outbound: OutboundReceiver)
    where
        S: Sink<WsMessage> + Unpin,
        S::Error: fmt::Display,
        St: Stream<Item = Result<WsMessage, E>> + Unpin,
        E: fmt::Display,
    {
        let client = self.dispatcher.client();
        tracing::info!(
            user_id = %client.user_id(),
            conn_id = %client.conn_id(),
            channel = %client.channel(),
            "connection opened"
        );

        let write = write_pump(sink, outbound, self.settings);
        tokio::pin!(write);

        let write_finished = {
            let read = read_pump(stream, &self.dispatcher, self.settings.pong_timeout);
            tokio::select! {
                () = read => false,
                () = &mut write => true,
            }
        };

        self.terminate().await;
        if !write_finished {
            write.await;
        }
    }

    /// Runs the teardown sequence. Safe to call more than once.
    pub async fn terminate(&mut self) {
        let client = self.dispatcher.client();
        if let Some(handler) = self.on_disconnect.take() {
            handler.on_disconnect(client.conn_id()).await;
        }
        if let Err(e) = self
            .dispatcher
            .hub()
            .unregister(std::sync::Arc::clone(client))
            .await
        {
            tracing::warn!(conn_id = %client.conn_id(), error = %e, "unregister not delivered");
        }
        client.close();
        tracing::info!(
            user_id = %client.user_id(),
            conn_id = %client.conn_id(),
            "connection closed"
        );
    }
}

/// Drains the outbound queue into `sink`.
///
/// Messages already waiting behind the one that woke the pump are sent in
/// the same text frame, one JSON document per line. A keepalive ping goes
/// out every `ping_interval`. Returns after a write error or timeout, or
/// after sending a close frame once the queue is closed.
pub async fn write_pump<S>(mut sink: S, mut outbound: OutboundReceiver, settings: PumpSettings)
where
    S: Sink<WsMessage> + Unpin,
    S::Error: fmt::Display,
{
    let mut ping = tokio::time::interval_at(
        Instant::now() + settings.ping_interval,
        settings.ping_interval,
    );
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let frame = tokio::select! {
            next = outbound.recv() => match next {
                Some(first) => match batch(first, &mut outbound) {
                    Some(text) => WsMessage::text(text),
                    None => continue,
                },
                None => {
                    let _ = timeout(settings.write_timeout, sink.send(WsMessage::Close(None))).await;
                    break;
                }
            },
            _ = ping.tick() => WsMessage::Ping(Bytes::new()),
        };

        match timeout(settings.write_timeout, sink.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "socket write failed");
                break;
            }
            Err(_) => {
                tracing::debug!("socket write timed out");
                break;
            }
        }
    }
}

/// Serializes `first` plus whatever is already queued behind it.
fn batch(first: Message, outbound: &mut OutboundReceiver) -> Option<String> {
    let mut text = encode(&first);
    for _ in 0..outbound.len() {
        let Some(next) = outbound.try_recv() else {
            break;
        };
        let Some(line) = encode(&next) else {
            continue;
        };
        match text.as_mut() {
            Some(text) => {
                text.push('\n');
                text.push_str(&line);
            }
            None => text = Some(line),
        }
    }
    text
}

fn encode(msg: &Message) -> Option<String> {
    serde_json::to_string(msg)
        .inspect_err(|e| tracing::warn!(kind = %msg.kind, error = %e, "unencodable message dropped"))
        .ok()
}

/// Reads client frames until close, error, or `pong_timeout` of silence.
///
/// Undecodable frames are dropped and reading continues.
pub async fn read_pump<St, E>(mut stream: St, dispatcher: &Dispatcher, pong_timeout: Duration)
where
    St: Stream<Item = Result<WsMessage, E>> + Unpin,
    E: fmt::Display,
{
    let conn_id = dispatcher.client().conn_id();
    loop {
        let Ok(next) = timeout(pong_timeout, stream.next()).await else {
            tracing::debug!(%conn_id, "read deadline passed");
            break;
        };

        let decoded = match next {
            Some(Ok(WsMessage::Text(text))) => serde_json::from_str::<Message>(text.as_str()),
            Some(Ok(WsMessage::Binary(bytes))) => serde_json::from_slice::<Message>(&bytes),
            Some(Ok(WsMessage::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                tracing::debug!(%conn_id, error = %e, "socket read failed");
                break;
            }
        };

        match decoded {
            Ok(msg) => {
                if let Err(e) = dispatcher.dispatch(msg).await {
                    tracing::warn!(%conn_id, error = %e, "dispatch failed");
                    break;
                }
            }
            Err(e) => tracing::debug!(%conn_id, error = %e, "malformed frame dropped"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::convert::Infallible;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::domain::{Channel, ConnId, Identity, RoomId, UserId};
    use crate::hub::{ClientHandle, Hub, HubHandle};
    use crate::ws::messages::MessageKind;

    fn settings() -> PumpSettings {
        PumpSettings {
            write_timeout: Duration::from_secs(1),
            pong_timeout: Duration::from_secs(5),
            ping_interval: Duration::from_secs(60),
        }
    }

    fn text(raw: &str) -> Result<WsMessage, Infallible> {
        Ok(WsMessage::text(raw.to_string()))
    }

    #[derive(Debug, Default)]
    struct CountingHandler {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl DisconnectHandler for CountingHandler {
        async fn on_disconnect(&self, _conn_id: ConnId) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn queued_messages_share_one_frame() {
        let (client, outbound) =
            ClientHandle::new(Identity::new(UserId::new(), "a", None), Channel::Global, 8);
        for kind in [MessageKind::Chat, MessageKind::MicOn, MessageKind::MicOff] {
            let _ = client.try_deliver(Message::new(kind));
        }
        client.close();

        let mut sent: Vec<WsMessage> = Vec::new();
        write_pump(&mut sent, outbound, settings()).await;

        let [WsMessage::Text(frame), WsMessage::Close(None)] = sent.as_slice() else {
            panic!("unexpected frames: {sent:?}");
        };
        let kinds: Vec<String> = frame
            .as_str()
            .lines()
            .filter_map(|line| serde_json::from_str::<Message>(line).ok())
            .map(|m| m.kind.to_string())
            .collect();
        assert_eq!(kinds, vec!["message", "mic_on", "mic_off"]);
    }

    #[tokio::test]
    async fn teardown_runs_handler_once_and_unregisters() {
        let hub: HubHandle = Hub::spawn(&HubConfig::default());
        let room = RoomId::new();
        let (client, outbound) = ClientHandle::new(
            Identity::new(UserId::new(), "a", None),
            Channel::Room(room),
            8,
        );
        let client = Arc::new(client);
        let Ok(()) = hub.register(Arc::clone(&client)).await else {
            panic!("hub stopped");
        };

        let calls = Arc::new(AtomicUsize::new(0));
        let handler = CountingHandler {
            calls: Arc::clone(&calls),
        };
        let connection = Connection::new(
            Dispatcher::new(Arc::clone(&client), hub.clone()),
            Some(Box::new(handler)),
            settings(),
        );

        let stream = futures_util::stream::iter(vec![
            text("not json"),
            text(r#"{"type":"message","content":"hello"}"#),
        ]);
        let mut sent: Vec<WsMessage> = Vec::new();
        connection.run(&mut sent, stream, outbound).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(client.is_closed());
        assert_eq!(hub.room_member_count(room).await, 0);
        assert!(matches!(sent.last(), Some(WsMessage::Close(None))));
    }

    #[tokio::test]
    async fn read_pump_survives_malformed_frames() {
        let hub = Hub::spawn(&HubConfig::default());
        let room = RoomId::new();
        let (client, mut outbound) = ClientHandle::new(
            Identity::new(UserId::new(), "alice", None),
            Channel::Room(room),
            8,
        );
        let client = Arc::new(client);
        let _ = hub.register(Arc::clone(&client)).await;
        let dispatcher = Dispatcher::new(Arc::clone(&client), hub.clone());

        let stream = futures_util::stream::iter(vec![
            text("{"),
            text(r#"{"content":"no type"}"#),
            text(r#"{"type":"message","content":"still here"}"#),
        ]);
        read_pump(stream, &dispatcher, Duration::from_secs(5)).await;

        loop {
            let Some(msg) = outbound.recv().await else {
                panic!("queue closed");
            };
            if msg.kind == MessageKind::Chat {
                assert_eq!(msg.content.as_deref(), Some("still here"));
                break;
            }
        }
    }
}
