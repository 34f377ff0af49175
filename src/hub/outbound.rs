//! Bounded per-connection outbound queue with an explicit try-send.
//!
//! The hub never waits on a recipient. [`OutboundSender::try_deliver`]
//! either enqueues immediately or reports a [`DeliveryError`], and the
//! caller routes that failure to eviction. Closing is idempotent and is
//! observed by the write pump as the end of the queue.

use std::sync::{Mutex, PoisonError};

use tokio::sync::mpsc;

use crate::ws::messages::Message;

/// Why a message could not be enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The queue is at capacity: the consumer is too slow or stuck.
    #[error("outbound queue is full")]
    Full,
    /// The queue was closed, or its consumer has gone away.
    #[error("outbound queue is closed")]
    Closed,
}

/// Producer side of a connection's outbound queue.
///
/// Holds the only [`mpsc::Sender`]; [`close`](Self::close) drops it, which
/// ends the write pump once the already-queued messages are drained.
#[derive(Debug)]
pub struct OutboundSender {
    tx: Mutex<Option<mpsc::Sender<Message>>>,
}

/// Consumer side of a connection's outbound queue. Owned by the write pump.
#[derive(Debug)]
pub struct OutboundReceiver {
    rx: mpsc::Receiver<Message>,
}

/// Creates a queue with room for `capacity` messages.
#[must_use]
pub fn outbound_queue(capacity: usize) -> (OutboundSender, OutboundReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        OutboundSender {
            tx: Mutex::new(Some(tx)),
        },
        OutboundReceiver { rx },
    )
}

impl OutboundSender {
    /// Enqueues `message` without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Full`] when the queue is at capacity and
    /// [`DeliveryError::Closed`] when it was closed or the consumer dropped.
    pub fn try_deliver(&self, message: Message) -> Result<(), DeliveryError> {
        let guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = guard.as_ref() else {
            return Err(DeliveryError::Closed);
        };
        tx.try_send(message).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Closes the queue. Returns `true` only for the call that closed it.
    pub fn close(&self) -> bool {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl OutboundReceiver {
    /// Waits for the next message. `None` means the queue was closed and
    /// fully drained.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Takes an already-queued message without waiting.
    pub fn try_recv(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }

    /// Number of messages currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Returns `true` when nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::messages::MessageKind;

    fn chat() -> Message {
        Message::new(MessageKind::Chat)
    }

    #[test]
    fn full_queue_reports_full_without_blocking() {
        let (tx, _rx) = outbound_queue(2);
        assert!(tx.try_deliver(chat()).is_ok());
        assert!(tx.try_deliver(chat()).is_ok());
        assert_eq!(tx.try_deliver(chat()), Err(DeliveryError::Full));
    }

    #[test]
    fn close_is_idempotent() {
        let (tx, _rx) = outbound_queue(4);
        assert!(!tx.is_closed());
        assert!(tx.close());
        assert!(!tx.close());
        assert!(tx.is_closed());
        assert_eq!(tx.try_deliver(chat()), Err(DeliveryError::Closed));
    }

    #[test]
    fn dropped_consumer_reports_closed() {
        let (tx, rx) = outbound_queue(4);
        drop(rx);
        assert_eq!(tx.try_deliver(chat()), Err(DeliveryError::Closed));
    }

    #[tokio::test]
    async fn receiver_drains_then_ends_after_close() {
        let (tx, mut rx) = outbound_queue(4);
        assert!(tx.try_deliver(chat()).is_ok());
        assert!(tx.try_deliver(chat()).is_ok());
        tx.close();

        assert_eq!(rx.len(), 2);
        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_some());
        assert!(rx.recv().await.is_none());
    }
}
