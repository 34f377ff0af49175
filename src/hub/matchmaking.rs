//! FIFO waiting list for 1v1 pairing.
//!
//! Keyed by user: a user is waiting at most once, no matter how many
//! global connections it holds, so it can never be paired with itself.
//! Entries are resolved to the user's current global connection at pairing
//! time; the connection id kept here only records who asked.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::domain::{ConnId, UserId};

/// One waiting user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitingEntry {
    /// Waiting user.
    pub user_id: UserId,
    /// Connection the request arrived on.
    pub conn_id: ConnId,
    /// When the user started waiting.
    pub since: Instant,
}

/// Users waiting for a partner, longest-waiting first.
#[derive(Debug, Default)]
pub struct MatchQueue {
    waiting: VecDeque<WaitingEntry>,
}

impl MatchQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `user_id` to the back of the queue.
    ///
    /// A user already waiting keeps its place; only the requesting
    /// connection is updated. Returns `true` if a new entry was added.
    pub fn enqueue(&mut self, user_id: UserId, conn_id: ConnId, now: Instant) -> bool {
        if let Some(entry) = self.waiting.iter_mut().find(|e| e.user_id == user_id) {
            entry.conn_id = conn_id;
            return false;
        }
        self.waiting.push_back(WaitingEntry {
            user_id,
            conn_id,
            since: now,
        });
        true
    }

    /// Removes `user_id` from the queue. Returns `true` if it was waiting.
    pub fn remove_user(&mut self, user_id: UserId) -> bool {
        let before = self.waiting.len();
        self.waiting.retain(|e| e.user_id != user_id);
        self.waiting.len() != before
    }

    /// Removes the entry created by `conn_id`, if any.
    pub fn remove_conn(&mut self, conn_id: ConnId) -> bool {
        let before = self.waiting.len();
        self.waiting.retain(|e| e.conn_id != conn_id);
        self.waiting.len() != before
    }

    /// Drops every entry whose user no longer has a live global
    /// connection. Returns how many were pruned.
    pub fn prune(&mut self, mut is_live: impl FnMut(UserId) -> bool) -> usize {
        let before = self.waiting.len();
        self.waiting.retain(|e| is_live(e.user_id));
        before - self.waiting.len()
    }

    /// Takes the two longest-waiting users, if there are two.
    pub fn pop_pair(&mut self) -> Option<(WaitingEntry, WaitingEntry)> {
        if self.waiting.len() < 2 {
            return None;
        }
        let first = self.waiting.pop_front()?;
        let second = self.waiting.pop_front()?;
        Some((first, second))
    }

    /// Removes and returns entries that have waited longer than `timeout`.
    pub fn expire(&mut self, now: Instant, timeout: Duration) -> Vec<WaitingEntry> {
        let (expired, kept): (Vec<_>, Vec<_>) = self
            .waiting
            .drain(..)
            .partition(|e| now.saturating_duration_since(e.since) >= timeout);
        self.waiting = kept.into();
        expired
    }

    /// Returns `true` if `user_id` is waiting.
    #[must_use]
    pub fn contains(&self, user_id: UserId) -> bool {
        self.waiting.iter().any(|e| e.user_id == user_id)
    }

    /// Number of waiting users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.waiting.len()
    }

    /// Returns `true` when nobody is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn pairs_two_longest_waiting_in_order() {
        let now = Instant::now();
        let (a, b, c) = (UserId::new(), UserId::new(), UserId::new());
        let mut queue = MatchQueue::new();
        queue.enqueue(a, ConnId::new(), now);
        queue.enqueue(b, ConnId::new(), now);
        queue.enqueue(c, ConnId::new(), now);

        let Some((first, second)) = queue.pop_pair() else {
            panic!("expected a pair");
        };
        assert_eq!((first.user_id, second.user_id), (a, b));
        assert_eq!(queue.len(), 1);
        assert!(queue.pop_pair().is_none());
    }

    #[test]
    fn same_user_is_never_queued_twice() {
        let now = Instant::now();
        let user = UserId::new();
        let second_conn = ConnId::new();
        let mut queue = MatchQueue::new();

        assert!(queue.enqueue(user, ConnId::new(), now));
        assert!(!queue.enqueue(user, second_conn, now));
        assert_eq!(queue.len(), 1);
        assert!(queue.pop_pair().is_none());
        assert!(queue.remove_conn(second_conn));
    }

    #[test]
    fn prune_drops_offline_users() {
        let now = Instant::now();
        let (online, offline) = (UserId::new(), UserId::new());
        let mut queue = MatchQueue::new();
        queue.enqueue(offline, ConnId::new(), now);
        queue.enqueue(online, ConnId::new(), now);

        assert_eq!(queue.prune(|u| u == online), 1);
        assert!(queue.contains(online));
        assert!(!queue.contains(offline));
    }

    #[test]
    fn expire_returns_only_stale_entries() {
        let start = Instant::now();
        let (old, fresh) = (UserId::new(), UserId::new());
        let mut queue = MatchQueue::new();
        queue.enqueue(old, ConnId::new(), start);
        queue.enqueue(fresh, ConnId::new(), start + Duration::from_secs(50));

        let expired = queue.expire(start + Duration::from_secs(60), Duration::from_secs(60));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired.first().map(|e| e.user_id), Some(old));
        assert!(queue.contains(fresh));
    }

    #[test]
    fn remove_user_cancels_wait() {
        let user = UserId::new();
        let mut queue = MatchQueue::new();
        queue.enqueue(user, ConnId::new(), Instant::now());
        assert!(queue.remove_user(user));
        assert!(!queue.remove_user(user));
        assert!(queue.is_empty());
    }
}
