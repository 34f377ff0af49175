//! Ephemeral per-room set of users currently speaking.

use super::UserId;

/// Users flagged as on-mic in one room, in the order they went on-mic.
///
/// Never persisted. Rebuilt purely from `mic_on` / `mic_off` frames and
/// dropped together with the room's live entry. Insertion order matters:
/// host succession picks the earliest eligible speaker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OnMicSet {
    users: Vec<UserId>,
}

impl OnMicSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Flags `user` as on-mic. Returns `false` if already flagged.
    pub fn insert(&mut self, user: UserId) -> bool {
        if self.users.contains(&user) {
            return false;
        }
        self.users.push(user);
        true
    }

    /// Clears the flag for `user`. Returns `false` if it was not set.
    pub fn remove(&mut self, user: UserId) -> bool {
        let before = self.users.len();
        self.users.retain(|u| *u != user);
        self.users.len() != before
    }

    /// Returns `true` if `user` is on-mic.
    #[must_use]
    pub fn contains(&self, user: UserId) -> bool {
        self.users.contains(&user)
    }

    /// Number of on-mic users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Returns `true` when nobody is on-mic.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Copies the users out in on-mic order.
    #[must_use]
    pub fn to_vec(&self) -> Vec<UserId> {
        self.users.clone()
    }
}
