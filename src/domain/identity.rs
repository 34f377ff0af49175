//! Server-known identity attached to every connection.

use serde::{Deserialize, Serialize};

use super::UserId;

/// Who is behind a connection. Resolved once at upgrade time from the
/// validated token and the user's profile; anything a client puts in the
/// identity fields of a frame is overwritten with these values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Account id from the access token.
    pub user_id: UserId,
    /// Display name.
    pub username: String,
    /// Avatar URL, empty when the user has none.
    pub avatar_url: String,
}

impl Identity {
    /// Builds an identity, mapping a missing avatar to an empty string.
    #[must_use]
    pub fn new(user_id: UserId, username: impl Into<String>, avatar_url: Option<String>) -> Self {
        Self {
            user_id,
            username: username.into(),
            avatar_url: avatar_url.unwrap_or_default(),
        }
    }
}
