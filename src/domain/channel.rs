//! The channel a connection is bound to for its whole lifetime.

use std::fmt;

use super::RoomId;

/// Query-string sentinel selecting a room-less connection.
pub const GLOBAL_CHANNEL: &str = "global";

/// Where a connection lives: one practice room, or the room-less global
/// channel used for room-list updates and 1v1 matchmaking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Room-less connection. Never part of a room broadcast group.
    Global,
    /// Connection bound to a practice room.
    Room(RoomId),
}

impl Channel {
    /// Resolves the optional `room_id` query parameter of the upgrade
    /// request. Absent, empty, or `"global"` selects [`Channel::Global`].
    ///
    /// # Errors
    ///
    /// Returns the parse error when the value is neither the sentinel nor
    /// a valid room id.
    pub fn from_query(room_id: Option<&str>) -> Result<Self, uuid::Error> {
        match room_id.map(str::trim) {
            None | Some("") | Some(GLOBAL_CHANNEL) => Ok(Self::Global),
            Some(raw) => raw.parse().map(Self::Room),
        }
    }

    /// Returns the room id for room-bound connections.
    #[must_use]
    pub const fn room_id(&self) -> Option<RoomId> {
        match self {
            Self::Global => None,
            Self::Room(id) => Some(*id),
        }
    }

    /// Returns `true` for the room-less channel.
    #[must_use]
    pub const fn is_global(&self) -> bool {
        matches!(self, Self::Global)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str(GLOBAL_CHANNEL),
            Self::Room(id) => write!(f, "{id}"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn missing_or_sentinel_is_global() {
        assert_eq!(Channel::from_query(None).ok(), Some(Channel::Global));
        assert_eq!(Channel::from_query(Some("")).ok(), Some(Channel::Global));
        assert_eq!(Channel::from_query(Some("global")).ok(), Some(Channel::Global));
    }

    #[test]
    fn uuid_selects_room() {
        let id = RoomId::new();
        let raw = id.to_string();
        let Ok(channel) = Channel::from_query(Some(&raw)) else {
            panic!("room id should parse");
        };
        assert_eq!(channel, Channel::Room(id));
        assert_eq!(channel.room_id(), Some(id));
        assert_eq!(channel.to_string(), raw);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(Channel::from_query(Some("lobby")).is_err());
    }
}
