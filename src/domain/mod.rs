//! Domain layer: identifiers, channels, identities and the on-mic set.
//!
//! These types are shared by the hub, the WebSocket pumps, the lifecycle
//! reconciler and the persistence layer.

pub mod channel;
pub mod identity;
pub mod ids;
pub mod on_mic;

pub use channel::{Channel, GLOBAL_CHANNEL};
pub use identity::Identity;
pub use ids::{ConnId, RoomId, UserId};
pub use on_mic::OnMicSet;
