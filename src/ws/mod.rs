//! WebSocket layer: upgrade, per-connection pumps and frame routing.
//!
//! The endpoint at `/api/v1/ws` accepts an access token and an optional
//! room id. Room connections take part in their room's broadcasts; global
//! connections receive room-list announcements and can use 1v1
//! matchmaking.

pub mod connection;
pub mod dispatch;
pub mod handler;
pub mod messages;
