//! Service layer: room business logic orchestration.
//!
//! [`RoomService`] validates and persists room operations, announces them
//! through the hub, and routes departures to the lifecycle reconciler.

pub mod room_service;

pub use room_service::{NewRoom, RoomDetails, RoomService};
