//! # practice-hub
//!
//! Real-time backend for language-practice rooms.
//!
//! Clients open WebSocket connections either to a room (chat, microphone
//! signalling, WebRTC relay) or to the global channel (room-list updates
//! and 1v1 matchmaking). A single hub task owns all live presence; a
//! lifecycle reconciler keeps the durable room records consistent with it
//! as people leave, handing the host role to an on-mic member and closing
//! rooms nobody is left in.
//!
//! ## Architecture
//!
//! ```text
//! Clients (HTTP, WebSocket)
//!     │
//!     ├── REST Handlers (api/)
//!     ├── WS Handler + Pumps (ws/)
//!     │
//!     ├── RoomService (service/)
//!     ├── Hub event loop (hub/)
//!     ├── Reconciler + Room monitors (lifecycle/)
//!     │
//!     └── Room Store (persistence/): PostgreSQL or in-memory
//! ```

pub mod api;
pub mod app_state;
pub mod auth;
pub mod config;
pub mod domain;
pub mod error;
pub mod hub;
pub mod lifecycle;
pub mod persistence;
pub mod server;
pub mod service;
pub mod ws;
