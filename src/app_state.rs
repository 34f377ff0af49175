//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::auth::TokenValidator;
use crate::config::HubConfig;
use crate::hub::HubHandle;
use crate::lifecycle::Reconciler;
use crate::persistence::ProfileStore;
use crate::service::RoomService;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Room operations.
    pub rooms: RoomService,
    /// Entry point to the running hub.
    pub hub: HubHandle,
    /// Departure reconciliation, shared with every room connection's
    /// disconnect handler.
    pub reconciler: Arc<Reconciler>,
    /// Access token validation.
    pub validator: Arc<dyn TokenValidator>,
    /// Display identity lookup for connecting users.
    pub profiles: Arc<dyn ProfileStore>,
    /// Service configuration.
    pub config: Arc<HubConfig>,
}
