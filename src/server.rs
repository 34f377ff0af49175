//! Wiring: builds the shared state and the complete router.

use std::sync::Arc;

use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api;
use crate::app_state::AppState;
use crate::auth::{JwtValidator, TokenValidator};
use crate::config::HubConfig;
use crate::hub::Hub;
use crate::lifecycle::{Reconciler, RoomMonitors};
use crate::persistence::{ProfileStore, RoomStore};
use crate::service::RoomService;

/// Starts the hub and assembles the services around it.
///
/// Must be called from within a Tokio runtime.
#[must_use]
pub fn build_state(
    config: HubConfig,
    store: Arc<dyn RoomStore>,
    profiles: Arc<dyn ProfileStore>,
) -> AppState {
    let hub = Hub::spawn(&config);
    let reconciler = Arc::new(Reconciler::new(store, hub.clone()));
    let monitors = Arc::new(RoomMonitors::new(
        Arc::clone(&reconciler),
        config.room_monitor_interval,
    ));
    let rooms = RoomService::new(
        Arc::clone(&reconciler),
        monitors,
        config.default_max_members,
    );
    let validator: Arc<dyn TokenValidator> = Arc::new(JwtValidator::new(&config.jwt_secret));

    AppState {
        rooms,
        hub,
        reconciler,
        validator,
        profiles,
        config: Arc::new(config),
    }
}

/// Builds the router with tracing and CORS layers, bound to `state`.
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .merge(api::build_router())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
