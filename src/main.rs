//! practice-hub server entry point.
//!
//! Starts the Axum HTTP server with REST and WebSocket endpoints.

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use practice_hub::config::{HubConfig, LogFormat};
use practice_hub::persistence::{MemoryStore, PostgresStore, ProfileStore, RoomStore};
use practice_hub::server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = HubConfig::from_env()
        .map_err(|e| anyhow::anyhow!(e))
        .context("invalid configuration")?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }

    tracing::info!(addr = %config.listen_addr, "starting practice-hub");
    if config.uses_development_secret() {
        tracing::warn!("JWT_SECRET not set; using the development secret");
    }

    // Build persistence layer
    let (store, profiles): (Arc<dyn RoomStore>, Arc<dyn ProfileStore>) =
        if config.persistence_enabled {
            let pg = Arc::new(
                PostgresStore::connect(&config)
                    .await
                    .context("failed to open the room store")?,
            );
            (Arc::clone(&pg) as Arc<dyn RoomStore>, pg as Arc<dyn ProfileStore>)
        } else {
            tracing::warn!("persistence disabled; rooms are kept in memory, users join as guests");
            let memory = Arc::new(MemoryStore::with_guest_profiles());
            (
                Arc::clone(&memory) as Arc<dyn RoomStore>,
                memory as Arc<dyn ProfileStore>,
            )
        };

    let listen_addr = config.listen_addr;
    let app = server::build_app(server::build_state(config, store, profiles));

    // Start server
    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind {listen_addr}"))?;
    tracing::info!(addr = %listen_addr, "server listening");

    axum::serve(listener, app).await?;

    Ok(())
}
