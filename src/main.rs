//! Roomcast server - Binary Entry Point
//!
//! Serves the demo chat over WebSocket.

use std::sync::Arc;

use roomcast::api::http::create_router;
use roomcast::api::lobby;
use roomcast::api::websocket::AppState;
use roomcast::logging::init_tracing;
use roomcast::{BrokerConfig, BrokerResult, Registry};

#[tokio::main]
async fn main() -> BrokerResult<()> {
    init_tracing();

    let config = BrokerConfig::from_env()?;
    let bind_addr = config.bind_addr.clone();
    let ws_path = config.ws_path.clone();

    let registry = Registry::new(config);
    let state = Arc::new(AppState::new(registry.clone(), lobby::setup));
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, path = %ws_path, "{} v{} listening", roomcast::NAME, roomcast::VERSION);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!(
        clients = registry.clients_count(),
        rooms = registry.rooms_count(),
        "Server stopped"
    );
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");
}
