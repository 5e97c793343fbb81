//! HTTP server assembly.

use anyhow::Result;
use axum::routing::{delete, get, post, put};
use axum::Router;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::api;
use crate::config::Config;
use crate::gateway;
use crate::metrics;
use crate::state::AppState;

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let websocket_path = state.config.transport.websocket_path.clone();

    Router::new()
        .route("/health", get(api::health))
        .route("/rooms", get(api::list_rooms).post(api::create_room))
        .route("/rooms/:id/messages", get(api::list_messages))
        .route("/messages", post(api::send_message))
        .route("/messages/:id/edit", put(api::edit_message))
        .route("/messages/:id", delete(api::delete_message))
        .route("/push/subscribe", post(api::subscribe_push))
        .route(&websocket_path, get(gateway::ws_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if storage cannot be opened or the server fails to
/// start.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let websocket_path = config.transport.websocket_path.clone();
    let state = AppState::from_config(config).await?;
    let app = router(state);

    let listener = TcpListener::bind(addr).await?;

    info!("Parley server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}{}", addr, websocket_path);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Parley server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
