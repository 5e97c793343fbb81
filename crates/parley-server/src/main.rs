//! # Parley Server
//!
//! Realtime chat room server: REST endpoints plus a WebSocket channel.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings (in-memory storage)
//! PARLEY_JWT_SECRET=change-me parley
//!
//! # Run with a config file
//! PARLEY_CONFIG=/path/to/parley.toml parley
//!
//! # Run with environment variables
//! PARLEY_PORT=8080 PARLEY_HOST=0.0.0.0 PARLEY_DATABASE_URL=sqlite://parley.db parley
//! ```

mod api;
mod auth;
mod config;
mod error;
mod gateway;
mod metrics;
mod push;
mod server;
mod session;
mod state;

#[cfg(test)]
mod testing;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,parley_core=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting Parley server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    server::run_server(config).await?;

    Ok(())
}
