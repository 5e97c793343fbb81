//! Shared server state.

use anyhow::{bail, Context, Result};
use parley_core::{BroadcasterConfig, Engine, EngineConfig, IdentityVerifier, MemoryStore, Store};
use parley_store::SqliteStore;
use std::sync::Arc;
use tracing::{info, warn};

use crate::auth::JwtVerifier;
use crate::config::Config;
use crate::push::HttpPushGateway;

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    /// The synchronization engine.
    pub engine: Engine,
    /// Credential verification for requests and handshakes.
    pub verifier: Arc<dyn IdentityVerifier>,
    /// Server configuration.
    pub config: Arc<Config>,
}

impl AppState {
    /// Build state over a store.
    #[must_use]
    pub fn new<S: Store + 'static>(store: Arc<S>, config: Config) -> Self {
        let engine_config = EngineConfig {
            broadcaster: BroadcasterConfig {
                max_rooms_per_session: config.limits.max_rooms_per_session,
                channel_capacity: config.limits.room_channel_capacity,
            },
            notify_policy: config.push.policy,
        };

        let mut engine = Engine::new(store, engine_config);
        if config.push.enabled {
            engine = engine.with_push(
                Arc::new(HttpPushGateway::new(config.push.ttl_seconds)),
                config.push.timeout(),
            );
        } else {
            info!("Push notification disabled");
        }

        let verifier = JwtVerifier::new(
            &config.auth.jwt_secret,
            config.auth.token_ttl(),
            engine.users().clone(),
        );

        Self {
            engine,
            verifier: Arc::new(verifier),
            config: Arc::new(config),
        }
    }

    /// Open the configured store and build state over it.
    ///
    /// # Errors
    ///
    /// Returns an error if the auth secret is missing or the store cannot be
    /// opened.
    pub async fn from_config(config: Config) -> Result<Self> {
        if config.auth.jwt_secret.is_empty() {
            bail!("auth.jwt_secret (or PARLEY_JWT_SECRET) must be set");
        }

        if config.storage.is_memory() {
            warn!("Using in-memory storage, data is lost on restart");
            return Ok(Self::new(Arc::new(MemoryStore::new()), config));
        }

        let store = SqliteStore::connect(&config.storage.database_url, config.storage.max_connections)
            .await
            .with_context(|| format!("Failed to open storage at {}", config.storage.database_url))?;
        Ok(Self::new(Arc::new(store), config))
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("engine", &self.engine)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
