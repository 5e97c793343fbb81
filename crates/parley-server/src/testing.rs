//! Shared fixtures for server tests.

use axum::Router;
use parley_core::store::UserStore;
use parley_core::{Engine, MemoryStore, NewRoom, User};
use parley_protocol::{RoomId, RoomKind};
use std::sync::Arc;
use std::time::Duration;

use crate::auth::JwtVerifier;
use crate::config::{AuthConfig, Config, PushConfig, StorageConfig, MEMORY_STORAGE};
use crate::server;
use crate::state::AppState;

const SECRET: &str = "test-secret";

pub(crate) fn test_config() -> Config {
    Config {
        host: "127.0.0.1".into(),
        port: 0,
        storage: StorageConfig {
            database_url: MEMORY_STORAGE.into(),
            max_connections: 1,
        },
        auth: AuthConfig {
            jwt_secret: SECRET.into(),
            token_ttl_hours: 1,
        },
        push: PushConfig {
            enabled: false,
            ..PushConfig::default()
        },
        ..Config::default()
    }
}

/// An app over an in-memory store, plus a token minter.
pub(crate) struct TestApp {
    pub state: AppState,
    store: Arc<MemoryStore>,
    tokens: JwtVerifier,
}

impl TestApp {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let state = AppState::new(store.clone(), test_config());
        let tokens = JwtVerifier::new(SECRET, Duration::from_secs(3600), store.clone());
        Self {
            state,
            store,
            tokens,
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.state.engine
    }

    pub fn router(&self) -> Router {
        server::router(self.state.clone())
    }

    pub async fn user(&self, name: &str, email: &str) -> User {
        let user = User::new(name, email);
        self.store.upsert_user(&user).await.unwrap();
        user
    }

    pub fn token(&self, user: &User) -> String {
        self.tokens.issue(user.id).unwrap()
    }

    pub async fn direct_room(&self, a: &User, b: &User) -> RoomId {
        let created = self
            .engine()
            .create_room(
                a.id,
                NewRoom {
                    kind: Some(RoomKind::Direct),
                    member_ids: vec![b.id],
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        created.room.id
    }
}
