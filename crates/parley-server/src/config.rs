//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (PARLEY_*)
//! - TOML configuration file

use anyhow::{Context, Result};
use parley_core::NotifyPolicy;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Storage URL that selects the in-memory store.
pub const MEMORY_STORAGE: &str = "memory";

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Token verification.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Push notification.
    #[serde(default)]
    pub push: PushConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum socket message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Maximum rooms a single session may join.
    #[serde(default = "default_max_rooms_per_session")]
    pub max_rooms_per_session: usize,

    /// Broadcast capacity of each room channel.
    #[serde(default = "default_room_channel_capacity")]
    pub room_channel_capacity: usize,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// `memory` or a SQLite URL such as `sqlite://parley.db`.
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Connection pool size.
    #[serde(default = "default_db_connections")]
    pub max_connections: u32,
}

/// Token verification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HS256 secret shared with the auth service.
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,

    /// Lifetime of tokens minted by this server.
    #[serde(default = "default_token_ttl_hours")]
    pub token_ttl_hours: u64,
}

/// Push notification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    /// Enable push notification.
    #[serde(default = "default_push_enabled")]
    pub enabled: bool,

    /// Per-attempt delivery timeout in milliseconds.
    #[serde(default = "default_push_timeout")]
    pub timeout_ms: u64,

    /// How long the push service keeps an undelivered notification.
    #[serde(default = "default_push_ttl")]
    pub ttl_seconds: u32,

    /// Which members get notified.
    #[serde(default = "default_push_policy")]
    pub policy: NotifyPolicy,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("PARLEY_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    env_parse("PARLEY_PORT").unwrap_or(5000)
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_max_rooms_per_session() -> usize {
    100
}

fn default_room_channel_capacity() -> usize {
    1024
}

fn default_database_url() -> String {
    std::env::var("PARLEY_DATABASE_URL").unwrap_or_else(|_| MEMORY_STORAGE.to_string())
}

fn default_db_connections() -> u32 {
    5
}

fn default_jwt_secret() -> String {
    std::env::var("PARLEY_JWT_SECRET").unwrap_or_default()
}

fn default_token_ttl_hours() -> u64 {
    24 * 7
}

fn default_push_enabled() -> bool {
    env_parse("PARLEY_PUSH_ENABLED").unwrap_or(false)
}

fn default_push_timeout() -> u64 {
    5_000 // 5 seconds
}

fn default_push_ttl() -> u32 {
    60 * 60 * 24
}

fn default_push_policy() -> NotifyPolicy {
    std::env::var("PARLEY_PUSH_POLICY")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or_default()
}

fn default_metrics_port() -> u16 {
    9090
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            storage: StorageConfig::default(),
            auth: AuthConfig::default(),
            push: PushConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            max_rooms_per_session: default_max_rooms_per_session(),
            room_channel_capacity: default_room_channel_capacity(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            max_connections: default_db_connections(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
            token_ttl_hours: default_token_ttl_hours(),
        }
    }
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            enabled: default_push_enabled(),
            timeout_ms: default_push_timeout(),
            ttl_seconds: default_push_ttl(),
            policy: default_push_policy(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl StorageConfig {
    /// Whether the in-memory store is selected.
    #[must_use]
    pub fn is_memory(&self) -> bool {
        self.database_url.eq_ignore_ascii_case(MEMORY_STORAGE)
    }
}

impl AuthConfig {
    #[must_use]
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_hours * 60 * 60)
    }
}

impl PushConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        if let Ok(path) = std::env::var("PARLEY_CONFIG") {
            return Self::from_file(shellexpand::tilde(&path).as_ref());
        }

        let config_paths = [
            "parley.toml",
            "/etc/parley/parley.toml",
            "~/.config/parley/parley.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid host:port {}:{}", self.host, self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.transport.websocket_path, "/ws");
        assert_eq!(config.limits.max_rooms_per_session, 100);
        assert_eq!(config.push.timeout(), Duration::from_secs(5));
        assert!(config.metrics.enabled);
    }

    #[test]
    fn test_config_bind_addr() {
        let config = Config {
            host: "127.0.0.1".into(),
            port: 5000,
            ..Config::default()
        };
        assert_eq!(config.bind_addr().unwrap().port(), 5000);

        let bad = Config {
            host: "not a host".into(),
            ..Config::default()
        };
        assert!(bad.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [limits]
            max_rooms_per_session = 8

            [storage]
            database_url = "sqlite://parley.db"

            [push]
            enabled = true
            policy = "offline_only"
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.limits.max_rooms_per_session, 8);
        assert_eq!(config.limits.max_message_size, 64 * 1024);
        assert!(!config.storage.is_memory());
        assert!(config.push.enabled);
        assert_eq!(config.push.policy, NotifyPolicy::OfflineOnly);
    }

    #[test]
    fn test_memory_storage() {
        let storage = StorageConfig {
            database_url: "MEMORY".into(),
            max_connections: 1,
        };
        assert!(storage.is_memory());
    }
}
