//! Server Configuration
//!
//! Loaded from the environment with per-variable defaults. Invalid values
//! fall back to the default rather than aborting startup.

use std::env;
use std::path::PathBuf;

use thiserror::Error;

/// Configuration error raised by [`Config::validate`].
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("database path must not be empty")]
    EmptyDbPath,
    #[error("HTTP and WebSocket listeners must use distinct ports (both {0})")]
    PortCollision(u16),
}

/// Broker configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP operator-plane listener port (`PORT`).
    pub http_port: u16,
    /// Device WebSocket listener port (`WS_PORT`).
    pub ws_port: u16,
    /// SQLite database path (`DB_PATH`).
    pub db_path: PathBuf,
    /// Default interval between auto-sync bursts in seconds.
    pub auto_sync_interval_sec: u64,
    /// Default number of samples per auto-sync burst.
    pub auto_sync_sample_count: usize,
    /// Default gap between samples within a burst in milliseconds.
    pub auto_sync_interval_ms: u64,
    /// Maximum inbound WebSocket frame size in bytes.
    pub max_message_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            http_port: 8080,
            ws_port: 8081,
            db_path: PathBuf::from("./time-sync.db"),
            auto_sync_interval_sec: 600,
            auto_sync_sample_count: 15,
            auto_sync_interval_ms: 200,
            max_message_size: crate::protocol::DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl Config {
    /// Loads configuration from the environment.
    pub fn from_env() -> Self {
        let defaults = Config::default();
        Config {
            http_port: env_or("PORT", defaults.http_port),
            ws_port: env_or("WS_PORT", defaults.ws_port),
            db_path: env::var("DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            auto_sync_interval_sec: env_or("AUTO_SYNC_INTERVAL_SEC", defaults.auto_sync_interval_sec),
            auto_sync_sample_count: env_or("AUTO_SYNC_SAMPLE_COUNT", defaults.auto_sync_sample_count),
            auto_sync_interval_ms: env_or("AUTO_SYNC_INTERVAL_MS", defaults.auto_sync_interval_ms),
            max_message_size: env_or("MAX_MESSAGE_SIZE", defaults.max_message_size),
        }
    }

    /// Checks the configuration for values that cannot work at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.db_path.as_os_str().is_empty() {
            return Err(ConfigError::EmptyDbPath);
        }
        if self.http_port == self.ws_port {
            return Err(ConfigError::PortCollision(self.http_port));
        }
        Ok(())
    }
}

/// Reads an environment variable, falling back to `default` when the
/// variable is unset or fails to parse.
fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
