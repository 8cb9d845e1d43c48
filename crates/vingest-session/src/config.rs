//! Session store configuration.

use std::time::Duration;

use crate::error::{SessionStoreError, SessionStoreResult};

/// Default session TTL (24 hours).
pub const DEFAULT_SESSION_TTL_SECS: u64 = 86400;

/// Default optimistic update attempts. Backoff is capped, so this bounds a
/// contended update to a few seconds.
pub const DEFAULT_MAX_UPDATE_ATTEMPTS: u32 = 256;

/// Default key prefix for session records.
pub const DEFAULT_KEY_PREFIX: &str = "vingest:session:";

/// Which backend holds session records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionBackendKind {
    Redis,
    Memory,
}

impl SessionBackendKind {
    pub fn parse(s: &str) -> SessionStoreResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            other => Err(SessionStoreError::config_error(format!(
                "unknown SESSION_BACKEND: {}",
                other
            ))),
        }
    }
}

/// Session store configuration.
#[derive(Debug, Clone)]
pub struct SessionStoreConfig {
    pub backend: SessionBackendKind,
    pub redis_url: String,
    /// Expiry applied on every write
    pub ttl: Duration,
    pub key_prefix: String,
    /// Optimistic update attempts before giving up with `Conflict`
    pub max_update_attempts: u32,
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        Self {
            backend: SessionBackendKind::Redis,
            redis_url: "redis://localhost:6379".to_string(),
            ttl: Duration::from_secs(DEFAULT_SESSION_TTL_SECS),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            max_update_attempts: DEFAULT_MAX_UPDATE_ATTEMPTS,
        }
    }
}

impl SessionStoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> SessionStoreResult<Self> {
        let backend = match std::env::var("SESSION_BACKEND") {
            Ok(v) => SessionBackendKind::parse(&v)?,
            Err(_) => SessionBackendKind::Redis,
        };

        Ok(Self {
            backend,
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            ttl: Duration::from_secs(
                std::env::var("SESSION_TTL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .filter(|s| *s > 0)
                    .unwrap_or(DEFAULT_SESSION_TTL_SECS),
            ),
            key_prefix: std::env::var("SESSION_KEY_PREFIX")
                .unwrap_or_else(|_| DEFAULT_KEY_PREFIX.to_string()),
            max_update_attempts: std::env::var("SESSION_MAX_UPDATE_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_MAX_UPDATE_ATTEMPTS),
        })
    }

    /// In-memory backend with defaults, for tests and local runs.
    pub fn memory() -> Self {
        Self {
            backend: SessionBackendKind::Memory,
            ..Default::default()
        }
    }
}
