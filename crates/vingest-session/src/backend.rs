//! Key-value backends holding serialized session records.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::SessionStoreResult;

/// Result of a versioned write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// Value written and expiry refreshed.
    Applied,
    /// Stored record carries a different version.
    VersionMismatch,
    /// Key is absent (never created or expired).
    Missing,
}

/// Low-level session store.
///
/// Values are whole serialized records with a top-level `version` field.
/// Every write sets the key's expiry to `ttl`.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    fn backend_name(&self) -> &'static str;

    async fn load(&self, key: &str) -> SessionStoreResult<Option<String>>;

    /// Write only if the key does not exist. Returns `false` when it does.
    async fn insert(&self, key: &str, value: &str, ttl: Duration) -> SessionStoreResult<bool>;

    /// Write only if the stored record's `version` equals `expected_version`.
    async fn compare_and_set(
        &self,
        key: &str,
        expected_version: u64,
        value: &str,
        ttl: Duration,
    ) -> SessionStoreResult<CasOutcome>;

    async fn ping(&self) -> SessionStoreResult<()>;
}
