//! Object store abstraction.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::StorageResult;

/// Durable blob storage reachable by key and by time-limited signed URLs.
///
/// Writes are idempotent overwrites, so re-issuing a write credential for a
/// key that was already uploaded is safe.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Short backend name for logs and readiness output.
    fn backend_name(&self) -> &'static str;

    /// Time-limited write credential for `key`.
    async fn presign_put(
        &self,
        key: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> StorageResult<String>;

    /// Time-limited read credential for `key`.
    async fn presign_get(&self, key: &str, expires_in: Duration) -> StorageResult<String>;

    /// Upload a local file, returning its size in bytes.
    async fn put_file(&self, path: &Path, key: &str, content_type: &str) -> StorageResult<u64>;

    async fn put_bytes(&self, data: Vec<u8>, key: &str, content_type: &str) -> StorageResult<()>;

    /// Fetch an object into memory. Fails with `NotFound` for missing keys.
    async fn get_bytes(&self, key: &str) -> StorageResult<Vec<u8>>;

    /// Fetch an object to a local file, returning bytes written.
    async fn get_to_file(&self, key: &str, path: &Path) -> StorageResult<u64>;

    async fn exists(&self, key: &str) -> StorageResult<bool>;

    async fn delete(&self, key: &str) -> StorageResult<()>;

    async fn check_connectivity(&self) -> StorageResult<()>;
}
