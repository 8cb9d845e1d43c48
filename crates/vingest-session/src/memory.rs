//! In-process session backend with per-key expiry.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::backend::{CasOutcome, SessionBackend};
use crate::error::SessionStoreResult;

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct VersionProbe {
    #[serde(default)]
    version: u64,
}

/// Session records kept in a mutex-guarded map.
#[derive(Debug, Default)]
pub struct MemorySessionBackend {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemorySessionBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) records.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .await
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn live<'a>(entries: &'a mut HashMap<String, Entry>, key: &str) -> Option<&'a mut Entry> {
    let now = Instant::now();
    if entries.get(key).is_some_and(|e| e.expires_at <= now) {
        entries.remove(key);
    }
    entries.get_mut(key)
}

#[async_trait]
impl SessionBackend for MemorySessionBackend {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn load(&self, key: &str) -> SessionStoreResult<Option<String>> {
        let mut entries = self.entries.lock().await;
        Ok(live(&mut entries, key).map(|e| e.value.clone()))
    }

    async fn insert(&self, key: &str, value: &str, ttl: Duration) -> SessionStoreResult<bool> {
        let mut entries = self.entries.lock().await;
        // New sessions are the only growth path; drop abandoned ones here.
        let now = Instant::now();
        entries.retain(|_, e| e.expires_at > now);
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(true)
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected_version: u64,
        value: &str,
        ttl: Duration,
    ) -> SessionStoreResult<CasOutcome> {
        let mut entries = self.entries.lock().await;
        let Some(entry) = live(&mut entries, key) else {
            return Ok(CasOutcome::Missing);
        };
        let current: VersionProbe = serde_json::from_str(&entry.value)?;
        if current.version != expected_version {
            return Ok(CasOutcome::VersionMismatch);
        }
        entry.value = value.to_string();
        entry.expires_at = Instant::now() + ttl;
        Ok(CasOutcome::Applied)
    }

    async fn ping(&self) -> SessionStoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_insert_is_exclusive() {
        let backend = MemorySessionBackend::new();
        assert!(backend.insert("k", r#"{"version":0}"#, TTL).await.unwrap());
        assert!(!backend.insert("k", r#"{"version":5}"#, TTL).await.unwrap());
        assert_eq!(backend.load("k").await.unwrap().unwrap(), r#"{"version":0}"#);
    }

    #[tokio::test]
    async fn test_compare_and_set_outcomes() {
        let backend = MemorySessionBackend::new();
        assert_eq!(
            backend.compare_and_set("k", 0, "{}", TTL).await.unwrap(),
            CasOutcome::Missing
        );
        backend.insert("k", r#"{"version":3}"#, TTL).await.unwrap();
        assert_eq!(
            backend.compare_and_set("k", 2, r#"{"version":4}"#, TTL).await.unwrap(),
            CasOutcome::VersionMismatch
        );
        assert_eq!(
            backend.compare_and_set("k", 3, r#"{"version":4}"#, TTL).await.unwrap(),
            CasOutcome::Applied
        );
        assert_eq!(backend.load("k").await.unwrap().unwrap(), r#"{"version":4}"#);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_and_refresh() {
        let backend = MemorySessionBackend::new();
        backend.insert("k", r#"{"version":0}"#, TTL).await.unwrap();

        tokio::time::advance(Duration::from_secs(45)).await;
        // A write pushes expiry out by a full TTL.
        backend
            .compare_and_set("k", 0, r#"{"version":1}"#, TTL)
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(45)).await;
        assert!(backend.load("k").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(16)).await;
        assert!(backend.load("k").await.unwrap().is_none());
        assert!(backend.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_insert_sweeps_expired_records() {
        let backend = MemorySessionBackend::new();
        backend.insert("abandoned-1", r#"{"version":0}"#, TTL).await.unwrap();
        backend.insert("abandoned-2", r#"{"version":0}"#, TTL).await.unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;
        backend.insert("fresh", r#"{"version":0}"#, TTL).await.unwrap();

        let entries = backend.entries.lock().await;
        assert_eq!(entries.len(), 1);
        assert!(entries.contains_key("fresh"));
    }
}
