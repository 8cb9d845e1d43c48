//! Typed session repository.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};
use vingest_models::{IngestionSession, SessionId};

use crate::backend::{CasOutcome, SessionBackend};
use crate::config::{SessionBackendKind, SessionStoreConfig};
use crate::error::{SessionStoreError, SessionStoreResult};
use crate::memory::MemorySessionBackend;
use crate::redis_backend::RedisSessionBackend;

/// Base delay between optimistic update attempts.
const RETRY_BASE_DELAY_MS: u64 = 2;

/// Ceiling on the delay between attempts.
const RETRY_MAX_DELAY_MS: u64 = 100;

/// Full-jitter exponential backoff: a random delay up to
/// `base * 2^attempt`, capped.
fn conflict_backoff(attempt: u32) -> Duration {
    let ceiling = RETRY_BASE_DELAY_MS
        .saturating_mul(1u64 << attempt.min(16))
        .min(RETRY_MAX_DELAY_MS);
    Duration::from_millis(rand::random_range(0..=ceiling))
}

/// Typed read-modify-write access to session records.
///
/// Every write bumps the record's `version` and refreshes its expiry.
/// Concurrent writers are serialized by compare-and-set on `version`;
/// a writer that loses the race reloads and re-applies its mutation.
#[derive(Clone)]
pub struct SessionRepository {
    backend: Arc<dyn SessionBackend>,
    config: SessionStoreConfig,
}

impl SessionRepository {
    pub fn new(backend: Arc<dyn SessionBackend>, config: SessionStoreConfig) -> Self {
        Self { backend, config }
    }

    /// Build the backend named by `config`.
    pub fn from_config(config: SessionStoreConfig) -> SessionStoreResult<Self> {
        let backend: Arc<dyn SessionBackend> = match config.backend {
            SessionBackendKind::Redis => Arc::new(RedisSessionBackend::new(&config.redis_url)?),
            SessionBackendKind::Memory => Arc::new(MemorySessionBackend::new()),
        };
        Ok(Self::new(backend, config))
    }

    /// In-memory repository with default settings.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemorySessionBackend::new()),
            SessionStoreConfig::memory(),
        )
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.backend_name()
    }

    pub fn ttl(&self) -> Duration {
        self.config.ttl
    }

    fn key(&self, id: &SessionId) -> String {
        format!("{}{}", self.config.key_prefix, id)
    }

    /// Persist a new session. Fails if the id is already taken.
    pub async fn create(&self, session: &IngestionSession) -> SessionStoreResult<()> {
        let value = serde_json::to_string(session)?;
        let inserted = self
            .backend
            .insert(&self.key(&session.id), &value, self.config.ttl)
            .await?;
        if !inserted {
            return Err(SessionStoreError::AlreadyExists(session.id.to_string()));
        }
        debug!(session_id = %session.id, "Created session record");
        Ok(())
    }

    /// Load a session, `None` if unknown or expired.
    pub async fn find(&self, id: &SessionId) -> SessionStoreResult<Option<IngestionSession>> {
        match self.backend.load(&self.key(id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Load a session, failing with `NotFound` if unknown or expired.
    pub async fn get(&self, id: &SessionId) -> SessionStoreResult<IngestionSession> {
        self.find(id)
            .await?
            .ok_or_else(|| SessionStoreError::not_found(id.as_str()))
    }

    /// Apply `mutate` to the current record and persist the result atomically.
    ///
    /// `mutate` may run more than once if another writer updates the record
    /// in between; it must derive its changes from the record it is given.
    /// When it returns `Err`, nothing is written and the error is returned.
    pub async fn update<T, E, F>(&self, id: &SessionId, mut mutate: F) -> Result<(IngestionSession, T), E>
    where
        F: FnMut(&mut IngestionSession) -> Result<T, E>,
        E: From<SessionStoreError>,
    {
        let key = self.key(id);

        for attempt in 0..self.config.max_update_attempts {
            let raw = self
                .backend
                .load(&key)
                .await?
                .ok_or_else(|| SessionStoreError::not_found(id.as_str()))?;
            let mut session: IngestionSession =
                serde_json::from_str(&raw).map_err(SessionStoreError::from)?;

            let expected = session.version;
            let value = mutate(&mut session)?;
            session.version = expected + 1;

            let encoded = serde_json::to_string(&session).map_err(SessionStoreError::from)?;
            match self
                .backend
                .compare_and_set(&key, expected, &encoded, self.config.ttl)
                .await?
            {
                CasOutcome::Applied => return Ok((session, value)),
                CasOutcome::Missing => return Err(SessionStoreError::not_found(id.as_str()).into()),
                CasOutcome::VersionMismatch => {
                    debug!(
                        session_id = %id,
                        attempt = attempt + 1,
                        "Session version changed underneath update, retrying"
                    );
                    tokio::time::sleep(conflict_backoff(attempt)).await;
                }
            }
        }

        warn!(
            session_id = %id,
            attempts = self.config.max_update_attempts,
            "Session update failed after retries"
        );
        Err(SessionStoreError::Conflict(id.to_string()).into())
    }

    /// Check backend connectivity.
    pub async fn ping(&self) -> SessionStoreResult<()> {
        self.backend.ping().await
    }
}
