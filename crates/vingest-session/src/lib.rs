//! Session store adapter.
//!
//! Persists [`IngestionSession`](vingest_models::IngestionSession) records in
//! a key-value store with per-key expiry, refreshed on every write.
//! Concurrent mutations use optimistic versioning.

pub mod backend;
pub mod config;
pub mod error;
pub mod memory;
pub mod redis_backend;
pub mod repository;

pub use backend::{CasOutcome, SessionBackend};
pub use config::{SessionBackendKind, SessionStoreConfig};
pub use error::{SessionStoreError, SessionStoreResult};
pub use memory::MemorySessionBackend;
pub use redis_backend::RedisSessionBackend;
pub use repository::SessionRepository;
