//! Object store collaborator for the ingestion pipeline.
//!
//! This crate provides:
//! - The [`ObjectStore`] trait the pipeline talks to
//! - A Cloudflare R2 (S3 API) backend and an in-memory backend
//! - Per-session key layout
//! - Time-limited access descriptors (presigned or HMAC-signed CDN URLs)

pub mod client;
pub mod delivery;
pub mod error;
pub mod keys;
pub mod memory;
pub mod store;

pub use client::{R2Client, R2Config};
pub use delivery::{DeliveryConfig, DeliveryScope, DeliveryToken, DeliveryUrlGenerator};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryObjectStore;
pub use store::ObjectStore;
