//! Shared data models for the vingest ingestion pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Ingestion sessions and their state machine
//! - Segment references and access descriptors
//! - Queue job identifiers
//! - HTTP request/response payloads

pub mod descriptor;
pub mod job;
pub mod requests;
pub mod session;
pub mod status;

// Re-export common types
pub use descriptor::{AccessDescriptor, AccessMethod, ArtifactRole, PlaybackDescriptor, PlaybackSource};
pub use job::JobId;
pub use requests::{
    ChunkOutcome, ChunkReport, InitiateRequest, InitiateResponse, RefreshCredentialsRequest,
    SessionView, UploadProgress,
};
pub use session::{IngestionSession, SegmentRef, SessionId, UploadStrategy};
pub use status::{SessionStatus, TransitionError};
