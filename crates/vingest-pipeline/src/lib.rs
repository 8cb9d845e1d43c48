//! Resumable ingestion and segmentation pipeline.
//!
//! This crate provides:
//! - [`UploadCoordinator`]: session initiation, chunk bookkeeping, resume
//! - [`SegmentationEngine`]: transcoder-driven splitting and segment upload
//! - [`AnalysisDispatcher`]: batch submission to the analysis service
//! - [`PlaybackResolver`]: time-limited read descriptors
//! - [`IngestPipeline`]: the facade with a bounded segmentation pool
//!
//! Every component mutates sessions only through the state machine on
//! [`IngestionSession`](vingest_models::IngestionSession), persisted by
//! [`SessionRepository`](vingest_session::SessionRepository).

pub mod config;
pub mod context;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
mod lease;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod playback;
pub mod retry;
pub mod segmentation;

pub use config::{AnalysisPayload, PipelineConfig, PlaybackMode, SegmentationMode};
pub use context::{PipelineContext, StorageBackendKind};
pub use coordinator::{UploadCompletion, UploadCoordinator};
pub use dispatcher::{AnalysisDispatcher, CANCELLED_MESSAGE};
pub use error::{ErrorKind, IngestError, IngestResult};
pub use logging::{SessionLogger, Stage};
pub use pipeline::IngestPipeline;
pub use playback::PlaybackResolver;
pub use segmentation::SegmentationEngine;
