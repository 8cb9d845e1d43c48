//! Request and response payloads shared by the API and its clients.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::descriptor::AccessDescriptor;
use crate::session::{IngestionSession, SegmentRef, SessionId, UploadStrategy};
use crate::status::SessionStatus;

/// Upper bound on client chunk count per session.
pub const MAX_CHUNK_COUNT: u32 = 10_000;

/// Request to open an ingestion session.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct InitiateRequest {
    #[validate(length(min = 1, max = 1024, message = "fileName must not be empty"))]
    pub file_name: String,
    #[validate(range(min = 1, message = "fileSize must be positive"))]
    pub file_size: u64,
    /// Omit to upload the whole file with one credential
    #[serde(default)]
    #[validate(range(min = 1, max = 10000, message = "chunkCount must be between 1 and 10000"))]
    pub chunk_count: Option<u32>,
}

/// Response to a successful initiation.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InitiateResponse {
    pub session_id: SessionId,
    pub strategy: UploadStrategy,
    pub total_chunks: u32,
    pub credentials: Vec<AccessDescriptor>,
}

/// Outcome of a client-side chunk upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChunkOutcome {
    #[default]
    Success,
    Failed {
        #[serde(default)]
        error: Option<String>,
    },
}

impl ChunkOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ChunkOutcome::Success)
    }
}

/// Body of a chunk completion report. An empty body means success.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChunkReport {
    #[serde(default)]
    pub outcome: ChunkOutcome,
}

/// Resumable upload progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadProgress {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub total_chunks: u32,
    pub completed_chunk_indices: Vec<u32>,
    pub remaining_chunk_indices: Vec<u32>,
}

impl From<&IngestionSession> for UploadProgress {
    fn from(s: &IngestionSession) -> Self {
        Self {
            session_id: s.id.clone(),
            status: s.status,
            total_chunks: s.total_chunks,
            completed_chunk_indices: s.completed_chunk_indices.iter().copied().collect(),
            remaining_chunk_indices: s.remaining_chunks(),
        }
    }
}

/// Request to re-issue write credentials for a resumed upload.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RefreshCredentialsRequest {
    /// Defaults to every remaining index
    #[serde(default)]
    pub indices: Option<Vec<u32>>,
}

/// Full client-facing view of a session.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub session_id: SessionId,
    pub source_name: String,
    pub source_size_bytes: u64,
    pub strategy: UploadStrategy,
    pub status: SessionStatus,
    pub total_chunks: u32,
    pub completed_chunk_indices: Vec<u32>,
    pub remaining_chunk_indices: Vec<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segment_refs: Option<Vec<SegmentRef>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis_result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<SessionStatus>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&IngestionSession> for SessionView {
    fn from(s: &IngestionSession) -> Self {
        Self {
            session_id: s.id.clone(),
            source_name: s.source_name.clone(),
            source_size_bytes: s.source_size_bytes,
            strategy: s.strategy,
            status: s.status,
            total_chunks: s.total_chunks,
            completed_chunk_indices: s.completed_chunk_indices.iter().copied().collect(),
            remaining_chunk_indices: s.remaining_chunks(),
            segment_refs: s.segment_refs.clone(),
            analysis_result: s.analysis_result.clone(),
            last_error: s.last_error.clone(),
            failed_stage: s.failed_stage,
            created_at: s.created_at,
            processed_at: s.processed_at,
            completed_at: s.completed_at,
        }
    }
}
