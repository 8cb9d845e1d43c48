//! Ingestion session record and its state machine.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::status::{SessionStatus, TransitionError};

/// Unique identifier for an ingestion session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Generate a new random session ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// How the client delivers the source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum UploadStrategy {
    /// One write credential for the whole file; chunk 0 is the file.
    #[default]
    SingleFile,
    /// One write credential per client chunk.
    Chunked,
}

impl UploadStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStrategy::SingleFile => "single_file",
            UploadStrategy::Chunked => "chunked",
        }
    }
}

impl fmt::Display for UploadStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Storage reference to one produced segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SegmentRef {
    /// Logical position, 0-based
    pub index: u32,
    /// Object store key
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

impl SegmentRef {
    pub fn new(index: u32, key: impl Into<String>) -> Self {
        Self {
            index,
            key: key.into(),
            duration_secs: None,
            size_bytes: None,
        }
    }

    pub fn with_duration(mut self, secs: f64) -> Self {
        self.duration_secs = Some(secs);
        self
    }

    pub fn with_size(mut self, bytes: u64) -> Self {
        self.size_bytes = Some(bytes);
        self
    }
}

/// One uploaded media item tracked through its full ingestion lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IngestionSession {
    pub id: SessionId,
    pub source_name: String,
    pub source_size_bytes: u64,
    #[serde(default)]
    pub strategy: UploadStrategy,
    #[serde(default)]
    pub status: SessionStatus,
    pub total_chunks: u32,
    #[serde(default)]
    pub completed_chunk_indices: BTreeSet<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_refs: Option<Vec<SegmentRef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Status the session was in when it last failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<SessionStatus>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Optimistic concurrency version, bumped on every persisted write
    #[serde(default)]
    pub version: u64,
}

impl IngestionSession {
    /// Create a new session in `uploading`.
    ///
    /// `chunk_count = None` selects the single-file strategy with one chunk
    /// standing for the whole file.
    pub fn new(source_name: impl Into<String>, source_size_bytes: u64, chunk_count: Option<u32>) -> Self {
        let now = Utc::now();
        let (strategy, total_chunks) = match chunk_count {
            Some(n) => (UploadStrategy::Chunked, n),
            None => (UploadStrategy::SingleFile, 1),
        };
        Self {
            id: SessionId::new(),
            source_name: source_name.into(),
            source_size_bytes,
            strategy,
            status: SessionStatus::Uploading,
            total_chunks,
            completed_chunk_indices: BTreeSet::new(),
            segment_refs: None,
            analysis_result: None,
            last_error: None,
            failed_stage: None,
            created_at: now,
            updated_at: now,
            processed_at: None,
            completed_at: None,
            version: 0,
        }
    }

    /// Record a completed chunk.
    ///
    /// Returns `Ok(true)` when the index was newly added and `Ok(false)` when
    /// it was already present. Duplicates are accepted in any state; new
    /// indices only while uploading.
    pub fn record_chunk(&mut self, index: u32) -> Result<bool, TransitionError> {
        if index >= self.total_chunks {
            return Err(TransitionError::ChunkOutOfRange {
                index,
                total: self.total_chunks,
            });
        }
        if self.completed_chunk_indices.contains(&index) {
            return Ok(false);
        }
        if self.status != SessionStatus::Uploading {
            return Err(TransitionError::Illegal {
                from: self.status,
                to: SessionStatus::Uploading,
            });
        }
        self.completed_chunk_indices.insert(index);
        self.touch();
        Ok(true)
    }

    /// Chunk indices not yet recorded, ascending.
    pub fn remaining_chunks(&self) -> Vec<u32> {
        (0..self.total_chunks)
            .filter(|i| !self.completed_chunk_indices.contains(i))
            .collect()
    }

    pub fn is_upload_complete(&self) -> bool {
        self.completed_chunk_indices.len() as u64 == self.total_chunks as u64
    }

    pub fn has_segments(&self) -> bool {
        self.segment_refs.as_ref().is_some_and(|r| !r.is_empty())
    }

    /// Enter `processing`, either from a fully uploaded session or as a
    /// resume of a segmentation that previously failed.
    pub fn begin_processing(&mut self) -> Result<(), TransitionError> {
        match self.status {
            SessionStatus::Uploading => {
                let remaining = self.remaining_chunks().len();
                if remaining > 0 {
                    return Err(TransitionError::IncompleteUpload { remaining });
                }
            }
            SessionStatus::Failed
                if self.failed_stage == Some(SessionStatus::Processing) && !self.has_segments() => {}
            from => {
                return Err(TransitionError::Illegal {
                    from,
                    to: SessionStatus::Processing,
                })
            }
        }
        self.status = SessionStatus::Processing;
        self.last_error = None;
        self.failed_stage = None;
        self.touch();
        Ok(())
    }

    /// Publish the full segment list and enter `chunked`.
    ///
    /// The list must be non-empty and ordered with indices `0..n`.
    pub fn mark_chunked(&mut self, refs: Vec<SegmentRef>) -> Result<(), TransitionError> {
        self.ensure_transition(SessionStatus::Chunked)?;
        if refs.is_empty() {
            return Err(TransitionError::MissingSegments);
        }
        if let Some((pos, r)) = refs
            .iter()
            .enumerate()
            .find(|(pos, r)| r.index as usize != *pos)
        {
            return Err(TransitionError::InvalidSegments(format!(
                "segment at position {} has index {}",
                pos, r.index
            )));
        }
        let now = Utc::now();
        self.segment_refs = Some(refs);
        self.status = SessionStatus::Chunked;
        self.processed_at.get_or_insert(now);
        self.touch();
        Ok(())
    }

    /// Enter `analyzing` from `chunked`, or resume a failed session that
    /// still carries its segments.
    pub fn begin_analysis(&mut self) -> Result<(), TransitionError> {
        match self.status {
            SessionStatus::Chunked => {}
            SessionStatus::Failed if self.has_segments() => {}
            SessionStatus::Failed => return Err(TransitionError::MissingSegments),
            from => {
                return Err(TransitionError::Illegal {
                    from,
                    to: SessionStatus::Analyzing,
                })
            }
        }
        if !self.has_segments() {
            return Err(TransitionError::MissingSegments);
        }
        self.status = SessionStatus::Analyzing;
        self.last_error = None;
        self.failed_stage = None;
        self.touch();
        Ok(())
    }

    /// Store the analysis result and enter `completed`.
    pub fn complete(&mut self, result: serde_json::Value) -> Result<(), TransitionError> {
        self.ensure_transition(SessionStatus::Completed)?;
        let now = Utc::now();
        self.analysis_result = Some(result);
        self.status = SessionStatus::Completed;
        self.completed_at.get_or_insert(now);
        self.touch();
        Ok(())
    }

    /// Move to `failed`, recording the cause.
    ///
    /// Re-failing a failed session only overwrites `last_error`. Segment
    /// references survive so that analysis can be re-dispatched.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), TransitionError> {
        self.ensure_transition(SessionStatus::Failed)?;
        if self.status != SessionStatus::Failed {
            self.failed_stage = Some(self.status);
        }
        self.status = SessionStatus::Failed;
        self.last_error = Some(message.into());
        self.touch();
        Ok(())
    }

    /// Whether a running stage (`processing` or `analyzing`) has gone longer
    /// than `lease` without a write.
    pub fn stage_lease_expired(&self, now: DateTime<Utc>, lease: Duration) -> bool {
        matches!(self.status, SessionStatus::Processing | SessionStatus::Analyzing)
            && (now - self.updated_at).to_std().is_ok_and(|idle| idle > lease)
    }

    /// Extend the lease on `stage`. Returns false, changing nothing, once the
    /// session has left that stage.
    pub fn renew_stage(&mut self, stage: SessionStatus) -> bool {
        if self.status != stage {
            return false;
        }
        self.touch();
        true
    }

    /// Fail a running stage whose lease ran out, so the resume rules for
    /// failed sessions apply to it. Returns true when the stage was expired.
    pub fn expire_stale_stage(&mut self, now: DateTime<Utc>, lease: Duration) -> bool {
        if !self.stage_lease_expired(now, lease) {
            return false;
        }
        let message = format!(
            "{} stage abandoned: no progress for over {}s",
            self.status,
            lease.as_secs()
        );
        self.fail(message).is_ok()
    }

    /// Check the record-level invariants; returns a description of each
    /// violation found.
    pub fn invariant_violations(&self) -> Vec<String> {
        let mut violations = Vec::new();

        if self.completed_chunk_indices.len() as u64 > self.total_chunks as u64 {
            violations.push("more completed chunks than total".to_string());
        }
        if let Some(max) = self.completed_chunk_indices.iter().next_back() {
            if *max >= self.total_chunks {
                violations.push(format!("chunk index {} out of range", max));
            }
        }

        if self.status.requires_segments() && !self.has_segments() {
            violations.push(format!("status {} without segment refs", self.status));
        }
        let segments_allowed = self.status.requires_segments()
            || (self.status == SessionStatus::Failed && self.failed_stage.is_some_and(|s| s.requires_segments()));
        if self.segment_refs.is_some() && !segments_allowed {
            violations.push(format!("segment refs present in status {}", self.status));
        }

        if (self.status == SessionStatus::Completed) != self.analysis_result.is_some() {
            violations.push("analysis result must be set exactly when completed".to_string());
        }
        if (self.status == SessionStatus::Failed) != self.last_error.is_some() {
            violations.push("last error must be set exactly when failed".to_string());
        }

        if let Some(processed) = self.processed_at {
            if processed < self.created_at {
                violations.push("processed_at precedes created_at".to_string());
            }
            if let Some(completed) = self.completed_at {
                if completed < processed {
                    violations.push("completed_at precedes processed_at".to_string());
                }
            }
        }

        violations
    }

    fn ensure_transition(&self, to: SessionStatus) -> Result<(), TransitionError> {
        if self.status.can_transition_to(to) {
            Ok(())
        } else {
            Err(TransitionError::Illegal {
                from: self.status,
                to,
            })
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
