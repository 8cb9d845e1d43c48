//! Job types for the queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vingest_models::{JobId, SessionId};

/// Segment a fully uploaded session.
///
/// The session must already be `processing` (or `failed` during
/// processing) when the job runs; the worker does not advance the upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentSessionJob {
    pub job_id: JobId,
    pub session_id: SessionId,
    /// Chain an analysis dispatch after a successful split
    #[serde(default = "default_true")]
    pub dispatch_after: bool,
    pub created_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

impl SegmentSessionJob {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            job_id: JobId::new(),
            session_id,
            dispatch_after: true,
            created_at: Utc::now(),
        }
    }

    pub fn with_dispatch_after(mut self, dispatch_after: bool) -> Self {
        self.dispatch_after = dispatch_after;
        self
    }

    /// One segmentation per session may be in flight.
    pub fn idempotency_key(&self) -> String {
        format!("segment:{}", self.session_id)
    }
}

/// Submit a segmented session to the analysis service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchAnalysisJob {
    pub job_id: JobId,
    pub session_id: SessionId,
    pub created_at: DateTime<Utc>,
}

impl DispatchAnalysisJob {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            job_id: JobId::new(),
            session_id,
            created_at: Utc::now(),
        }
    }

    /// Dispatch is not deduplicated across calls; every request is a new
    /// submission, so the key is per job.
    pub fn idempotency_key(&self) -> String {
        format!("dispatch:{}:{}", self.session_id, self.job_id)
    }
}

/// Generic job wrapper for queue storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueJob {
    /// Split the uploaded source into segments
    SegmentSession(SegmentSessionJob),
    /// Submit segments for analysis
    DispatchAnalysis(DispatchAnalysisJob),
}

impl QueueJob {
    pub fn job_id(&self) -> &JobId {
        match self {
            QueueJob::SegmentSession(j) => &j.job_id,
            QueueJob::DispatchAnalysis(j) => &j.job_id,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        match self {
            QueueJob::SegmentSession(j) => &j.session_id,
            QueueJob::DispatchAnalysis(j) => &j.session_id,
        }
    }

    pub fn idempotency_key(&self) -> String {
        match self {
            QueueJob::SegmentSession(j) => j.idempotency_key(),
            QueueJob::DispatchAnalysis(j) => j.idempotency_key(),
        }
    }

    /// Short label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            QueueJob::SegmentSession(_) => "segment",
            QueueJob::DispatchAnalysis(_) => "dispatch",
        }
    }
}
