//! Session status and legal transitions.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Lifecycle stage of an ingestion session.
///
/// ```text
/// uploading -> processing -> chunked -> analyzing -> completed
///      \____________\___________\__________\______-> failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Client is uploading chunks
    #[default]
    Uploading,
    /// Source is fully uploaded and being segmented
    Processing,
    /// Segments are stored and referenced on the session
    Chunked,
    /// Batch analysis request is in flight
    Analyzing,
    /// Analysis result stored
    Completed,
    /// A stage failed; `last_error` holds the cause
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Uploading => "uploading",
            SessionStatus::Processing => "processing",
            SessionStatus::Chunked => "chunked",
            SessionStatus::Analyzing => "analyzing",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }

    /// Terminal states receive no further automatic transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }

    /// Whether segment references must be present in this state.
    pub fn requires_segments(&self) -> bool {
        matches!(
            self,
            SessionStatus::Chunked | SessionStatus::Analyzing | SessionStatus::Completed
        )
    }

    /// Forward transitions of the state machine.
    ///
    /// `failed` is reachable from every non-terminal state, and re-entering
    /// `failed` is allowed (it only overwrites the error). Resuming out of
    /// `failed` is not a plain transition; see
    /// [`IngestionSession::begin_processing`](crate::IngestionSession::begin_processing)
    /// and [`IngestionSession::begin_analysis`](crate::IngestionSession::begin_analysis).
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        match (*self, next) {
            (Uploading, Processing)
            | (Processing, Chunked)
            | (Chunked, Analyzing)
            | (Analyzing, Completed) => true,
            (Failed, Failed) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploading" => Ok(SessionStatus::Uploading),
            "processing" => Ok(SessionStatus::Processing),
            "chunked" => Ok(SessionStatus::Chunked),
            "analyzing" => Ok(SessionStatus::Analyzing),
            "completed" => Ok(SessionStatus::Completed),
            "failed" => Ok(SessionStatus::Failed),
            other => Err(format!("unknown session status: {}", other)),
        }
    }
}

/// A mutation the session state machine refused.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransitionError {
    #[error("Cannot move session from {from} to {to}")]
    Illegal {
        from: SessionStatus,
        to: SessionStatus,
    },

    #[error("Chunk index {index} is outside [0, {total})")]
    ChunkOutOfRange { index: u32, total: u32 },

    #[error("Upload incomplete: {remaining} chunk(s) outstanding")]
    IncompleteUpload { remaining: usize },

    #[error("Session has no segment references")]
    MissingSegments,

    #[error("Invalid segment list: {0}")]
    InvalidSegments(String),
}

impl TransitionError {
    /// Errors caused by bad caller input rather than session state.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            TransitionError::ChunkOutOfRange { .. } | TransitionError::InvalidSegments(_)
        )
    }
}
