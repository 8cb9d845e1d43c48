//! Pipeline error types.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use vingest_analysis::AnalysisError;
use vingest_media::MediaError;
use vingest_models::TransitionError;
use vingest_session::SessionStoreError;
use vingest_storage::StorageError;

pub type IngestResult<T> = Result<T, IngestError>;

/// Machine-usable error classification returned to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad or missing input; not retryable
    InvalidRequest,
    /// Unknown or expired session; the client must restart
    NotFound,
    /// Valid session in the wrong state; retry after waiting
    NotReady,
    /// Object store, transcoder, session store or analysis failure
    ExternalFailure,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::NotFound => "not_found",
            ErrorKind::NotReady => "not_ready",
            ErrorKind::ExternalFailure => "external_failure",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::NotReady | ErrorKind::ExternalFailure)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Not ready: {0}")]
    NotReady(String),

    #[error("Session store error: {0}")]
    SessionStore(SessionStoreError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Transcoder error: {0}")]
    Media(#[from] MediaError),

    #[error("Analysis error: {0}")]
    Analysis(#[from] AnalysisError),

    #[error("{0}")]
    External(String),

    /// The host shut down mid-stage. Nothing is recorded on the session;
    /// the stage lease expires and the stage can be re-entered.
    #[error("Interrupted: {0}")]
    Interrupted(String),
}

impl IngestError {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound(id.into())
    }

    pub fn not_ready(msg: impl Into<String>) -> Self {
        Self::NotReady(msg.into())
    }

    pub fn external(msg: impl Into<String>) -> Self {
        Self::External(msg.into())
    }

    pub fn interrupted(msg: impl Into<String>) -> Self {
        Self::Interrupted(msg.into())
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, IngestError::Interrupted(_))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            IngestError::NotFound(_) => ErrorKind::NotFound,
            IngestError::NotReady(_) => ErrorKind::NotReady,
            IngestError::SessionStore(_)
            | IngestError::Storage(_)
            | IngestError::Media(_)
            | IngestError::Analysis(_)
            | IngestError::External(_)
            | IngestError::Interrupted(_) => ErrorKind::ExternalFailure,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Message persisted to `lastError`. Transcoder failures carry their
    /// stderr tail.
    pub fn failure_message(&self) -> String {
        match self {
            IngestError::Media(e) => format!("Transcoder error: {}", e.detailed_message()),
            other => other.to_string(),
        }
    }
}

impl From<SessionStoreError> for IngestError {
    fn from(e: SessionStoreError) -> Self {
        match e {
            SessionStoreError::NotFound(id) => IngestError::NotFound(id),
            other => IngestError::SessionStore(other),
        }
    }
}

impl From<TransitionError> for IngestError {
    fn from(e: TransitionError) -> Self {
        if e.is_invalid_input() {
            IngestError::InvalidRequest(e.to_string())
        } else {
            IngestError::NotReady(e.to_string())
        }
    }
}
