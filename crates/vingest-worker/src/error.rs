//! Worker error types.

use thiserror::Error;
use vingest_pipeline::IngestError;
use vingest_queue::QueueError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

impl WorkerError {
    pub fn job_failed(msg: impl Into<String>) -> Self {
        Self::JobFailed(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Whether redelivering the job can help.
    ///
    /// Pipeline failures are already recorded on the session, which is
    /// `failed` until a client re-invokes the stage, so redelivery would
    /// only hit a wrong-state error. Worth another attempt: failures before
    /// the session was touched (session store unreachable, queue trouble)
    /// and stages interrupted by shutdown, which stay in their stage until
    /// the lease runs out.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Ingest(IngestError::SessionStore(e)) => e.is_retryable(),
            WorkerError::Ingest(IngestError::Interrupted(_)) => true,
            WorkerError::Queue(_) => true,
            _ => false,
        }
    }
}
