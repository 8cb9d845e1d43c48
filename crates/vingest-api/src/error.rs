//! API error types and the failure envelope.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use vingest_pipeline::{ErrorKind, IngestError};
use vingest_queue::QueueError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Machine-usable kind carried in the failure envelope.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Ingest(e) => e.kind(),
            ApiError::BadRequest(_) => ErrorKind::InvalidRequest,
            ApiError::NotFound(_) => ErrorKind::NotFound,
            ApiError::Queue(_) | ApiError::Internal(_) => ErrorKind::ExternalFailure,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        if matches!(self, ApiError::Internal(_)) {
            return StatusCode::INTERNAL_SERVER_ERROR;
        }
        match self.kind() {
            ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::NotReady => StatusCode::CONFLICT,
            ErrorKind::ExternalFailure => StatusCode::BAD_GATEWAY,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    kind: ErrorKind,
    message: String,
    retryable: bool,
}

#[derive(Serialize)]
struct ErrorEnvelope {
    ok: bool,
    error: ErrorBody,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let kind = self.kind();

        // Don't expose internal error details in production
        let message = match &self {
            ApiError::Internal(_)
                if std::env::var("ENVIRONMENT").unwrap_or_default() == "production" =>
            {
                "An internal error occurred".to_string()
            }
            _ => self.to_string(),
        };

        let body = ErrorEnvelope {
            ok: false,
            error: ErrorBody {
                kind,
                message,
                retryable: kind.is_retryable(),
            },
        };

        (status, Json(body)).into_response()
    }
}
