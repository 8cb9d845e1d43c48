//! Analysis client error types.

use thiserror::Error;

pub type AnalysisResult<T> = Result<T, AnalysisError>;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Analysis service unavailable ({status}): {body}")]
    ServiceUnavailable { status: u16, body: String },

    #[error("Analysis service rate limited")]
    RateLimited,

    #[error("Analysis request rejected ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Analysis service reported failure: {0}")]
    Failed(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AnalysisError {
    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            AnalysisError::ServiceUnavailable { .. } | AnalysisError::RateLimited => true,
            AnalysisError::Network(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(AnalysisError::RateLimited.is_retryable());
        assert!(AnalysisError::ServiceUnavailable {
            status: 503,
            body: String::new()
        }
        .is_retryable());
        assert!(!AnalysisError::Rejected {
            status: 400,
            body: String::new()
        }
        .is_retryable());
        assert!(!AnalysisError::invalid_response("not json").is_retryable());
        assert!(!AnalysisError::Failed("bad media".into()).is_retryable());
    }
}
