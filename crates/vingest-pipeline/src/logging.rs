//! Structured per-session stage logging.

use tracing::{error, info, warn, Span};
use vingest_models::SessionId;

/// Pipeline stage a log line belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Upload,
    Segmentation,
    Analysis,
    Playback,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Upload => "upload",
            Stage::Segmentation => "segmentation",
            Stage::Analysis => "analysis",
            Stage::Playback => "playback",
        }
    }
}

/// Logs stage lifecycle events with the session id and stage attached.
#[derive(Debug, Clone)]
pub struct SessionLogger {
    session_id: String,
    stage: Stage,
}

impl SessionLogger {
    pub fn new(session_id: &SessionId, stage: Stage) -> Self {
        Self {
            session_id: session_id.to_string(),
            stage,
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            session_id = %self.session_id,
            stage = self.stage.as_str(),
            "Stage started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            session_id = %self.session_id,
            stage = self.stage.as_str(),
            "Stage progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            session_id = %self.session_id,
            stage = self.stage.as_str(),
            "Stage warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            session_id = %self.session_id,
            stage = self.stage.as_str(),
            "Stage failed: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            session_id = %self.session_id,
            stage = self.stage.as_str(),
            "Stage completed: {}", message
        );
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "session_stage",
            session_id = %self.session_id,
            stage = self.stage.as_str()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_logger_creation() {
        let id = SessionId::from_string("s-1");
        let logger = SessionLogger::new(&id, Stage::Segmentation);
        assert_eq!(logger.session_id(), "s-1");
        assert_eq!(logger.stage().as_str(), "segmentation");
    }
}
