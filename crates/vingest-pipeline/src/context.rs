//! Collaborators shared by the pipeline components.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vingest_analysis::{AnalysisService, HttpAnalysisClient};
use vingest_media::{FfmpegTranscoder, Transcoder};
use vingest_models::{IngestionSession, SessionId};
use vingest_session::{SessionRepository, SessionStoreConfig};
use vingest_storage::{
    DeliveryConfig, DeliveryUrlGenerator, MemoryObjectStore, ObjectStore, R2Client,
};

use crate::config::PipelineConfig;
use crate::error::{IngestError, IngestResult};
use crate::logging::SessionLogger;
use crate::metrics;

/// Which object store backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageBackendKind {
    #[default]
    R2,
    Memory,
}

impl StorageBackendKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "r2" | "s3" => Some(Self::R2),
            "memory" => Some(Self::Memory),
            _ => None,
        }
    }

    /// Read `STORAGE_BACKEND`, defaulting to R2.
    pub fn from_env() -> IngestResult<Self> {
        match std::env::var("STORAGE_BACKEND") {
            Ok(v) => Self::parse(&v).ok_or_else(|| {
                IngestError::invalid_request(format!("unknown STORAGE_BACKEND: {}", v))
            }),
            Err(_) => Ok(Self::default()),
        }
    }
}

/// Everything the upload, segmentation, dispatch and playback components
/// talk to.
pub struct PipelineContext {
    pub config: PipelineConfig,
    pub sessions: SessionRepository,
    pub store: Arc<dyn ObjectStore>,
    pub delivery: DeliveryUrlGenerator,
    pub transcoder: Arc<dyn Transcoder>,
    pub analysis: Arc<dyn AnalysisService>,
    /// Cancelled when the host shuts down. Stages cut short by it leave the
    /// session in its stage for the lease to expire.
    pub shutdown: CancellationToken,
}

impl PipelineContext {
    pub fn new(
        config: PipelineConfig,
        sessions: SessionRepository,
        store: Arc<dyn ObjectStore>,
        delivery_config: DeliveryConfig,
        transcoder: Arc<dyn Transcoder>,
        analysis: Arc<dyn AnalysisService>,
    ) -> Self {
        let delivery = DeliveryUrlGenerator::new(Arc::clone(&store), delivery_config);
        Self {
            config,
            sessions,
            store,
            delivery,
            transcoder,
            analysis,
            shutdown: CancellationToken::new(),
        }
    }

    /// Build every collaborator from environment variables.
    pub async fn from_env() -> IngestResult<Self> {
        let config = PipelineConfig::from_env();
        let delivery_config = DeliveryConfig::from_env();
        let session_config = SessionStoreConfig::from_env()?;

        for warning in config.warnings(session_config.ttl, delivery_config.playback_expiry) {
            warn!("Pipeline configuration: {}", warning);
        }

        let sessions = SessionRepository::from_config(session_config)?;

        let store: Arc<dyn ObjectStore> = match StorageBackendKind::from_env()? {
            StorageBackendKind::R2 => Arc::new(R2Client::from_env().await?),
            StorageBackendKind::Memory => {
                warn!("Using in-memory object store; artifacts are lost on restart");
                Arc::new(MemoryObjectStore::new("vingest"))
            }
        };

        let mut transcoder = FfmpegTranscoder::new();
        if let Some(timeout) = config.transcode_timeout {
            transcoder = transcoder.with_timeout(timeout);
        }
        let analysis = HttpAnalysisClient::from_env()?;

        info!(
            session_backend = sessions.backend_name(),
            object_store = store.backend_name(),
            transcoder = transcoder.name(),
            "Pipeline collaborators ready"
        );

        Ok(Self::new(
            config,
            sessions,
            store,
            delivery_config,
            Arc::new(transcoder),
            Arc::new(analysis),
        ))
    }

    /// Persist a failure on the session before the error reaches the caller.
    ///
    /// A failure to persist is logged; the original error is what the caller
    /// needs to see.
    pub(crate) async fn record_failure(
        &self,
        session_id: &SessionId,
        logger: &SessionLogger,
        error: &IngestError,
    ) -> Option<IngestionSession> {
        let message = error.failure_message();
        logger.log_error(&message);
        metrics::record_session_failed(logger.stage().as_str());

        match self
            .sessions
            .update(session_id, |s| s.fail(message.clone()).map_err(IngestError::from))
            .await
        {
            Ok((session, ())) => Some(session),
            Err(e) => {
                logger.log_warning(&format!("could not persist failure: {}", e));
                None
            }
        }
    }
}
