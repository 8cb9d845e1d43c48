//! Upload Coordinator.
//!
//! Issues write credentials, records chunk completion and reports the
//! resumable remainder. Both upload strategies end in the same state
//! machine: a single-file session is simply one chunk covering the whole
//! source.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt, TryStreamExt};
use validator::Validate;
use vingest_models::{
    AccessDescriptor, ArtifactRole, ChunkOutcome, IngestionSession, InitiateRequest,
    InitiateResponse, SessionId, SessionStatus, UploadProgress, UploadStrategy,
};
use vingest_storage::keys;

use crate::context::PipelineContext;
use crate::error::{IngestError, IngestResult};
use crate::logging::{SessionLogger, Stage};
use crate::metrics;

/// Chunk objects checked concurrently when completing an upload.
const EXISTENCE_CHECK_CONCURRENCY: usize = 8;

const CHUNK_CONTENT_TYPE: &str = "application/octet-stream";

/// Result of [`UploadCoordinator::complete_upload`].
#[derive(Debug, Clone)]
pub struct UploadCompletion {
    pub session: IngestionSession,
    /// False when the session was already processing under a live lease
    pub advanced: bool,
}

#[derive(Clone)]
pub struct UploadCoordinator {
    ctx: Arc<PipelineContext>,
}

impl UploadCoordinator {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }

    /// Open a session and hand out its write credentials.
    ///
    /// Without `chunk_count` a single credential covers the whole file;
    /// otherwise one credential is issued per chunk index.
    pub async fn initiate(&self, request: &InitiateRequest) -> IngestResult<InitiateResponse> {
        request
            .validate()
            .map_err(|e| IngestError::invalid_request(e.to_string()))?;
        if request.file_name.trim().is_empty() {
            return Err(IngestError::invalid_request("fileName must not be blank"));
        }

        let session = IngestionSession::new(
            request.file_name.trim(),
            request.file_size,
            request.chunk_count,
        );
        let logger = SessionLogger::new(&session.id, Stage::Upload);

        let all: Vec<u32> = (0..session.total_chunks).collect();
        let credentials = self.issue_credentials(&session, &all).await?;
        self.ctx.sessions.create(&session).await?;

        metrics::record_session_initiated(session.strategy.as_str());
        logger.log_start(&format!(
            "{} ({} bytes) as {} with {} chunk(s)",
            session.source_name,
            session.source_size_bytes,
            session.strategy.as_str(),
            session.total_chunks
        ));

        Ok(InitiateResponse {
            session_id: session.id.clone(),
            strategy: session.strategy,
            total_chunks: session.total_chunks,
            credentials,
        })
    }

    /// Record the outcome of one chunk upload.
    ///
    /// Recording an index twice leaves the completed set unchanged. A failed
    /// outcome changes nothing; the client retries with a fresh credential.
    pub async fn record_chunk_complete(
        &self,
        session_id: &SessionId,
        index: u32,
        outcome: &ChunkOutcome,
    ) -> IngestResult<UploadProgress> {
        let logger = SessionLogger::new(session_id, Stage::Upload);

        if let ChunkOutcome::Failed { error } = outcome {
            let session = self.ctx.sessions.get(session_id).await?;
            if index >= session.total_chunks {
                return Err(IngestError::invalid_request(format!(
                    "chunk index {} is outside [0, {})",
                    index, session.total_chunks
                )));
            }
            metrics::record_chunk_failure();
            logger.log_warning(&format!(
                "client reported chunk {} failed: {}",
                index,
                error.as_deref().unwrap_or("no detail")
            ));
            return Ok(UploadProgress::from(&session));
        }

        let (session, newly_added) = self
            .ctx
            .sessions
            .update(session_id, |s| s.record_chunk(index).map_err(IngestError::from))
            .await?;

        metrics::record_chunk(newly_added);
        if newly_added {
            logger.log_progress(&format!(
                "chunk {} recorded ({}/{})",
                index,
                session.completed_chunk_indices.len(),
                session.total_chunks
            ));
        }

        Ok(UploadProgress::from(&session))
    }

    /// Completed and remaining chunk indices.
    pub async fn status(&self, session_id: &SessionId) -> IngestResult<UploadProgress> {
        let session = self.ctx.sessions.get(session_id).await?;
        Ok(UploadProgress::from(&session))
    }

    /// Full session record.
    pub async fn session(&self, session_id: &SessionId) -> IngestResult<IngestionSession> {
        Ok(self.ctx.sessions.get(session_id).await?)
    }

    /// Re-issue write credentials for a resumed upload.
    ///
    /// Defaults to every remaining index. Re-issuing for an index that is
    /// already uploaded is harmless: object writes are overwrites.
    pub async fn refresh_credentials(
        &self,
        session_id: &SessionId,
        indices: Option<&[u32]>,
    ) -> IngestResult<Vec<AccessDescriptor>> {
        let session = self.ctx.sessions.get(session_id).await?;
        if session.status != SessionStatus::Uploading {
            return Err(IngestError::not_ready(format!(
                "credentials can only be refreshed while uploading, session is {}",
                session.status
            )));
        }

        let wanted: Vec<u32> = match indices {
            Some(requested) => {
                if let Some(bad) = requested.iter().find(|i| **i >= session.total_chunks) {
                    return Err(IngestError::invalid_request(format!(
                        "chunk index {} is outside [0, {})",
                        bad, session.total_chunks
                    )));
                }
                requested.iter().copied().collect::<BTreeSet<_>>().into_iter().collect()
            }
            None => session.remaining_chunks(),
        };

        let credentials = self.issue_credentials(&session, &wanted).await?;
        SessionLogger::new(session_id, Stage::Upload)
            .log_progress(&format!("re-issued {} credential(s)", credentials.len()));
        Ok(credentials)
    }

    /// Advance a fully uploaded session to `processing`.
    ///
    /// Every chunk must be recorded and present in the object store. A
    /// session that failed during processing, or whose processing stopped
    /// renewing its lease, may be advanced again to retry segmentation.
    pub async fn complete_upload(&self, session_id: &SessionId) -> IngestResult<UploadCompletion> {
        let session = self.ctx.sessions.get(session_id).await?;
        let logger = SessionLogger::new(session_id, Stage::Upload);

        let stage_lease = self.ctx.config.stage_lease;
        match session.status {
            SessionStatus::Processing if !session.stage_lease_expired(Utc::now(), stage_lease) => {
                return Ok(UploadCompletion {
                    session,
                    advanced: false,
                })
            }
            SessionStatus::Uploading if !session.is_upload_complete() => {
                return Err(IngestError::not_ready(format!(
                    "{} chunk(s) still outstanding: {:?}",
                    session.remaining_chunks().len(),
                    session.remaining_chunks()
                )));
            }
            _ => {}
        }

        self.verify_uploaded_objects(&session).await?;

        let (session, advanced) = self
            .ctx
            .sessions
            .update(session_id, |s| {
                // Lost a race with a renewal or another resume.
                if s.status == SessionStatus::Processing
                    && !s.expire_stale_stage(Utc::now(), stage_lease)
                {
                    return Ok(false);
                }
                s.begin_processing().map_err(IngestError::from)?;
                Ok::<_, IngestError>(true)
            })
            .await?;

        if advanced {
            logger.log_completion(&format!(
                "all {} chunk(s) present, session is processing",
                session.total_chunks
            ));
        }
        Ok(UploadCompletion { session, advanced })
    }

    async fn verify_uploaded_objects(&self, session: &IngestionSession) -> IngestResult<()> {
        let store = &self.ctx.store;
        let checked: Vec<(String, bool)> = stream::iter(upload_keys(session))
            .map(|key| async move {
                let exists = store.exists(&key).await?;
                Ok::<_, IngestError>((key, exists))
            })
            .buffer_unordered(EXISTENCE_CHECK_CONCURRENCY)
            .try_collect()
            .await?;

        let mut missing: Vec<String> = checked
            .into_iter()
            .filter_map(|(key, exists)| (!exists).then_some(key))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            missing.sort();
            Err(IngestError::not_ready(format!(
                "{} uploaded object(s) not found in storage: {}",
                missing.len(),
                missing.join(", ")
            )))
        }
    }

    async fn issue_credentials(
        &self,
        session: &IngestionSession,
        indices: &[u32],
    ) -> IngestResult<Vec<AccessDescriptor>> {
        let delivery = &self.ctx.delivery;
        let mut credentials = Vec::with_capacity(indices.len());

        match session.strategy {
            UploadStrategy::SingleFile => {
                if !indices.is_empty() {
                    let key = keys::original_key(&session.id, &session.source_name);
                    credentials.push(
                        delivery
                            .upload_descriptor(
                                ArtifactRole::Original,
                                None,
                                &key,
                                keys::content_type_for(&session.source_name),
                            )
                            .await?,
                    );
                }
            }
            UploadStrategy::Chunked => {
                for &index in indices {
                    let key = keys::chunk_key(&session.id, index);
                    credentials.push(
                        delivery
                            .upload_descriptor(
                                ArtifactRole::Chunk,
                                Some(index),
                                &key,
                                CHUNK_CONTENT_TYPE,
                            )
                            .await?,
                    );
                }
            }
        }

        Ok(credentials)
    }
}

/// Object keys the client writes for a session, in index order.
pub fn upload_keys(session: &IngestionSession) -> Vec<String> {
    match session.strategy {
        UploadStrategy::SingleFile => vec![keys::original_key(&session.id, &session.source_name)],
        UploadStrategy::Chunked => (0..session.total_chunks)
            .map(|i| keys::chunk_key(&session.id, i))
            .collect(),
    }
}
