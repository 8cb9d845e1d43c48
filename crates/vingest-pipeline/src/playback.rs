//! Playback Resolver.

use std::sync::Arc;

use vingest_models::{
    AccessDescriptor, ArtifactRole, IngestionSession, PlaybackDescriptor, PlaybackSource,
    SegmentRef, SessionId, SessionStatus, UploadStrategy,
};
use vingest_storage::{keys, DeliveryScope};

use crate::config::PlaybackMode;
use crate::context::PipelineContext;
use crate::error::{IngestError, IngestResult};
use crate::logging::{SessionLogger, Stage};

#[derive(Clone)]
pub struct PlaybackResolver {
    ctx: Arc<PipelineContext>,
}

impl PlaybackResolver {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }

    /// Time-limited read descriptors for a session.
    ///
    /// Segmented sessions serve their segments in index order (all of them,
    /// or only the first, per [`PlaybackMode`]). Otherwise the original
    /// source is served once it is durably stored as one object.
    pub async fn resolve(&self, session_id: &SessionId) -> IngestResult<PlaybackDescriptor> {
        let session = self.ctx.sessions.get(session_id).await?;

        if let Some(refs) = session.segment_refs.as_deref().filter(|r| !r.is_empty()) {
            let selected = match self.ctx.config.playback_mode {
                PlaybackMode::AllSegments => refs,
                PlaybackMode::FirstSegment => &refs[..1],
            };
            let mut descriptors = Vec::with_capacity(selected.len());
            for r in selected {
                descriptors.push(self.segment_descriptor(&session.id, r).await?);
            }
            return Ok(PlaybackDescriptor {
                session_id: session.id.clone(),
                source: PlaybackSource::Segments,
                descriptors,
            });
        }

        let original_key = keys::original_key(&session.id, &session.source_name);
        if self.original_available(&session, &original_key).await? {
            let descriptor = self
                .ctx
                .delivery
                .read_descriptor(
                    &session.id,
                    ArtifactRole::Original,
                    None,
                    &original_key,
                    DeliveryScope::Playback,
                    Some(keys::content_type_for(&session.source_name)),
                )
                .await?;
            return Ok(PlaybackDescriptor {
                session_id: session.id.clone(),
                source: PlaybackSource::Original,
                descriptors: vec![descriptor],
            });
        }

        SessionLogger::new(session_id, Stage::Playback)
            .log_progress(&format!("nothing playable yet (status {})", session.status));
        Err(IngestError::not_ready(format!(
            "no playable artifact stored yet (status {})",
            session.status
        )))
    }

    async fn segment_descriptor(
        &self,
        session_id: &SessionId,
        segment: &SegmentRef,
    ) -> IngestResult<AccessDescriptor> {
        Ok(self
            .ctx
            .delivery
            .read_descriptor(
                session_id,
                ArtifactRole::Segment,
                Some(segment.index),
                &segment.key,
                DeliveryScope::Playback,
                Some(keys::content_type_for(&segment.key)),
            )
            .await?)
    }

    /// A single-file upload is playable once the client has reported it;
    /// chunked uploads only after segmentation assembled the original.
    async fn original_available(
        &self,
        session: &IngestionSession,
        original_key: &str,
    ) -> IngestResult<bool> {
        let reported = match session.strategy {
            UploadStrategy::SingleFile => session.is_upload_complete(),
            UploadStrategy::Chunked => session.status != SessionStatus::Uploading,
        };
        if !reported {
            return Ok(false);
        }
        Ok(self.ctx.store.exists(original_key).await?)
    }
}
