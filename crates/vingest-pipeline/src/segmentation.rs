//! Segmentation Engine.
//!
//! Turns a fully uploaded source into an ordered list of independently
//! playable segments in the object store. The session only ever sees the
//! complete list: refs are published in one write after every upload has
//! succeeded, and any failure moves the session to `failed` instead.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt, TryStreamExt};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use vingest_media::fs_utils::{concat_files, remove_dir_quietly};
use vingest_media::{plan_segments, MediaError, SegmentFile};
use vingest_models::{IngestionSession, SegmentRef, SessionId, SessionStatus, UploadStrategy};
use vingest_storage::keys;

use crate::config::SegmentationMode;
use crate::context::PipelineContext;
use crate::error::{IngestError, IngestResult};
use crate::lease;
use crate::logging::{SessionLogger, Stage};
use crate::metrics;

#[derive(Clone)]
pub struct SegmentationEngine {
    ctx: Arc<PipelineContext>,
}

impl SegmentationEngine {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }

    /// Segment a session that is `processing`.
    ///
    /// On success the session is `chunked` with the returned refs. On any
    /// failure the session is `failed` with the cause recorded before the
    /// error is returned, except when host shutdown cut the run short.
    pub async fn segment(
        &self,
        session_id: &SessionId,
        cancel: CancellationToken,
    ) -> IngestResult<Vec<SegmentRef>> {
        let session = self.ctx.sessions.get(session_id).await?;
        if session.status != SessionStatus::Processing {
            return Err(IngestError::not_ready(format!(
                "segmentation requires a processing session, session is {}",
                session.status
            )));
        }

        let logger = SessionLogger::new(session_id, Stage::Segmentation);
        let span = logger.create_span();
        async {
            logger.log_start(&format!(
                "{} ({} mode)",
                session.source_name,
                match self.mode_for(&session) {
                    SegmentationMode::Transcode => "transcode",
                    SegmentationMode::Passthrough => "passthrough",
                }
            ));
            let _lease = lease::hold(&self.ctx, session_id, SessionStatus::Processing);
            let started = Instant::now();

            let refs = match self.produce(&session, &logger, cancel.clone()).await {
                Ok(refs) => refs,
                Err(_) if cancel.is_cancelled() && self.ctx.shutdown.is_cancelled() => {
                    logger.log_warning("interrupted by shutdown, left processing until its lease expires");
                    return Err(IngestError::interrupted("host shutting down"));
                }
                Err(e) => {
                    self.ctx.record_failure(session_id, &logger, &e).await;
                    return Err(e);
                }
            };

            let published = refs.clone();
            if let Err(e) = self
                .ctx
                .sessions
                .update(session_id, move |s| {
                    s.mark_chunked(published.clone()).map_err(IngestError::from)
                })
                .await
            {
                if self.mode_for(&session) == SegmentationMode::Transcode {
                    self.discard_unpublished(session_id, &refs).await;
                }
                self.ctx.record_failure(session_id, &logger, &e).await;
                return Err(e);
            }

            let elapsed = started.elapsed().as_secs_f64();
            metrics::record_segmentation(refs.len(), elapsed);
            logger.log_completion(&format!("{} segment(s) in {:.1}s", refs.len(), elapsed));
            Ok(refs)
        }
        .instrument(span)
        .await
    }

    /// Remove uploaded segments the session does not reference. Keys are
    /// deterministic, so segments another run already published are kept.
    async fn discard_unpublished(&self, session_id: &SessionId, refs: &[SegmentRef]) {
        let published: HashSet<String> = match self.ctx.sessions.find(session_id).await {
            Ok(Some(current)) => current
                .segment_refs
                .unwrap_or_default()
                .into_iter()
                .map(|r| r.key)
                .collect(),
            Ok(None) => HashSet::new(),
            // Unknown state; keep everything rather than risk published keys.
            Err(_) => return,
        };
        for r in refs.iter().filter(|r| !published.contains(&r.key)) {
            let _ = self.ctx.store.delete(&r.key).await;
        }
    }

    fn mode_for(&self, session: &IngestionSession) -> SegmentationMode {
        match (self.ctx.config.segmentation_mode, session.strategy) {
            (SegmentationMode::Passthrough, UploadStrategy::Chunked) => SegmentationMode::Passthrough,
            _ => SegmentationMode::Transcode,
        }
    }

    async fn produce(
        &self,
        session: &IngestionSession,
        logger: &SessionLogger,
        cancel: CancellationToken,
    ) -> IngestResult<Vec<SegmentRef>> {
        match self.mode_for(session) {
            SegmentationMode::Passthrough => Ok(passthrough_refs(session)),
            SegmentationMode::Transcode => {
                let scratch = self
                    .ctx
                    .config
                    .work_dir
                    .join(format!("{}-{}", session.id, uuid::Uuid::new_v4()));
                let result = self.transcode(session, &scratch, logger, cancel).await;
                remove_dir_quietly(&scratch).await;
                result
            }
        }
    }

    async fn transcode(
        &self,
        session: &IngestionSession,
        scratch: &Path,
        logger: &SessionLogger,
        cancel: CancellationToken,
    ) -> IngestResult<Vec<SegmentRef>> {
        tokio::fs::create_dir_all(scratch)
            .await
            .map_err(|e| IngestError::external(format!("cannot create work dir: {}", e)))?;

        let extension = keys::container_extension(&session.source_name);
        let source = self.materialize_source(session, scratch, &extension).await?;

        let duration = self.ctx.transcoder.probe_duration(&source).await?;
        let max_secs = self.ctx.config.max_segment_secs;
        logger.log_progress(&format!(
            "source is {:.1}s, expecting {} segment(s) of at most {}s",
            duration,
            plan_segments(duration, max_secs).len(),
            max_secs
        ));

        let files = self
            .ctx
            .transcoder
            .split(&source, &scratch.join("segments"), max_secs, cancel)
            .await?;
        if files.is_empty() {
            return Err(MediaError::malformed_output("transcoder produced no segments").into());
        }
        // The source is no longer needed; free the disk before uploading.
        let _ = tokio::fs::remove_file(&source).await;

        self.upload_segments(&session.id, &extension, files).await
    }

    /// Write the whole source to `scratch/source.{ext}`.
    ///
    /// Chunked uploads are concatenated in index order and the assembled
    /// file is stored under the session's original key.
    async fn materialize_source(
        &self,
        session: &IngestionSession,
        scratch: &Path,
        extension: &str,
    ) -> IngestResult<PathBuf> {
        let source = scratch.join(format!("source.{}", extension));
        let original_key = keys::original_key(&session.id, &session.source_name);

        match session.strategy {
            UploadStrategy::SingleFile => {
                self.ctx.store.get_to_file(&original_key, &source).await?;
            }
            UploadStrategy::Chunked => {
                let parts_dir = scratch.join("chunks");
                let mut parts = Vec::with_capacity(session.total_chunks as usize);
                for index in 0..session.total_chunks {
                    let part = parts_dir.join(format!("{:05}", index));
                    self.ctx
                        .store
                        .get_to_file(&keys::chunk_key(&session.id, index), &part)
                        .await?;
                    parts.push(part);
                }
                concat_files(&parts, &source).await?;
                remove_dir_quietly(&parts_dir).await;

                self.ctx
                    .store
                    .put_file(&source, &original_key, keys::content_type_for(&session.source_name))
                    .await?;
            }
        }

        Ok(source)
    }

    /// Upload segments with bounded parallelism; refs come back in index
    /// order regardless of completion order. If any upload fails, segments
    /// already written are removed.
    async fn upload_segments(
        &self,
        session_id: &SessionId,
        extension: &str,
        files: Vec<SegmentFile>,
    ) -> IngestResult<Vec<SegmentRef>> {
        let store = &self.ctx.store;
        let content_type = keys::content_type_for(&format!("segment.{}", extension));
        let all_keys: Vec<String> = files
            .iter()
            .map(|f| keys::segment_key(session_id, f.index, extension))
            .collect();

        let uploaded: IngestResult<Vec<SegmentRef>> = stream::iter(files)
            .map(|file| async move {
                let key = keys::segment_key(session_id, file.index, extension);
                let size = store.put_file(&file.path, &key, content_type).await?;
                Ok::<_, IngestError>(
                    SegmentRef::new(file.index, key)
                        .with_duration(file.duration_secs)
                        .with_size(size),
                )
            })
            .buffer_unordered(self.ctx.config.max_parallel_uploads.max(1))
            .try_collect()
            .await;

        match uploaded {
            Ok(mut refs) => {
                refs.sort_by_key(|r| r.index);
                Ok(refs)
            }
            Err(e) => {
                for key in &all_keys {
                    let _ = store.delete(key).await;
                }
                Err(e)
            }
        }
    }
}

/// Chunks are already playable units; publish their keys as segments.
fn passthrough_refs(session: &IngestionSession) -> Vec<SegmentRef> {
    (0..session.total_chunks)
        .map(|i| SegmentRef::new(i, keys::chunk_key(&session.id, i)))
        .collect()
}
