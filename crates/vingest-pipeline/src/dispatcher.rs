//! Analysis Dispatcher.
//!
//! Submits every segment of a session to the analysis service in one batch
//! and maps the outcome back onto the session. Each call is one submission:
//! re-dispatching a failed session submits again, and work already charged
//! to the service is not deduplicated.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use vingest_analysis::{AnalysisRequest, SegmentInput, SegmentSource};
use vingest_models::{ArtifactRole, IngestionSession, SessionId, SessionStatus};
use vingest_storage::{keys, DeliveryScope};

use crate::config::AnalysisPayload;
use crate::context::PipelineContext;
use crate::error::{IngestError, IngestResult};
use crate::lease;
use crate::logging::{SessionLogger, Stage};
use crate::metrics;
use crate::retry::{retry_async, RetryConfig};

/// `lastError` recorded when the caller cancels an in-flight dispatch.
pub const CANCELLED_MESSAGE: &str = "analysis cancelled";

#[derive(Clone)]
pub struct AnalysisDispatcher {
    ctx: Arc<PipelineContext>,
}

impl AnalysisDispatcher {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }

    /// Dispatch a `chunked` session (or a failed one that still has its
    /// segments) and wait for the result.
    ///
    /// There is no timeout; cancelling `cancel` abandons the call and fails
    /// the session with [`CANCELLED_MESSAGE`]. A session left `analyzing` by
    /// a host that stopped renewing its lease is dispatched again.
    pub async fn dispatch(
        &self,
        session_id: &SessionId,
        cancel: CancellationToken,
    ) -> IngestResult<IngestionSession> {
        let stage_lease = self.ctx.config.stage_lease;
        let (session, reclaimed) = self
            .ctx
            .sessions
            .update(session_id, |s| {
                let reclaimed = s.expire_stale_stage(Utc::now(), stage_lease);
                s.begin_analysis().map_err(IngestError::from)?;
                Ok::<_, IngestError>(reclaimed)
            })
            .await?;

        let logger = SessionLogger::new(session_id, Stage::Analysis);
        let span = logger.create_span();
        async {
            if reclaimed {
                logger.log_warning("previous analysis stopped renewing its lease, dispatching again");
            }
            let _lease = lease::hold(&self.ctx, session_id, SessionStatus::Analyzing);

            let segments = session.segment_refs.as_ref().map_or(0, Vec::len);
            logger.log_start(&format!("submitting {} segment(s)", segments));
            let started = Instant::now();

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(self.cancellation_error()),
                result = self.submit(&session, &logger) => result,
            };
            let elapsed = started.elapsed().as_secs_f64();

            let result = match outcome {
                Ok(result) => result,
                Err(e) if e.is_interrupted() => {
                    logger.log_warning("interrupted by shutdown, left analyzing until its lease expires");
                    return Err(e);
                }
                Err(e) => {
                    metrics::record_analysis(false, elapsed);
                    self.ctx.record_failure(session_id, &logger, &e).await;
                    return Err(e);
                }
            };

            let stored = self
                .ctx
                .sessions
                .update(session_id, move |s| {
                    s.complete(result.clone()).map_err(IngestError::from)
                })
                .await;

            match stored {
                Ok((session, ())) => {
                    metrics::record_analysis(true, elapsed);
                    logger.log_completion(&format!("analysis stored after {:.1}s", elapsed));
                    Ok(session)
                }
                Err(e) => {
                    self.ctx.record_failure(session_id, &logger, &e).await;
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    fn cancellation_error(&self) -> IngestError {
        if self.ctx.shutdown.is_cancelled() {
            IngestError::interrupted("host shutting down")
        } else {
            IngestError::external(CANCELLED_MESSAGE)
        }
    }

    async fn submit(
        &self,
        session: &IngestionSession,
        logger: &SessionLogger,
    ) -> IngestResult<serde_json::Value> {
        let request = self.build_request(session).await?;

        let retry = RetryConfig::new("analysis")
            .with_max_retries(self.ctx.config.analysis_max_retries)
            .with_base_delay(self.ctx.config.analysis_retry_base_delay);
        let analysis = &self.ctx.analysis;

        retry_async(&retry, || analysis.analyze(&request), |e| e.is_retryable())
            .await
            .map_err(|(e, attempts)| {
                if attempts > 1 {
                    logger.log_warning(&format!("analysis failed after {} attempts", attempts));
                }
                IngestError::Analysis(e)
            })
    }

    /// One input per segment, in index order.
    async fn build_request(&self, session: &IngestionSession) -> IngestResult<AnalysisRequest> {
        let refs = session
            .segment_refs
            .as_deref()
            .ok_or_else(|| IngestError::not_ready("session has no segments"))?;

        let mut segments = Vec::with_capacity(refs.len());
        for r in refs {
            let content_type = keys::content_type_for(&r.key);
            let source = match self.ctx.config.analysis_payload {
                AnalysisPayload::Reference => {
                    let descriptor = self
                        .ctx
                        .delivery
                        .read_descriptor(
                            &session.id,
                            ArtifactRole::Segment,
                            Some(r.index),
                            &r.key,
                            DeliveryScope::Analysis,
                            Some(content_type),
                        )
                        .await?;
                    SegmentSource::Url {
                        url: descriptor.url,
                    }
                }
                AnalysisPayload::Inline => {
                    SegmentSource::inline(&self.ctx.store.get_bytes(&r.key).await?)
                }
            };
            segments.push(SegmentInput {
                index: r.index,
                key: r.key.clone(),
                duration_secs: r.duration_secs,
                content_type: Some(content_type.to_string()),
                source,
            });
        }

        Ok(AnalysisRequest {
            session_id: session.id.to_string(),
            source_name: session.source_name.clone(),
            segments,
        })
    }
}
