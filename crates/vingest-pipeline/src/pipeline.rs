//! Pipeline facade.
//!
//! Wires the components over one [`PipelineContext`] and runs the heavy
//! stages off the request path: segmentation is bounded by a per-host
//! semaphore, dispatches run as tracked tasks per session and can be
//! cancelled by session id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use vingest_models::{IngestionSession, SegmentRef, SessionId};

use crate::context::PipelineContext;
use crate::coordinator::UploadCoordinator;
use crate::dispatcher::AnalysisDispatcher;
use crate::error::{IngestError, IngestResult};
use crate::metrics;
use crate::playback::PlaybackResolver;
use crate::segmentation::SegmentationEngine;

type DispatchRegistry = Arc<Mutex<HashMap<SessionId, CancellationToken>>>;

fn registry(in_flight: &DispatchRegistry) -> MutexGuard<'_, HashMap<SessionId, CancellationToken>> {
    in_flight.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Holds a session's slot in the dispatch registry; the slot is released
/// when the dispatch task ends, however it ends.
struct InFlightDispatch {
    in_flight: DispatchRegistry,
    session_id: SessionId,
}

impl Drop for InFlightDispatch {
    fn drop(&mut self) {
        registry(&self.in_flight).remove(&self.session_id);
    }
}

#[derive(Clone)]
pub struct IngestPipeline {
    ctx: Arc<PipelineContext>,
    coordinator: UploadCoordinator,
    segmentation: SegmentationEngine,
    dispatcher: AnalysisDispatcher,
    playback: PlaybackResolver,
    segmentation_slots: Arc<Semaphore>,
    active_segmentations: Arc<AtomicUsize>,
    in_flight_dispatches: DispatchRegistry,
    tasks: TaskTracker,
}

impl IngestPipeline {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        let slots = ctx.config.max_concurrent_segmentations.max(1);
        Self {
            coordinator: UploadCoordinator::new(Arc::clone(&ctx)),
            segmentation: SegmentationEngine::new(Arc::clone(&ctx)),
            dispatcher: AnalysisDispatcher::new(Arc::clone(&ctx)),
            playback: PlaybackResolver::new(Arc::clone(&ctx)),
            segmentation_slots: Arc::new(Semaphore::new(slots)),
            active_segmentations: Arc::new(AtomicUsize::new(0)),
            in_flight_dispatches: Arc::new(Mutex::new(HashMap::new())),
            tasks: TaskTracker::new(),
            ctx,
        }
    }

    pub fn context(&self) -> &Arc<PipelineContext> {
        &self.ctx
    }

    pub fn uploads(&self) -> &UploadCoordinator {
        &self.coordinator
    }

    pub fn playback(&self) -> &PlaybackResolver {
        &self.playback
    }

    /// Segment a `processing` session, waiting for a free slot first.
    pub async fn segment(&self, session_id: &SessionId) -> IngestResult<Vec<SegmentRef>> {
        let _permit = self
            .segmentation_slots
            .acquire()
            .await
            .map_err(|_| IngestError::external("segmentation pool closed"))?;

        let active = self.active_segmentations.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_active_segmentations(active);

        let result = self
            .segmentation
            .segment(session_id, self.ctx.shutdown.child_token())
            .await;

        let active = self.active_segmentations.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::set_active_segmentations(active);
        result
    }

    /// Dispatch a segmented session. The call can be abandoned through
    /// [`IngestPipeline::cancel_dispatch`].
    ///
    /// The dispatch runs as a background task that this call waits on.
    /// Dropping the returned future leaves it running to a recorded outcome.
    pub async fn dispatch(&self, session_id: &SessionId) -> IngestResult<IngestionSession> {
        let token = self.ctx.shutdown.child_token();
        let slot = {
            let mut in_flight = registry(&self.in_flight_dispatches);
            if in_flight.contains_key(session_id) {
                return Err(IngestError::not_ready(format!(
                    "analysis already in flight for session {}",
                    session_id
                )));
            }
            in_flight.insert(session_id.clone(), token.clone());
            InFlightDispatch {
                in_flight: Arc::clone(&self.in_flight_dispatches),
                session_id: session_id.clone(),
            }
        };

        let dispatcher = self.dispatcher.clone();
        let id = session_id.clone();
        let task = self.tasks.spawn(async move {
            let _slot = slot;
            dispatcher.dispatch(&id, token).await
        });

        task.await
            .map_err(|e| IngestError::external(format!("dispatch task failed: {}", e)))?
    }

    /// Check that a dispatch would be accepted right now, without touching
    /// the stored record. Used before handing a dispatch to the background.
    pub async fn ensure_dispatchable(&self, session_id: &SessionId) -> IngestResult<IngestionSession> {
        let session = self.ctx.sessions.get(session_id).await?;
        let mut candidate = session.clone();
        candidate.expire_stale_stage(Utc::now(), self.ctx.config.stage_lease);
        candidate.begin_analysis()?;

        let in_flight = registry(&self.in_flight_dispatches).contains_key(session_id);
        if in_flight {
            return Err(IngestError::not_ready(format!(
                "analysis already in flight for session {}",
                session_id
            )));
        }
        Ok(session)
    }

    /// Cancel an in-flight dispatch on this host. Returns false when none
    /// is running.
    pub async fn cancel_dispatch(&self, session_id: &SessionId) -> bool {
        match registry(&self.in_flight_dispatches).get(session_id) {
            Some(token) => {
                info!(session_id = %session_id, "Cancelling analysis dispatch");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Segment, then dispatch when auto-dispatch is enabled.
    pub async fn process(&self, session_id: &SessionId) -> IngestResult<IngestionSession> {
        self.segment(session_id).await?;
        if self.ctx.config.auto_dispatch {
            self.dispatch(session_id).await
        } else {
            Ok(self.ctx.sessions.get(session_id).await?)
        }
    }

    /// Run [`IngestPipeline::process`] in the background.
    pub fn spawn_process(&self, session_id: SessionId) {
        let pipeline = self.clone();
        self.tasks.spawn(async move {
            match pipeline.process(&session_id).await {
                Ok(session) => debug!(session_id = %session_id, status = %session.status, "Background processing finished"),
                Err(e) => warn!(session_id = %session_id, kind = %e.kind(), "Background processing failed: {}", e),
            }
        });
    }

    /// Run [`IngestPipeline::dispatch`] in the background.
    pub fn spawn_dispatch(&self, session_id: SessionId) {
        let pipeline = self.clone();
        self.tasks.spawn(async move {
            if let Err(e) = pipeline.dispatch(&session_id).await {
                warn!(session_id = %session_id, kind = %e.kind(), "Background dispatch failed: {}", e);
            }
        });
    }

    /// Segmentations currently holding a slot.
    pub fn active_segmentations(&self) -> usize {
        self.active_segmentations.load(Ordering::SeqCst)
    }

    /// Cancel running work and wait for background tasks to settle.
    pub async fn shutdown(&self) {
        info!("Shutting down pipeline, cancelling in-flight work");
        self.ctx.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
    }
}
