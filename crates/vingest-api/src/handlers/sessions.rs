//! Session lifecycle handlers.

use axum::body::Bytes;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::info;
use vingest_models::{
    AccessDescriptor, ChunkReport, InitiateRequest, InitiateResponse, PlaybackDescriptor,
    RefreshCredentialsRequest, SessionId, SessionStatus, SessionView, UploadProgress,
};
use vingest_queue::{DispatchAnalysisJob, SegmentSessionJob};

use crate::config::DeploymentMode;
use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::response::{ok, ApiResponse};
use crate::state::AppState;

type Envelope<T> = Json<ApiResponse<T>>;

/// Optional JSON body: an empty body means the type's default.
fn parse_optional_body<T: DeserializeOwned + Default>(body: &[u8]) -> ApiResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::bad_request(format!("invalid JSON body: {}", e)))
}

fn session_path(path: Result<Path<String>, PathRejection>) -> ApiResult<SessionId> {
    let Path(id) = path.map_err(|e| ApiError::bad_request(e.body_text()))?;
    Ok(SessionId::from(id))
}

/// POST /api/sessions
pub async fn initiate_session(
    State(state): State<AppState>,
    payload: Result<Json<InitiateRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Envelope<InitiateResponse>)> {
    let Json(request) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let response = state.pipeline.uploads().initiate(&request).await?;
    Ok((StatusCode::CREATED, ok(response)))
}

/// POST /api/sessions/:id/chunks/:index
pub async fn report_chunk(
    State(state): State<AppState>,
    path: Result<Path<(String, u32)>, PathRejection>,
    body: Bytes,
) -> ApiResult<Envelope<UploadProgress>> {
    let Path((id, index)) = path.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let report: ChunkReport = parse_optional_body(&body)?;

    let progress = state
        .pipeline
        .uploads()
        .record_chunk_complete(&SessionId::from(id), index, &report.outcome)
        .await?;
    Ok(ok(progress))
}

/// GET /api/sessions/:id/status
pub async fn get_status(
    State(state): State<AppState>,
    path: Result<Path<String>, PathRejection>,
) -> ApiResult<Envelope<UploadProgress>> {
    let id = session_path(path)?;
    Ok(ok(state.pipeline.uploads().status(&id).await?))
}

/// GET /api/sessions/:id
pub async fn get_session(
    State(state): State<AppState>,
    path: Result<Path<String>, PathRejection>,
) -> ApiResult<Envelope<SessionView>> {
    let id = session_path(path)?;
    let session = state.pipeline.uploads().session(&id).await?;
    Ok(ok(SessionView::from(&session)))
}

#[derive(Debug, Serialize)]
pub struct CredentialsResponse {
    pub credentials: Vec<AccessDescriptor>,
}

/// POST /api/sessions/:id/credentials
pub async fn refresh_credentials(
    State(state): State<AppState>,
    path: Result<Path<String>, PathRejection>,
    body: Bytes,
) -> ApiResult<Envelope<CredentialsResponse>> {
    let id = session_path(path)?;
    let request: RefreshCredentialsRequest = parse_optional_body(&body)?;

    let credentials = state
        .pipeline
        .uploads()
        .refresh_credentials(&id, request.indices.as_deref())
        .await?;
    Ok(ok(CredentialsResponse { credentials }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionResponse {
    pub session: SessionView,
    /// Segmentation was handed to the worker pool or queue by this call
    pub scheduled: bool,
    pub deployment_mode: &'static str,
}

/// POST /api/sessions/:id/complete
///
/// Advances the upload and schedules segmentation (and dispatch, when
/// auto-dispatch is on).
pub async fn complete_upload(
    State(state): State<AppState>,
    path: Result<Path<String>, PathRejection>,
) -> ApiResult<(StatusCode, Envelope<CompletionResponse>)> {
    let id = session_path(path)?;
    let completion = state.pipeline.uploads().complete_upload(&id).await?;

    let scheduled = match state.config.deployment_mode {
        // A second inline run would race the first for the same record.
        DeploymentMode::Inline if completion.advanced => {
            state.pipeline.spawn_process(id.clone());
            true
        }
        DeploymentMode::Inline => false,
        // The queue deduplicates per session, so re-enqueueing a
        // processing session recovers a lost job without doubling work.
        DeploymentMode::Queued if completion.session.status == SessionStatus::Processing => {
            let auto_dispatch = state.pipeline.context().config.auto_dispatch;
            let job = SegmentSessionJob::new(id.clone()).with_dispatch_after(auto_dispatch);
            match state.queue()?.enqueue_segment(job).await {
                Ok(message_id) => {
                    metrics::record_job_enqueued("segment");
                    info!(session_id = %id, message_id = %message_id, "Segmentation enqueued");
                    true
                }
                Err(e) if e.is_duplicate() => false,
                Err(e) => return Err(e.into()),
            }
        }
        DeploymentMode::Queued => false,
    };

    let status = if scheduled {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        ok(CompletionResponse {
            session: SessionView::from(&completion.session),
            scheduled,
            deployment_mode: state.config.deployment_mode.as_str(),
        }),
    ))
}

#[derive(Debug, Default, Deserialize)]
pub struct DispatchQuery {
    /// Wait for the analysis result instead of returning immediately
    #[serde(default)]
    pub wait: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResponse {
    pub session: SessionView,
    pub scheduled: bool,
}

/// POST /api/sessions/:id/dispatch
///
/// Every call is a new submission to the analysis service, including
/// re-dispatching a failed session.
pub async fn dispatch_session(
    State(state): State<AppState>,
    path: Result<Path<String>, PathRejection>,
    Query(query): Query<DispatchQuery>,
) -> ApiResult<(StatusCode, Envelope<DispatchResponse>)> {
    let id = session_path(path)?;

    match state.config.deployment_mode {
        DeploymentMode::Inline if query.wait => {
            let session = state.pipeline.dispatch(&id).await?;
            Ok((
                StatusCode::OK,
                ok(DispatchResponse {
                    session: SessionView::from(&session),
                    scheduled: false,
                }),
            ))
        }
        DeploymentMode::Inline => {
            let session = state.pipeline.ensure_dispatchable(&id).await?;
            state.pipeline.spawn_dispatch(id);
            Ok((
                StatusCode::ACCEPTED,
                ok(DispatchResponse {
                    session: SessionView::from(&session),
                    scheduled: true,
                }),
            ))
        }
        DeploymentMode::Queued if query.wait => Err(ApiError::bad_request(
            "wait=true is only available in inline deployment mode",
        )),
        DeploymentMode::Queued => {
            let session = state.pipeline.ensure_dispatchable(&id).await?;
            let message_id = state
                .queue()?
                .enqueue_dispatch(DispatchAnalysisJob::new(id.clone()))
                .await?;
            metrics::record_job_enqueued("dispatch");
            info!(session_id = %id, message_id = %message_id, "Dispatch enqueued");
            Ok((
                StatusCode::ACCEPTED,
                ok(DispatchResponse {
                    session: SessionView::from(&session),
                    scheduled: true,
                }),
            ))
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

/// DELETE /api/sessions/:id/dispatch
///
/// Cancels a dispatch running on this host. Queued dispatches run on
/// workers and are not reachable from here.
pub async fn cancel_dispatch(
    State(state): State<AppState>,
    path: Result<Path<String>, PathRejection>,
) -> ApiResult<Envelope<CancelResponse>> {
    let id = session_path(path)?;
    // Unknown sessions are a 404, not a silent false.
    state.pipeline.uploads().session(&id).await?;
    let cancelled = state.pipeline.cancel_dispatch(&id).await;
    Ok(ok(CancelResponse { cancelled }))
}

/// GET /api/sessions/:id/playback
pub async fn get_playback(
    State(state): State<AppState>,
    path: Result<Path<String>, PathRejection>,
) -> ApiResult<Envelope<PlaybackDescriptor>> {
    let id = session_path(path)?;
    Ok(ok(state.pipeline.playback().resolve(&id).await?))
}
