//! Job handlers: one queue job maps onto one pipeline stage.

use tracing::info;
use vingest_pipeline::IngestPipeline;
use vingest_queue::{DispatchAnalysisJob, QueueJob, SegmentSessionJob};

use crate::error::WorkerResult;

/// Run one job. Returns the job to enqueue next, if the stage chains into
/// another.
pub async fn process_job(pipeline: &IngestPipeline, job: &QueueJob) -> WorkerResult<Option<QueueJob>> {
    match job {
        QueueJob::SegmentSession(j) => segment_session(pipeline, j).await,
        QueueJob::DispatchAnalysis(j) => dispatch_analysis(pipeline, j).await,
    }
}

async fn segment_session(
    pipeline: &IngestPipeline,
    job: &SegmentSessionJob,
) -> WorkerResult<Option<QueueJob>> {
    let refs = pipeline.segment(&job.session_id).await?;
    info!(
        session_id = %job.session_id,
        job_id = %job.job_id,
        segments = refs.len(),
        "Segmentation job finished"
    );

    Ok(job.dispatch_after.then(|| {
        QueueJob::DispatchAnalysis(DispatchAnalysisJob::new(job.session_id.clone()))
    }))
}

async fn dispatch_analysis(
    pipeline: &IngestPipeline,
    job: &DispatchAnalysisJob,
) -> WorkerResult<Option<QueueJob>> {
    let session = pipeline.dispatch(&job.session_id).await?;
    info!(
        session_id = %job.session_id,
        job_id = %job.job_id,
        status = %session.status,
        "Dispatch job finished"
    );
    Ok(None)
}
