//! Application state.

use std::sync::Arc;

use tracing::info;
use vingest_pipeline::{IngestPipeline, PipelineContext};
use vingest_queue::JobQueue;

use crate::config::{ApiConfig, DeploymentMode};
use crate::error::{ApiError, ApiResult};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub pipeline: IngestPipeline,
    /// Present in queued mode only
    pub queue: Option<JobQueue>,
}

impl AppState {
    /// Create new application state from the environment.
    pub async fn new(config: ApiConfig) -> anyhow::Result<Self> {
        let ctx = PipelineContext::from_env().await?;
        let pipeline = IngestPipeline::new(Arc::new(ctx));

        let queue = match config.deployment_mode {
            DeploymentMode::Inline => None,
            DeploymentMode::Queued => {
                let queue = JobQueue::from_env()?;
                queue.init().await?;
                info!(stream = %queue.config().stream_name, "Queued deployment mode");
                Some(queue)
            }
        };

        Ok(Self::with_pipeline(config, pipeline, queue))
    }

    pub fn with_pipeline(config: ApiConfig, pipeline: IngestPipeline, queue: Option<JobQueue>) -> Self {
        Self {
            config,
            pipeline,
            queue,
        }
    }

    /// The job queue, required in queued mode.
    pub fn queue(&self) -> ApiResult<&JobQueue> {
        self.queue
            .as_ref()
            .ok_or_else(|| ApiError::internal("job queue is not configured"))
    }
}
