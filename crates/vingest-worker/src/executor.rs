//! Job executor.

use std::sync::Arc;
use std::time::Duration;

use metrics::gauge;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use vingest_pipeline::IngestPipeline;
use vingest_queue::{JobQueue, QueueJob};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::jobs::process_job;

/// Pulls jobs from the queue and runs them on the pipeline with bounded
/// concurrency.
pub struct JobExecutor {
    config: WorkerConfig,
    queue: Arc<JobQueue>,
    pipeline: IngestPipeline,
    job_semaphore: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
    consumer_name: String,
}

impl JobExecutor {
    pub fn new(config: WorkerConfig, queue: JobQueue, pipeline: IngestPipeline) -> Self {
        let job_semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        let (shutdown, _) = watch::channel(false);
        let consumer_name = format!("worker-{}", Uuid::new_v4());

        Self {
            config,
            queue: Arc::new(queue),
            pipeline,
            job_semaphore,
            shutdown,
            consumer_name,
        }
    }

    /// Consume until [`JobExecutor::shutdown`] is called, then drain.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            consumer = %self.consumer_name,
            max_jobs = self.config.max_concurrent_jobs,
            stream = %self.queue.config().stream_name,
            "Starting job executor"
        );

        self.queue.init().await?;

        let claim_task = tokio::spawn(Self::claim_loop(
            self.config.clone(),
            Arc::clone(&self.queue),
            self.pipeline.clone(),
            Arc::clone(&self.job_semaphore),
            self.consumer_name.clone(),
            self.shutdown.subscribe(),
        ));

        let mut shutdown_rx = self.shutdown.subscribe();
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping executor");
                        break;
                    }
                }
                result = self.consume_jobs() => {
                    if let Err(e) = result {
                        error!("Error consuming jobs: {}", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }

        claim_task.abort();

        info!("Waiting for in-flight jobs to complete...");
        if tokio::time::timeout(self.config.shutdown_timeout, self.wait_for_jobs())
            .await
            .is_err()
        {
            warn!(
                "In-flight jobs still running after {:?}, cancelling",
                self.config.shutdown_timeout
            );
        }
        // Stages cut short here are left unacked and their sessions stay in
        // the stage. Another worker claims the job once it has been idle
        // for `claim_min_idle`, by which time the stage lease has expired.
        self.pipeline.shutdown().await;

        info!("Job executor stopped");
        Ok(())
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    async fn consume_jobs(&self) -> WorkerResult<()> {
        let available = self.job_semaphore.available_permits();
        if available == 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }

        let jobs = self
            .queue
            .consume(
                &self.consumer_name,
                self.config.consume_block.as_millis() as u64,
                available.min(self.config.consume_batch),
            )
            .await?;

        if jobs.is_empty() {
            return Ok(());
        }
        debug!("Consumed {} jobs from queue", jobs.len());

        for (message_id, job) in jobs {
            let permit = Arc::clone(&self.job_semaphore)
                .acquire_owned()
                .await
                .map_err(|_| WorkerError::job_failed("Semaphore closed"))?;
            let queue = Arc::clone(&self.queue);
            let pipeline = self.pipeline.clone();

            tokio::spawn(async move {
                let _permit = permit;
                execute_job(&pipeline, &queue, &message_id, job).await;
            });
        }

        Ok(())
    }

    /// Periodically take over jobs whose consumer died mid-flight. Jobs that
    /// failed with a retryable error are picked up here as well.
    async fn claim_loop(
        config: WorkerConfig,
        queue: Arc<JobQueue>,
        pipeline: IngestPipeline,
        semaphore: Arc<Semaphore>,
        consumer_name: String,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut interval = tokio::time::interval(config.claim_interval);
        let min_idle_ms = config.claim_min_idle.as_millis() as u64;

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    report_queue_depth(&queue).await;
                    let jobs = match queue.claim_pending(&consumer_name, min_idle_ms, config.consume_batch).await {
                        Ok(jobs) => jobs,
                        Err(e) => {
                            warn!("Failed to claim pending jobs: {}", e);
                            continue;
                        }
                    };
                    if jobs.is_empty() {
                        continue;
                    }
                    info!("Claimed {} pending jobs", jobs.len());

                    for (message_id, job) in jobs {
                        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                            return;
                        };
                        let queue = Arc::clone(&queue);
                        let pipeline = pipeline.clone();
                        tokio::spawn(async move {
                            let _permit = permit;
                            execute_job(&pipeline, &queue, &message_id, job).await;
                        });
                    }
                }
            }
        }
    }

    async fn wait_for_jobs(&self) {
        while self.job_semaphore.available_permits() < self.config.max_concurrent_jobs {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

/// Queue stream gauges.
pub mod names {
    pub const QUEUE_DEPTH: &str = "vingest_queue_depth";
    pub const DLQ_DEPTH: &str = "vingest_queue_dlq_depth";
}

async fn report_queue_depth(queue: &JobQueue) {
    match (queue.len().await, queue.dlq_len().await) {
        (Ok(pending), Ok(dead)) => {
            gauge!(names::QUEUE_DEPTH).set(pending as f64);
            gauge!(names::DLQ_DEPTH).set(dead as f64);
            if dead > 0 {
                debug!(dead_lettered = dead, "Jobs waiting in the DLQ");
            }
        }
        (Err(e), _) | (_, Err(e)) => debug!("Failed to read queue depth: {}", e),
    }
}

/// What to do with a message once its job has run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// Ack and release; chain the follow-up job first if there is one
    Done,
    /// Leave pending for redelivery
    Retry,
    /// Retries exhausted
    DeadLetter,
    /// Ack and release; the failure is recorded on the session
    Abandon,
}

/// Decide how a finished job settles given its outcome and retry count.
pub fn settle(outcome: &WorkerResult<Option<QueueJob>>, attempts: u32, max_retries: u32) -> Settlement {
    match outcome {
        Ok(_) => Settlement::Done,
        Err(e) if !e.is_retryable() => Settlement::Abandon,
        Err(_) if attempts >= max_retries => Settlement::DeadLetter,
        Err(_) => Settlement::Retry,
    }
}

async fn execute_job(pipeline: &IngestPipeline, queue: &JobQueue, message_id: &str, job: QueueJob) {
    let job_id = job.job_id().to_string();
    let session_id = job.session_id().clone();
    info!(job_id = %job_id, session_id = %session_id, kind = job.kind(), "Executing job");

    let outcome = process_job(pipeline, &job).await;

    let attempts = match &outcome {
        Err(e) if e.is_retryable() => queue.increment_retry(message_id).await.unwrap_or(u32::MAX),
        _ => 0,
    };

    match settle(&outcome, attempts, queue.max_retries()) {
        Settlement::Done => {
            if let Ok(Some(next)) = &outcome {
                match queue.enqueue(next.clone()).await {
                    Ok(id) => info!(session_id = %session_id, message_id = %id, "Chained {} job", next.kind()),
                    Err(e) if e.is_duplicate() => debug!("Follow-up {} job already queued", next.kind()),
                    Err(e) => error!(
                        session_id = %session_id,
                        "Failed to chain {} job, dispatch must be requested again: {}",
                        next.kind(),
                        e
                    ),
                }
            }
            info!(job_id = %job_id, "Job completed successfully");
            finish(queue, message_id, &job).await;
        }
        Settlement::Abandon => {
            if let Err(e) = &outcome {
                warn!(job_id = %job_id, session_id = %session_id, kind = %job.kind(), "Job failed permanently: {}", e);
            }
            finish(queue, message_id, &job).await;
        }
        Settlement::DeadLetter => {
            let reason = outcome.err().map(|e| e.to_string()).unwrap_or_default();
            warn!(job_id = %job_id, "Job exceeded max retries ({}), moving to DLQ", queue.max_retries());
            if let Err(e) = queue.dlq(message_id, &job, &reason).await {
                error!("Failed to move job {} to DLQ: {}", job_id, e);
            }
            if let Err(e) = queue.release(&job).await {
                warn!("Failed to release job {}: {}", job_id, e);
            }
        }
        Settlement::Retry => {
            info!(
                job_id = %job_id,
                "Job will be retried (attempt {}/{})",
                attempts,
                queue.max_retries()
            );
        }
    }
}

async fn finish(queue: &JobQueue, message_id: &str, job: &QueueJob) {
    if let Err(e) = queue.ack(message_id).await {
        error!("Failed to ack job {}: {}", job.job_id(), e);
    }
    if let Err(e) = queue.release(job).await {
        warn!("Failed to release job {}: {}", job.job_id(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vingest_models::SessionId;
    use vingest_pipeline::IngestError;
    use vingest_queue::{QueueError, SegmentSessionJob};

    #[test]
    fn test_success_settles_done() {
        let next = QueueJob::SegmentSession(SegmentSessionJob::new(SessionId::new()));
        assert_eq!(settle(&Ok(None), 0, 3), Settlement::Done);
        assert_eq!(settle(&Ok(Some(next)), 0, 3), Settlement::Done);
    }

    #[test]
    fn test_recorded_failure_is_abandoned() {
        let outcome = Err(WorkerError::from(IngestError::external("split failed")));
        assert_eq!(settle(&outcome, 0, 3), Settlement::Abandon);
    }

    #[test]
    fn test_retryable_failure_dead_letters_at_limit() {
        let failure = || Err(WorkerError::from(QueueError::connection_failed("reset")));
        assert_eq!(settle(&failure(), 1, 3), Settlement::Retry);
        assert_eq!(settle(&failure(), 3, 3), Settlement::DeadLetter);
        assert_eq!(settle(&failure(), u32::MAX, 3), Settlement::DeadLetter);
    }
}
