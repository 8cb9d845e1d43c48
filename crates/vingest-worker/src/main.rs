//! Queue worker binary.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vingest_media::Transcoder;
use vingest_pipeline::{IngestPipeline, PipelineContext};
use vingest_queue::JobQueue;
use vingest_worker::{JobExecutor, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("rustls crypto provider was already installed");
    }

    init_tracing();
    info!("Starting vingest-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    if let Some(port) = config.metrics_port {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to start Prometheus listener")?;
        info!("Prometheus metrics served on {}", addr);
    }

    let ctx = PipelineContext::from_env()
        .await
        .context("failed to build pipeline")?;
    if config.claim_min_idle <= ctx.config.stage_lease {
        warn!(
            "WORKER_CLAIM_MIN_IDLE_SECS ({}s) should exceed STAGE_LEASE_SECS ({}s), \
             or redelivered jobs find their stage still leased",
            config.claim_min_idle.as_secs(),
            ctx.config.stage_lease.as_secs()
        );
    }
    if let Err(e) = ctx.transcoder.check_available() {
        warn!("Transcoder unavailable, segmentation jobs will fail: {}", e);
    }
    let pipeline = IngestPipeline::new(Arc::new(ctx));

    let queue = JobQueue::from_env().context("failed to create job queue")?;
    let executor = Arc::new(JobExecutor::new(config, queue, pipeline));

    let signal_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received shutdown signal");
                signal_executor.shutdown();
            }
            Err(e) => warn!("Failed to listen for shutdown signal: {}", e),
        }
    });

    executor.run().await.context("executor failed")?;

    info!("Worker shutdown complete");
    Ok(())
}

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("vingest_worker=info,vingest_pipeline=info,vingest_media=info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(true).with_target(true))
            .with(env_filter)
            .init();
    }
}
