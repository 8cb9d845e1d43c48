//! Queue worker.
//!
//! Consumes segmentation and dispatch jobs enqueued by the API in queued
//! deployment mode:
//! - bounded concurrency over the shared pipeline
//! - crash recovery through pending-entry claims
//! - retry counters and a dead letter stream for infrastructure failures

pub mod config;
pub mod error;
pub mod executor;
pub mod jobs;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use executor::{settle, JobExecutor, Settlement};
pub use jobs::process_job;
