//! Redis Streams job queue.
//!
//! Used by the queued deployment mode: the API enqueues segmentation and
//! dispatch jobs, `vingest-worker` consumes them through a consumer group
//! with retry counters and a dead letter stream.

pub mod error;
pub mod job;
pub mod queue;

pub use error::{QueueError, QueueResult};
pub use job::{DispatchAnalysisJob, QueueJob, SegmentSessionJob};
pub use queue::{JobQueue, QueueConfig};
