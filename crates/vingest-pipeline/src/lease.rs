//! Stage leases.
//!
//! While a stage runs, its session's `updated_at` is renewed in the
//! background. A host that dies stops renewing, and once the lease runs out
//! the stage may be re-entered by a later `completeUpload` or dispatch.

use std::sync::Arc;

use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::debug;
use vingest_models::{SessionId, SessionStatus};

use crate::context::PipelineContext;
use crate::error::IngestError;

/// Renew the lease on `stage` until the returned guard is dropped or the
/// session leaves the stage.
pub(crate) fn hold(ctx: &Arc<PipelineContext>, session_id: &SessionId, stage: SessionStatus) -> DropGuard {
    let token = CancellationToken::new();
    let stopped = token.clone();
    let ctx = Arc::clone(ctx);
    let session_id = session_id.clone();
    let interval = ctx.config.lease_renewal_interval();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = stopped.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            let renewed = ctx
                .sessions
                .update(&session_id, |s| Ok::<_, IngestError>(s.renew_stage(stage)))
                .await;
            match renewed {
                Ok((_, true)) => {}
                Ok((_, false)) => break,
                Err(e) => debug!(session_id = %session_id, "Lease renewal failed: {}", e),
            }
        }
    });

    token.drop_guard()
}
