use crate::coordinator::CallCoordinator;
use crate::dispatch::DispatchRegistry;
use crate::error::handle_error;
use crate::post_call::{FinalizerOutcome, FinalizerReport};
use crate::types::CallJob;

use std::sync::Arc;
use tracing::{info, warn};

/// Task that owns one dispatched call from dial to archive.
pub async fn run_dispatched_call(
    coordinator: Arc<CallCoordinator>,
    dispatches: DispatchRegistry,
    job: CallJob,
) {
    let call_id = job.call_id.clone();
    match coordinator.run_call(Arc::new(job)).await {
        Ok(reports) => log_reports(&call_id, &reports),
        Err(e) => handle_error(e).await,
    }
    dispatches.remove(&call_id);
    info!(call_id=%call_id, active = dispatches.active_count(), "dispatch finished");
}

fn log_reports(call_id: &str, reports: &[FinalizerReport]) {
    for report in reports {
        match &report.outcome {
            FinalizerOutcome::Completed => {
                info!(call_id, finalizer = report.name, "post-call job completed")
            }
            FinalizerOutcome::Failed(reason) => {
                warn!(call_id, finalizer = report.name, reason=%reason, "post-call job failed")
            }
            FinalizerOutcome::Panicked => {
                warn!(call_id, finalizer = report.name, "post-call job panicked")
            }
        }
    }
}
