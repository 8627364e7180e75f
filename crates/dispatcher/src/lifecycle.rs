//! Job state updates on the coordination service.

use serde_json::json;
use trainq_core::JobState;
use trainq_datastore::Service;

/// Patch the remote job record's `state` field.
///
/// Failures are logged and swallowed so one unreachable call does not
/// take down the intake or a worker supervisor. Returns whether the patch
/// was applied.
pub async fn patch_job_state(jobs: &Service, job_id: &str, state: JobState) -> bool {
    match jobs.patch(job_id, json!({ "state": state })).await {
        Ok(_) => {
            tracing::debug!(job_id, state = %state, "Job state updated");
            true
        }
        Err(e) => {
            tracing::error!(
                job_id,
                state = %state,
                service = jobs.name(),
                error = %e,
                "Failed to update job state",
            );
            false
        }
    }
}

/// Move a job from `from` to `to`, writing nothing if that is not a
/// forward single-step transition.
pub async fn advance_job_state(jobs: &Service, job_id: &str, from: JobState, to: JobState) -> bool {
    match from.transition(to) {
        Ok(next) => patch_job_state(jobs, job_id, next).await,
        Err(e) => {
            tracing::error!(job_id, error = %e, "Refusing job state update");
            false
        }
    }
}
