#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid job state transition: {from} -> {to}")]
    InvalidTransition {
        from: crate::job_state::JobState,
        to: crate::job_state::JobState,
    },
}
