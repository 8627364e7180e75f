//! Worker-process side of the pool.
//!
//! A worker child reads jobs from stdin one line at a time, runs the
//! training function synchronously, and reports each completed job on
//! stdout. A training fault ends the process with a failure status; the
//! supervisor notices the closed pipe and stops feeding that worker.

use std::io::{BufRead, Write};
use std::process::ExitCode;

use trainq_core::{TrainingError, TrainingFunction};

use crate::protocol::{self, ProtocolError, WorkerReply, WORKER_CHILD_ENV};

#[derive(Debug, thiserror::Error)]
pub enum ChildError {
    #[error("Worker I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Job {job_id} raised: {source}")]
    Training {
        job_id: String,
        #[source]
        source: TrainingError,
    },
}

/// Whether the current process was started as a worker child.
pub fn is_worker_child() -> bool {
    std::env::var_os(WORKER_CHILD_ENV).is_some()
}

/// Serve jobs from `input` until it reaches end of file.
///
/// Returns the first training fault as an error without reporting the
/// job as finished.
pub fn serve<T, R, W>(training: &T, input: R, mut output: W) -> Result<(), ChildError>
where
    T: TrainingFunction + ?Sized,
    R: BufRead,
    W: Write,
{
    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let job = protocol::decode_job(&line)?;
        let job_id = job.job_id.clone();

        tracing::info!(job_id = %job_id, "Training started");
        let result = training
            .train(job.training_parameters)
            .map_err(|source| ChildError::Training {
                job_id: job_id.clone(),
                source,
            })?;
        tracing::info!(job_id = %job_id, result = %result, "Training returned");

        let reply = protocol::encode_line(&WorkerReply::Finished { job_id })?;
        output.write_all(reply.as_bytes())?;
        output.flush()?;
    }
    Ok(())
}

/// Entry point for a worker child: serve stdin/stdout and map the outcome
/// to an exit status.
pub fn run_worker_child<T: TrainingFunction>(training: T) -> ExitCode {
    let pid = std::process::id();
    tracing::info!(pid, "Worker process ready");

    let stdin = std::io::stdin();
    match serve(&training, stdin.lock(), std::io::stdout()) {
        Ok(()) => {
            tracing::info!(pid, "Worker process input closed, exiting");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(pid, error = %e, "Worker process terminated");
            ExitCode::FAILURE
        }
    }
}
