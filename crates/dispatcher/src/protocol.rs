//! Line-delimited JSON protocol between a worker supervisor and its
//! child process.
//!
//! The supervisor writes one [`JobMessage`] per line to the child's stdin.
//! After the training function returns, the child writes one
//! [`WorkerReply`] line to stdout. The child's logs go to stderr, so
//! stdout carries only protocol lines; anything else found there is
//! skipped by the reader.

use serde::{Deserialize, Serialize};
use trainq_core::JobMessage;

/// Environment variable that switches the host binary into worker-child
/// mode when present.
pub const WORKER_CHILD_ENV: &str = "TRAINQ_WORKER_CHILD";

/// Message sent from a worker child back to its supervisor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerReply {
    /// The training function returned for `job_id`.
    Finished { job_id: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed protocol line: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Serialize a message as a single newline-terminated line.
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, ProtocolError> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

pub fn decode_job(line: &str) -> Result<JobMessage, ProtocolError> {
    Ok(serde_json::from_str(line.trim())?)
}

pub fn decode_reply(line: &str) -> Result<WorkerReply, ProtocolError> {
    Ok(serde_json::from_str(line.trim())?)
}
