//! Shared domain types for the trainq job-dispatch workspace.
//!
//! Everything here is plain data plus pure functions: remote record
//! shapes, the job lifecycle state machine, the accepted-parameter
//! schema, and the [`training::TrainingFunction`] seam that worker
//! processes call into. No I/O lives in this crate.

pub mod error;
pub mod identity;
pub mod job_state;
pub mod parameters;
pub mod records;
pub mod training;
pub mod types;

pub use error::CoreError;
pub use job_state::JobState;
pub use parameters::{ParameterSchema, ParameterType};
pub use records::{JobMessage, JobRecord, WorkerRecord};
pub use training::{TrainingError, TrainingFunction};
pub use types::{DocId, TrainingParameters};
