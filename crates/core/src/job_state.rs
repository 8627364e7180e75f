//! Job lifecycle state machine.
//!
//! A job record moves `pending -> running -> finished` and never goes
//! back. The dispatcher writes `pending`, the worker supervisor writes
//! `running` and `finished`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Lifecycle state stored in the `state` field of a job record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Finished,
}

impl JobState {
    /// Wire representation, as written to the remote store.
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Finished => "finished",
        }
    }

    /// Whether moving from `self` to `next` is a forward, single-step
    /// transition.
    pub fn can_transition_to(self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Pending, JobState::Running) | (JobState::Running, JobState::Finished)
        )
    }

    /// Validate a transition, returning the target state on success.
    pub fn transition(self, next: JobState) -> Result<JobState, CoreError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(CoreError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }

    /// State a newly created job record enters when it is accepted.
    ///
    /// A record with no state, or one already `pending`, is admitted. A
    /// record that has already moved on is not taken again.
    pub fn admit(current: Option<JobState>) -> Result<JobState, CoreError> {
        match current {
            None | Some(JobState::Pending) => Ok(JobState::Pending),
            Some(from) => Err(CoreError::InvalidTransition {
                from,
                to: JobState::Pending,
            }),
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobState::Pending),
            "running" => Ok(JobState::Running),
            "finished" => Ok(JobState::Finished),
            other => Err(CoreError::Validation(format!("Unknown job state: {other}"))),
        }
    }
}
