//! Remote record shapes and the in-process job message.
//!
//! Field names follow the coordination service's wire format: the store
//! assigns `_id`, worker records advertise their schema under
//! `model_parameters`.

use serde::{Deserialize, Serialize};

use crate::job_state::JobState;
use crate::parameters::ParameterSchema;
use crate::types::{DocId, TrainingParameters};

// ---------------------------------------------------------------------------
// WorkerRecord
// ---------------------------------------------------------------------------

/// Document advertising one running dispatcher and the parameters its
/// training function accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRecord {
    /// Dispatcher identity that jobs are addressed to.
    #[serde(rename = "worker_id")]
    pub id: String,

    #[serde(rename = "model_parameters")]
    pub accepted_parameters: ParameterSchema,

    /// Store-assigned document id, known once the record is created.
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<DocId>,
}

impl WorkerRecord {
    pub fn new(id: impl Into<String>, accepted_parameters: ParameterSchema) -> Self {
        Self {
            id: id.into(),
            accepted_parameters,
            remote_id: None,
        }
    }
}

// ---------------------------------------------------------------------------
// JobRecord
// ---------------------------------------------------------------------------

/// Document representing one submitted training job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    #[serde(rename = "_id")]
    pub id: DocId,

    /// Identity of the dispatcher the job is addressed to.
    pub worker_id: String,

    #[serde(default)]
    pub training_parameters: TrainingParameters,

    /// Absent until a dispatcher accepts the job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<JobState>,
}

impl JobRecord {
    /// Decode a job record from a raw store document.
    pub fn from_document(doc: &serde_json::Value) -> Result<Self, serde_json::Error> {
        JobRecord::deserialize(doc)
    }
}

// ---------------------------------------------------------------------------
// JobMessage
// ---------------------------------------------------------------------------

/// The unit of work carried by the job queue and handed to a worker
/// process. Never persisted; consumed exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMessage {
    pub training_parameters: TrainingParameters,
    pub job_id: DocId,
    pub worker_id: String,
}

impl From<JobRecord> for JobMessage {
    fn from(record: JobRecord) -> Self {
        Self {
            training_parameters: record.training_parameters,
            job_id: record.id,
            worker_id: record.worker_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::parameters::ParameterType;

    #[test]
    fn worker_record_uses_wire_field_names() {
        let mut schema = ParameterSchema::new();
        schema.insert("lr".into(), ParameterType::Float);
        let record = WorkerRecord::new("abc", schema);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json, json!({"worker_id": "abc", "model_parameters": {"lr": "float"}}));
    }

    #[test]
    fn worker_record_reads_remote_id() {
        let doc = json!({"_id": "64a6", "worker_id": "abc", "model_parameters": {}});
        let record: WorkerRecord = serde_json::from_value(doc).unwrap();
        assert_eq!(record.remote_id.as_deref(), Some("64a6"));
    }

    #[test]
    fn job_record_decodes_created_event_without_state() {
        let doc = json!({
            "_id": "job-1",
            "worker_id": "abc",
            "training_parameters": {"lr": 0.1, "epochs": 3}
        });
        let record = JobRecord::from_document(&doc).unwrap();
        assert_eq!(record.id, "job-1");
        assert!(record.state.is_none());
        assert_eq!(record.training_parameters["epochs"], 3);
        assert_eq!(record.worker_id, "abc");
    }

    #[test]
    fn job_record_missing_parameters_defaults_to_empty() {
        let doc = json!({"_id": "job-2", "worker_id": "abc", "state": "running"});
        let record = JobRecord::from_document(&doc).unwrap();
        assert!(record.training_parameters.is_empty());
        assert_eq!(record.state, Some(JobState::Running));
    }

    #[test]
    fn job_record_without_id_is_rejected() {
        let doc = json!({"worker_id": "abc"});
        assert!(JobRecord::from_document(&doc).is_err());
    }

    #[test]
    fn job_message_from_record_carries_ids() {
        let doc = json!({"_id": "job-3", "worker_id": "w", "training_parameters": {"a": 1}});
        let message = JobMessage::from(JobRecord::from_document(&doc).unwrap());
        assert_eq!(message.job_id, "job-3");
        assert_eq!(message.worker_id, "w");
        assert_eq!(message.training_parameters["a"], 1);
    }
}
