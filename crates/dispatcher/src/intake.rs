//! Job intake: turns "job created" events into queued work.
//!
//! Every created event on the training service is offered to
//! [`JobIntake::on_job_created`]. Jobs addressed to another dispatcher are
//! ignored without touching the store. Accepted jobs are marked `pending`
//! and pushed onto the queue, in arrival order. A record that is already
//! `running` or `finished` is never queued again.

use serde_json::Value;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use trainq_core::{DocId, JobMessage, JobRecord, JobState};
use trainq_datastore::{Service, ServiceEvent};

use crate::lifecycle::patch_job_state;
use crate::queue::JobSender;

/// What happened to one created event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntakeOutcome {
    /// Marked pending and queued.
    Enqueued(DocId),
    /// Addressed to a different dispatcher, or not addressed at all.
    Ignored,
    /// Addressed to this dispatcher but could not be queued.
    Rejected(String),
}

pub struct JobIntake {
    worker_id: String,
    jobs: Service,
    queue: JobSender,
}

impl JobIntake {
    pub fn new(worker_id: impl Into<String>, jobs: Service, queue: JobSender) -> Self {
        Self {
            worker_id: worker_id.into(),
            jobs,
            queue,
        }
    }

    /// Handle one newly created job document.
    pub async fn on_job_created(&self, data: &Value) -> IntakeOutcome {
        // Cheap ownership check before decoding anything else.
        let addressed_here = data
            .get("worker_id")
            .and_then(Value::as_str)
            .is_some_and(|id| id == self.worker_id);
        if !addressed_here {
            return IntakeOutcome::Ignored;
        }

        let record = match JobRecord::from_document(data) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed job record");
                return IntakeOutcome::Rejected(e.to_string());
            }
        };
        let job_id = record.id.clone();

        let state = match JobState::admit(record.state) {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Skipping job that already left pending");
                return IntakeOutcome::Rejected(e.to_string());
            }
        };
        patch_job_state(&self.jobs, &job_id, state).await;

        match self.queue.push(JobMessage::from(record)) {
            Ok(()) => {
                tracing::info!(job_id = %job_id, "Job accepted");
                IntakeOutcome::Enqueued(job_id)
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Failed to enqueue job");
                IntakeOutcome::Rejected(e.to_string())
            }
        }
    }

    /// Consume change events until `cancel` fires or the feed closes.
    pub async fn run(self, mut events: broadcast::Receiver<ServiceEvent>, cancel: CancellationToken) {
        tracing::info!(
            worker_id = %self.worker_id,
            service = self.jobs.name(),
            "Job intake started",
        );
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Ok(event) if event.is_created_in(self.jobs.name()) => {
                    self.on_job_created(&event.data).await;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Job intake fell behind the event feed; events dropped");
                }
                Err(RecvError::Closed) => {
                    tracing::warn!("Event feed closed");
                    break;
                }
            }
        }
        tracing::info!(worker_id = %self.worker_id, "Job intake stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;
    use trainq_datastore::{DataStore, MemoryDataStore};

    use super::*;
    use crate::queue;

    struct Fixture {
        store: Arc<MemoryDataStore>,
        intake: JobIntake,
        rx: queue::JobReceiver,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryDataStore::new());
        let jobs = Service::new(store.clone(), "jobs");
        let (tx, rx) = queue::channel();
        Fixture {
            store,
            intake: JobIntake::new("me", jobs, tx),
            rx,
        }
    }

    #[tokio::test]
    async fn own_job_is_marked_pending_and_queued() {
        let f = fixture();
        let doc = f
            .store
            .create("jobs", json!({"_id": "j1", "worker_id": "me", "training_parameters": {"lr": 0.5}}))
            .await
            .unwrap();

        assert_eq!(f.intake.on_job_created(&doc).await, IntakeOutcome::Enqueued("j1".into()));
        assert_eq!(f.store.get("jobs", "j1").await.unwrap()["state"], "pending");

        let job = f.rx.pop().await.unwrap();
        assert_eq!(job.job_id, "j1");
        assert_eq!(job.worker_id, "me");
        assert_eq!(job.training_parameters["lr"], json!(0.5));
    }

    #[tokio::test]
    async fn foreign_job_is_left_untouched() {
        let f = fixture();
        let doc = f
            .store
            .create("jobs", json!({"_id": "j2", "worker_id": "someone-else"}))
            .await
            .unwrap();

        assert_eq!(f.intake.on_job_created(&doc).await, IntakeOutcome::Ignored);
        assert!(f.store.get("jobs", "j2").await.unwrap().get("state").is_none());
        assert_eq!(f.rx.try_len(), Some(0));
    }

    #[tokio::test]
    async fn unaddressed_job_is_ignored() {
        let f = fixture();
        assert_eq!(f.intake.on_job_created(&json!({"_id": "j3"})).await, IntakeOutcome::Ignored);
    }

    #[tokio::test]
    async fn own_job_without_id_is_rejected() {
        let f = fixture();
        let outcome = f.intake.on_job_created(&json!({"worker_id": "me"})).await;
        assert!(matches!(outcome, IntakeOutcome::Rejected(_)));
        assert_eq!(f.rx.try_len(), Some(0));
    }

    #[tokio::test]
    async fn failed_pending_update_still_enqueues() {
        let f = fixture();
        let doc = f
            .store
            .create("jobs", json!({"_id": "j6", "worker_id": "me"}))
            .await
            .unwrap();
        f.store.set_service_offline("jobs", true);

        assert_eq!(f.intake.on_job_created(&doc).await, IntakeOutcome::Enqueued("j6".into()));
        assert_eq!(f.rx.pop().await.unwrap().job_id, "j6");
    }

    #[tokio::test]
    async fn job_past_pending_is_not_requeued() {
        let f = fixture();
        let doc = f
            .store
            .create("jobs", json!({"_id": "j4", "worker_id": "me", "state": "running"}))
            .await
            .unwrap();

        let outcome = f.intake.on_job_created(&doc).await;
        assert!(matches!(outcome, IntakeOutcome::Rejected(_)));
        assert_eq!(f.store.get("jobs", "j4").await.unwrap()["state"], "running");
        assert_eq!(f.rx.try_len(), Some(0));

        let doc = f
            .store
            .create("jobs", json!({"_id": "j5", "worker_id": "me", "state": "pending"}))
            .await
            .unwrap();
        assert_eq!(f.intake.on_job_created(&doc).await, IntakeOutcome::Enqueued("j5".into()));
    }

    #[tokio::test]
    async fn run_filters_the_feed_in_order() {
        let f = fixture();
        let events = f.store.subscribe();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(f.intake.run(events, cancel.clone()));

        f.store.create("other_service", json!({"_id": "x", "worker_id": "me"})).await.unwrap();
        for (id, worker) in [("a", "me"), ("b", "you"), ("c", "me")] {
            f.store.create("jobs", json!({"_id": id, "worker_id": worker})).await.unwrap();
        }
        // Patches are not creations.
        f.store.patch("jobs", "b", json!({"worker_id": "me"})).await.unwrap();

        let first = tokio::time::timeout(Duration::from_secs(5), f.rx.pop()).await.unwrap().unwrap();
        let second = tokio::time::timeout(Duration::from_secs(5), f.rx.pop()).await.unwrap().unwrap();
        assert_eq!(first.job_id, "a");
        assert_eq!(second.job_id, "c");

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
        assert_eq!(f.rx.try_len(), Some(0));
    }
}
