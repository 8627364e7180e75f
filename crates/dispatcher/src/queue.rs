//! Unbounded FIFO job queue shared by the intake and the worker pool.
//!
//! The intake holds a [`JobSender`]; every worker supervisor holds a clone
//! of the [`JobReceiver`]. Each message is delivered to exactly one
//! consumer. Once all senders are dropped, consumers drain the remaining
//! messages and then observe `None`.
//!
//! A consumer that took a job it cannot run puts it back with
//! [`JobReceiver::requeue`]. Requeued jobs go to the back of the queue.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use trainq_core::JobMessage;

/// The receiving side has been dropped; the job was not enqueued.
#[derive(Debug, thiserror::Error)]
#[error("Job queue is closed (job {job_id} not enqueued)")]
pub struct QueueClosed {
    pub job_id: String,
}

/// Producer handle.
#[derive(Debug, Clone)]
pub struct JobSender {
    tx: mpsc::UnboundedSender<JobMessage>,
}

/// Consumer handle. Clones share one underlying receiver.
#[derive(Debug, Clone)]
pub struct JobReceiver {
    rx: Arc<Mutex<mpsc::UnboundedReceiver<JobMessage>>>,
    /// Does not keep the queue open once every [`JobSender`] is gone.
    requeue: mpsc::WeakUnboundedSender<JobMessage>,
}

/// Create a connected sender/receiver pair.
pub fn channel() -> (JobSender, JobReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let requeue = tx.downgrade();
    (
        JobSender { tx },
        JobReceiver {
            rx: Arc::new(Mutex::new(rx)),
            requeue,
        },
    )
}

impl JobSender {
    /// Enqueue a job. Never blocks.
    pub fn push(&self, job: JobMessage) -> Result<(), QueueClosed> {
        self.tx.send(job).map_err(|e| QueueClosed {
            job_id: e.0.job_id,
        })
    }
}

impl JobReceiver {
    /// Wait for the next job.
    ///
    /// Returns `None` once every sender is gone and the queue is empty.
    /// Cancel-safe: a job is only removed from the queue when this future
    /// completes.
    pub async fn pop(&self) -> Option<JobMessage> {
        self.rx.lock().await.recv().await
    }

    /// Put back a job that was popped but never started.
    ///
    /// Fails once every sender is gone, since nothing would drain the
    /// queue for long after that.
    pub fn requeue(&self, job: JobMessage) -> Result<(), QueueClosed> {
        match self.requeue.upgrade() {
            Some(tx) => tx.send(job).map_err(|e| QueueClosed {
                job_id: e.0.job_id,
            }),
            None => Err(QueueClosed { job_id: job.job_id }),
        }
    }

    /// Number of jobs waiting, if the queue is not currently being
    /// awaited by another consumer.
    pub fn try_len(&self) -> Option<usize> {
        self.rx.try_lock().ok().map(|rx| rx.len())
    }
}
