//! The dispatcher: one registered worker identity, one job intake, one
//! pool of worker processes.
//!
//! Lifecycle:
//!
//! 1. [`Dispatcher::start`] connects to the coordination service,
//!    subscribes to its change feed, starts the worker pool, registers a
//!    [`WorkerRecord`] advertising the accepted parameters, and starts the
//!    intake.
//! 2. Jobs created for this worker id flow `pending` -> `running` ->
//!    `finished` through the queue and the pool.
//! 3. [`Dispatcher::stop`] stops the intake, removes the worker record,
//!    kills the worker processes, and disconnects. It is idempotent, and
//!    dropping a running dispatcher performs a best-effort version of it.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use trainq_core::identity::generate_worker_id;
use trainq_core::{CoreError, DocId, ParameterSchema, WorkerRecord};
use trainq_datastore::{DataStore, DataStoreError, Service};

use crate::config::DispatcherConfig;
use crate::intake::JobIntake;
use crate::pool::{PoolError, WorkerCommand, WorkerPool};
use crate::queue;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Invalid dispatcher configuration: {0}")]
    Config(#[from] CoreError),

    #[error("Failed to connect to the coordination service: {0}")]
    Connect(#[source] DataStoreError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("Dispatcher is already running")]
    AlreadyRunning,
}

/// Resources that exist only while the dispatcher runs.
struct Running {
    intake_cancel: CancellationToken,
    intake: JoinHandle<()>,
    pool: WorkerPool,
    remote_id: Option<DocId>,
}

enum Lifecycle {
    Idle,
    Running(Running),
    Stopped,
}

pub struct Dispatcher {
    worker_id: String,
    schema: ParameterSchema,
    pool_size: usize,
    command: WorkerCommand,
    store: Arc<dyn DataStore>,
    jobs: Service,
    workers: Service,
    state: Lifecycle,
}

impl Dispatcher {
    /// Build a dispatcher without touching the network.
    ///
    /// The worker id comes from `config.worker_id`, or is generated here
    /// so it is known before [`start`](Self::start).
    pub fn new(
        config: DispatcherConfig,
        schema: ParameterSchema,
        command: WorkerCommand,
        store: Arc<dyn DataStore>,
    ) -> Result<Self, DispatchError> {
        config.validate()?;
        let worker_id = config.worker_id.clone().unwrap_or_else(generate_worker_id);
        let jobs = Service::new(Arc::clone(&store), config.training_service_name());
        let workers = Service::new(Arc::clone(&store), config.worker_service_name());

        Ok(Self {
            worker_id,
            schema,
            pool_size: config.pool_size,
            command,
            store,
            jobs,
            workers,
            state: Lifecycle::Idle,
        })
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Store-assigned id of the registered worker record, if registration
    /// succeeded.
    pub fn remote_id(&self) -> Option<&str> {
        match &self.state {
            Lifecycle::Running(running) => running.remote_id.as_deref(),
            _ => None,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, Lifecycle::Running(_))
    }

    /// Worker processes still alive. Zero unless running.
    pub fn live_workers(&self) -> usize {
        match &self.state {
            Lifecycle::Running(running) => running.pool.live_workers(),
            _ => 0,
        }
    }

    pub fn worker_pids(&self) -> Vec<u32> {
        match &self.state {
            Lifecycle::Running(running) => running.pool.pids(),
            _ => Vec::new(),
        }
    }

    pub fn training_service(&self) -> &str {
        self.jobs.name()
    }

    pub fn worker_service(&self) -> &str {
        self.workers.name()
    }

    /// Connect, register, and begin accepting jobs.
    ///
    /// A registration failure is logged and the dispatcher keeps running
    /// without a remote record. A stopped dispatcher may be started again
    /// under the same worker id.
    pub async fn start(&mut self) -> Result<(), DispatchError> {
        if self.is_running() {
            return Err(DispatchError::AlreadyRunning);
        }

        self.store.connect().await.map_err(DispatchError::Connect)?;
        // Subscribe before anything is registered so no creation addressed
        // to this worker can be missed.
        let events = self.store.subscribe();

        let (job_tx, job_rx) = queue::channel();
        let pool = match WorkerPool::spawn(self.pool_size, &self.command, job_rx, self.jobs.clone()).await {
            Ok(pool) => pool,
            Err(e) => {
                self.store.disconnect().await;
                return Err(e.into());
            }
        };

        let remote_id = self.register().await;

        let intake_cancel = CancellationToken::new();
        let intake = tokio::spawn(
            JobIntake::new(self.worker_id.clone(), self.jobs.clone(), job_tx)
                .run(events, intake_cancel.clone()),
        );

        tracing::info!(
            worker_id = %self.worker_id,
            remote_id = ?remote_id,
            pool_size = pool.size(),
            training_service = self.jobs.name(),
            "Dispatcher started",
        );

        self.state = Lifecycle::Running(Running {
            intake_cancel,
            intake,
            pool,
            remote_id,
        });
        Ok(())
    }

    /// Stop accepting jobs, deregister, and kill the worker processes.
    ///
    /// Safe to call any number of times.
    pub async fn stop(&mut self) {
        let Lifecycle::Running(running) = std::mem::replace(&mut self.state, Lifecycle::Stopped) else {
            return;
        };

        running.intake_cancel.cancel();
        if let Err(e) = running.intake.await {
            tracing::error!(error = %e, "Job intake task panicked");
        }

        if let Some(remote_id) = &running.remote_id {
            match self.workers.remove(remote_id).await {
                Ok(_) => tracing::info!(worker_id = %self.worker_id, "Worker record removed"),
                Err(e) => tracing::error!(
                    worker_id = %self.worker_id,
                    error = %e,
                    "Failed to remove worker record",
                ),
            }
        }

        running.pool.shutdown().await;
        self.store.disconnect().await;
        tracing::info!(worker_id = %self.worker_id, "Dispatcher stopped");
    }

    /// Run until `shutdown` resolves, then stop.
    ///
    /// If `start` fails, nothing is left running and the error is returned
    /// without waiting on `shutdown`.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<(), DispatchError>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;
        shutdown.await;
        self.stop().await;
        Ok(())
    }

    async fn register(&self) -> Option<DocId> {
        let record = WorkerRecord::new(self.worker_id.clone(), self.schema.clone());
        let body = match serde_json::to_value(&record) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode worker record");
                return None;
            }
        };

        match self.workers.create(body).await {
            Ok(created) => {
                let remote_id = created
                    .get("_id")
                    .and_then(|id| id.as_str())
                    .map(str::to_string);
                if remote_id.is_none() {
                    tracing::warn!(worker_id = %self.worker_id, "Worker record created without an _id");
                }
                remote_id
            }
            Err(e) => {
                tracing::error!(
                    worker_id = %self.worker_id,
                    service = self.workers.name(),
                    error = %e,
                    "Failed to register worker record",
                );
                None
            }
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("worker_id", &self.worker_id)
            .field("training_service", &self.jobs.name())
            .field("worker_service", &self.workers.name())
            .field("pool_size", &self.pool_size)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        let Lifecycle::Running(running) = std::mem::replace(&mut self.state, Lifecycle::Stopped) else {
            return;
        };
        tracing::warn!(worker_id = %self.worker_id, "Dispatcher dropped while running; stopping");

        running.intake_cancel.cancel();
        running.pool.cancel();

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let store = Arc::clone(&self.store);
        let workers = self.workers.clone();
        let worker_id = self.worker_id.clone();
        handle.spawn(async move {
            if let Some(remote_id) = running.remote_id.as_deref() {
                if let Err(e) = workers.remove(remote_id).await {
                    tracing::error!(worker_id = %worker_id, error = %e, "Failed to remove worker record");
                }
            }
            running.pool.shutdown().await;
            store.disconnect().await;
        });
    }
}
