//! Pool of isolated worker processes.
//!
//! Each worker is an OS process started from a [`WorkerCommand`] (by
//! default the current executable in worker-child mode) plus a supervisor
//! task in this process. The supervisor pops a job from the shared queue,
//! writes it to the child's stdin, marks it `running`, waits for the
//! child's `finished` reply, and marks it `finished`. A worker runs one
//! job at a time, so at most `size` jobs are running at once.
//!
//! If the child dies mid-job the job is left `running` and that worker is
//! not replaced; the pool keeps serving with the remaining workers. A
//! child that dies between jobs takes no further jobs, and a job it was
//! about to receive goes back to the queue for another worker.

use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use trainq_core::{JobMessage, JobState};
use trainq_datastore::Service;

use crate::lifecycle::advance_job_state;
use crate::protocol::{self, WorkerReply, WORKER_CHILD_ENV};
use crate::queue::JobReceiver;

// ---------------------------------------------------------------------------
// WorkerCommand
// ---------------------------------------------------------------------------

/// How to start one worker process.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    program: PathBuf,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    /// Re-execute the running binary as a worker child.
    pub fn current_exe() -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &std::path::Path {
        &self.program
    }

    fn build(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .env(WORKER_CHILD_ENV, "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        cmd
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Worker pool size must be at least 1")]
    EmptyPool,

    #[error("Failed to start worker {index} ({program}): {source}")]
    Spawn {
        index: usize,
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Worker {index} was started without a {stream} pipe")]
    MissingPipe { index: usize, stream: &'static str },
}

/// Why the link to a worker child broke.
#[derive(Debug, thiserror::Error)]
enum LinkError {
    #[error("pipe I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode job: {0}")]
    Encode(#[from] protocol::ProtocolError),

    #[error("worker closed its output")]
    Closed,
}

// ---------------------------------------------------------------------------
// WorkerPool
// ---------------------------------------------------------------------------

/// A fixed set of worker processes consuming one job queue.
pub struct WorkerPool {
    cancel: CancellationToken,
    workers: Vec<WorkerHandle>,
    live: Arc<AtomicUsize>,
}

struct WorkerHandle {
    index: usize,
    pid: Option<u32>,
    task: JoinHandle<()>,
}

impl WorkerPool {
    /// Start `size` worker processes, each with a supervisor consuming
    /// `queue` and reporting job state through `jobs`.
    ///
    /// If any worker fails to start, those already started are stopped
    /// before the error is returned.
    pub async fn spawn(
        size: usize,
        command: &WorkerCommand,
        queue: JobReceiver,
        jobs: Service,
    ) -> Result<Self, PoolError> {
        if size == 0 {
            return Err(PoolError::EmptyPool);
        }

        let mut pool = Self {
            cancel: CancellationToken::new(),
            workers: Vec::with_capacity(size),
            live: Arc::new(AtomicUsize::new(0)),
        };

        for index in 0..size {
            match start_worker(index, command) {
                Ok((child, stdin, stdout)) => {
                    let pid = child.id();
                    pool.live.fetch_add(1, Ordering::SeqCst);
                    let task = tokio::spawn(supervise(
                        Supervisor {
                            index,
                            queue: queue.clone(),
                            jobs: jobs.clone(),
                            cancel: pool.cancel.clone(),
                            live: Arc::clone(&pool.live),
                        },
                        child,
                        stdin,
                        stdout,
                    ));
                    tracing::info!(worker = index, pid = ?pid, "Worker process started");
                    pool.workers.push(WorkerHandle { index, pid, task });
                }
                Err(e) => {
                    pool.shutdown().await;
                    return Err(e);
                }
            }
        }

        Ok(pool)
    }

    /// Number of workers the pool was started with.
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Number of worker processes that have not yet exited.
    pub fn live_workers(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// OS process ids of the workers, as recorded at start.
    pub fn pids(&self) -> Vec<u32> {
        self.workers.iter().filter_map(|w| w.pid).collect()
    }

    /// Signal every supervisor to kill its worker, without waiting.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Kill every worker process and wait until all have exited.
    ///
    /// Jobs in progress are abandoned in their current state.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for worker in self.workers {
            if let Err(e) = worker.task.await {
                tracing::error!(worker = worker.index, error = %e, "Worker supervisor panicked");
            }
        }
        tracing::info!("Worker pool stopped");
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.size())
            .field("live", &self.live_workers())
            .field("pids", &self.pids())
            .finish_non_exhaustive()
    }
}

fn start_worker(
    index: usize,
    command: &WorkerCommand,
) -> Result<(Child, ChildStdin, ChildStdout), PoolError> {
    let mut child = command.build().spawn().map_err(|source| PoolError::Spawn {
        index,
        program: command.program.display().to_string(),
        source,
    })?;
    let stdin = child
        .stdin
        .take()
        .ok_or(PoolError::MissingPipe { index, stream: "stdin" })?;
    let stdout = child
        .stdout
        .take()
        .ok_or(PoolError::MissingPipe { index, stream: "stdout" })?;
    Ok((child, stdin, stdout))
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

struct Supervisor {
    index: usize,
    queue: JobReceiver,
    jobs: Service,
    cancel: CancellationToken,
    live: Arc<AtomicUsize>,
}

/// How a supervisor's job loop ended.
enum Exit {
    Cancelled,
    QueueClosed,
    /// The child went away between jobs. Any job it was about to be given
    /// has been put back on the queue.
    ProcessGone { reason: String },
    ProcessLost { job_id: String, reason: LinkError },
}

/// Pipes to one worker child.
struct WorkerLink {
    stdin: ChildStdin,
    replies: BufReader<ChildStdout>,
    line: Vec<u8>,
}

impl WorkerLink {
    fn new(stdin: ChildStdin, stdout: ChildStdout) -> Self {
        Self {
            stdin,
            replies: BufReader::new(stdout),
            line: Vec::new(),
        }
    }

    async fn send(&mut self, job: &JobMessage) -> Result<(), LinkError> {
        let line = protocol::encode_line(job)?;
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;
        Ok(())
    }

    /// Read stdout until the child reports `job_id` finished.
    ///
    /// Output is read as raw bytes; lines that are not valid UTF-8 are
    /// treated like any other non-protocol output.
    async fn await_finished(&mut self, worker: usize, job_id: &str) -> Result<(), LinkError> {
        loop {
            self.line.clear();
            if self.replies.read_until(b'\n', &mut self.line).await? == 0 {
                return Err(LinkError::Closed);
            }
            let line = String::from_utf8_lossy(&self.line);
            match protocol::decode_reply(&line) {
                Ok(WorkerReply::Finished { job_id: done }) if done == job_id => return Ok(()),
                Ok(WorkerReply::Finished { job_id: other }) => {
                    tracing::warn!(worker, expected = job_id, got = %other, "Unexpected completion reply");
                }
                Err(_) => {
                    tracing::debug!(worker, line = %line.trim_end(), "Skipping non-protocol worker output");
                }
            }
        }
    }
}

async fn supervise(sup: Supervisor, mut child: Child, stdin: ChildStdin, stdout: ChildStdout) {
    let mut link = WorkerLink::new(stdin, stdout);

    let exit = tokio::select! {
        _ = sup.cancel.cancelled() => Exit::Cancelled,
        exit = run_jobs(&sup, &mut child, &mut link) => exit,
    };

    match exit {
        Exit::Cancelled => {
            if let Err(e) = child.start_kill() {
                tracing::warn!(worker = sup.index, error = %e, "Failed to kill worker process");
            }
        }
        Exit::QueueClosed => {
            // EOF on stdin tells the child to exit.
            drop(link);
        }
        Exit::ProcessGone { reason } => {
            tracing::error!(
                worker = sup.index,
                error = %reason,
                "Worker process exited while idle; worker not replaced",
            );
            drop(link);
            let _ = child.start_kill();
        }
        Exit::ProcessLost { job_id, reason } => {
            tracing::error!(
                worker = sup.index,
                job_id = %job_id,
                error = %reason,
                "Worker process lost mid-job; job left running, worker not replaced",
            );
            drop(link);
            if let Err(e) = child.start_kill() {
                tracing::warn!(worker = sup.index, error = %e, "Failed to kill worker process");
            }
        }
    }

    let exited = tokio::select! {
        status = child.wait() => Some(status),
        _ = sup.cancel.cancelled() => None,
    };
    let status = match exited {
        Some(status) => status,
        None => {
            let _ = child.start_kill();
            child.wait().await
        }
    };
    match status {
        Ok(status) => tracing::info!(worker = sup.index, status = %status, "Worker process exited"),
        Err(e) => tracing::warn!(worker = sup.index, error = %e, "Failed to reap worker process"),
    }
    sup.live.fetch_sub(1, Ordering::SeqCst);
}

async fn run_jobs(sup: &Supervisor, child: &mut Child, link: &mut WorkerLink) -> Exit {
    loop {
        // Stop taking jobs as soon as the child is gone.
        let job = tokio::select! {
            biased;
            status = child.wait() => {
                return Exit::ProcessGone { reason: describe_exit(status) };
            }
            job = sup.queue.pop() => job,
        };
        let Some(job) = job else {
            return Exit::QueueClosed;
        };
        let job_id = job.job_id.clone();

        match child.try_wait() {
            Ok(None) => {}
            Ok(Some(status)) => {
                give_back(sup, job);
                return Exit::ProcessGone { reason: describe_exit(Ok(status)) };
            }
            Err(e) => {
                give_back(sup, job);
                return Exit::ProcessGone { reason: e.to_string() };
            }
        }

        // A job the child never received is still pending.
        if let Err(reason) = link.send(&job).await {
            give_back(sup, job);
            return Exit::ProcessGone { reason: reason.to_string() };
        }

        advance_job_state(&sup.jobs, &job_id, JobState::Pending, JobState::Running).await;
        tracing::info!(worker = sup.index, job_id = %job_id, "Job handed to worker");

        if let Err(reason) = link.await_finished(sup.index, &job_id).await {
            return Exit::ProcessLost { job_id, reason };
        }

        advance_job_state(&sup.jobs, &job_id, JobState::Running, JobState::Finished).await;
        tracing::info!(worker = sup.index, job_id = %job_id, "Job finished");
    }
}

/// Return a job this worker can no longer run to the shared queue.
fn give_back(sup: &Supervisor, job: JobMessage) {
    let job_id = job.job_id.clone();
    match sup.queue.requeue(job) {
        Ok(()) => tracing::warn!(worker = sup.index, job_id = %job_id, "Job returned to the queue"),
        Err(e) => tracing::error!(worker = sup.index, error = %e, "Failed to return job to the queue"),
    }
}

fn describe_exit(status: std::io::Result<ExitStatus>) -> String {
    match status {
        Ok(status) => format!("worker exited with {status}"),
        Err(e) => format!("failed to wait for worker: {e}"),
    }
}
