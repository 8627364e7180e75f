//! Job dispatch: from "job created" events to finished training runs.
//!
//! - [`Dispatcher`] -- registers this worker with the coordination
//!   service, accepts jobs addressed to it, and owns the worker pool.
//! - [`intake`] -- filters the creation feed and enqueues accepted jobs.
//! - [`queue`] -- the unbounded multi-consumer job queue.
//! - [`pool`] -- OS worker processes and their supervisors.
//! - [`child`] -- the worker-process side: runs the training function.
//! - [`protocol`] -- line-delimited JSON between supervisor and child.

pub mod child;
pub mod config;
pub mod dispatcher;
pub mod intake;
pub mod lifecycle;
pub mod pool;
pub mod protocol;
pub mod queue;
pub mod shutdown;

#[cfg(test)]
mod test_support;

pub use config::DispatcherConfig;
pub use dispatcher::{DispatchError, Dispatcher};
pub use pool::WorkerCommand;
