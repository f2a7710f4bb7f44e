//! Executor contract consumed by the message bus.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::job::Job;
use weft_core::{Error, Result};

/// Boxed unit of work accepted by [`Executor::submit`].
pub type TaskFn = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

/// Completion handle for submitted work.
///
/// Resolves with the job's result once a worker has executed it. If the job
/// is discarded before execution (queue cleared or pool stopped without
/// draining) the handle resolves with a cancellation error.
#[derive(Debug)]
pub struct TaskHandle {
    rx: oneshot::Receiver<Result<()>>,
}

impl TaskHandle {
    pub(crate) fn new(rx: oneshot::Receiver<Result<()>>) -> Self {
        Self { rx }
    }

    /// Wait for the submitted work to complete.
    pub async fn wait(self) -> Result<()> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::cancelled("job was discarded before execution")),
        }
    }
}

/// Attach a completion channel to a job, returning the matching handle.
pub(crate) fn completion_pair(job: &mut Job) -> TaskHandle {
    let (tx, rx) = oneshot::channel();
    job.set_completion(tx);
    TaskHandle::new(rx)
}

/// Contract every job executor satisfies.
///
/// The bus depends only on this trait; any implementation may be plugged
/// in. Delayed submission must share the executor's worker pool rather than
/// detaching free-running tasks.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Submit a closure for execution.
    fn submit(&self, task: TaskFn) -> Result<TaskHandle>;

    /// Submit a closure for execution after `delay`.
    fn submit_delayed(&self, task: TaskFn, delay: Duration) -> Result<TaskHandle>;

    /// Submit a prepared job for execution.
    fn execute(&self, job: Job) -> Result<TaskHandle>;

    /// Number of workers serving this executor.
    fn worker_count(&self) -> usize;

    /// Whether the executor accepts work.
    fn is_running(&self) -> bool;

    /// Number of jobs waiting to be executed.
    fn pending_tasks(&self) -> usize;

    /// Stop the executor, optionally draining pending work first.
    async fn shutdown(&self, wait_for_completion: bool) -> Result<()>;
}

/// Convenience methods over any [`Executor`].
pub trait ExecutorExt: Executor {
    /// Submit a named closure without boxing at the call site.
    fn spawn_named(
        &self,
        name: &str,
        work: impl FnOnce() -> Result<()> + Send + 'static,
    ) -> Result<TaskHandle> {
        self.execute(Job::callback(name, work))
    }
}

impl<T: Executor + ?Sized> ExecutorExt for T {}
