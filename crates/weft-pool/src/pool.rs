//! Worker pool bound to a single shared job queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::TRACING_TARGET_POOL;
use crate::executor::{Executor, TaskFn, TaskHandle, completion_pair};
use crate::job::Job;
use crate::metrics::{PoolMetrics, PoolMetricsSnapshot, WorkerMetricsSnapshot};
use crate::queue::JobQueue;
use crate::timer::TimerLane;
use crate::worker::Worker;
use weft_core::{Error, Result};

/// A pool of workers draining one shared FIFO queue.
///
/// Lifecycle: construct, add workers, `start`, `stop`. Delayed submissions
/// go through a timer lane owned by the pool and execute on the same
/// workers as everything else.
pub struct WorkerPool {
    name: String,
    queue: Arc<JobQueue>,
    workers: Mutex<Vec<Worker>>,
    metrics: Arc<PoolMetrics>,
    running: AtomicBool,
    timer: Mutex<Option<TimerLane>>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("workers", &self.worker_count())
            .field("running", &self.is_running())
            .finish()
    }
}

impl WorkerPool {
    /// Create an empty pool with a bounded job queue.
    pub fn new(name: impl Into<String>, queue_capacity: usize) -> Self {
        let name = name.into();
        Self {
            queue: Arc::new(JobQueue::bounded(name.clone(), queue_capacity)),
            name,
            workers: Mutex::new(Vec::new()),
            metrics: Arc::new(PoolMetrics::default()),
            running: AtomicBool::new(false),
            timer: Mutex::new(None),
        }
    }

    /// Create a pool pre-populated with `count` workers.
    pub fn with_workers(name: impl Into<String>, queue_capacity: usize, count: usize) -> Self {
        let pool = Self::new(name, queue_capacity);
        for index in 0..count {
            let title = format!("{}-worker-{index}", pool.name);
            // Registration on a stopped pool cannot fail.
            let _ = pool.add_worker(title);
        }
        pool
    }

    /// The pool name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The shared job queue.
    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    /// Register a worker. Fails once the pool is running.
    pub fn add_worker(&self, title: impl Into<String>) -> Result<()> {
        if self.is_running() {
            return Err(Error::already_running(format!(
                "pool '{}' is running; workers must be registered before start",
                self.name
            )));
        }
        let worker = Worker::new(title, Arc::clone(&self.queue), Arc::clone(&self.metrics));
        self.lock_workers().push(worker);
        Ok(())
    }

    fn lock_workers(&self) -> std::sync::MutexGuard<'_, Vec<Worker>> {
        self.workers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start every registered worker and the timer lane.
    ///
    /// Fails with `StartFailure` when no workers are registered.
    pub fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(Error::already_running(format!(
                "pool '{}' is already running",
                self.name
            )));
        }

        {
            let mut workers = self.lock_workers();
            if workers.is_empty() {
                self.running.store(false, Ordering::Release);
                return Err(Error::new(
                    weft_core::ErrorKind::StartFailure,
                    format!("pool '{}' has no workers registered", self.name),
                ));
            }

            self.metrics.set_worker_count(workers.len());
            for worker in workers.iter_mut() {
                worker.start()?;
            }
        }

        self.start_timer_lane();
        debug!(
            target: TRACING_TARGET_POOL,
            pool = %self.name,
            workers = self.worker_count(),
            "pool started"
        );
        Ok(())
    }

    fn start_timer_lane(&self) {
        *self
            .timer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) =
            Some(TimerLane::spawn(&self.name, Arc::clone(&self.queue)));
    }

    /// Stop the pool.
    ///
    /// With `drain` the queue is flipped to stopping and the workers keep
    /// executing until it is empty; without it pending jobs are discarded.
    /// Workers are joined in registration order.
    pub async fn stop(&self, drain: bool) -> Result<()> {
        if !self.running.swap(false, Ordering::AcqRel) {
            return Err(Error::not_running(format!(
                "pool '{}' is not running",
                self.name
            )));
        }

        let timer = self
            .timer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(lane) = timer {
            lane.stop().await;
        }

        self.queue.stop();
        if !drain {
            self.queue.clear();
        }

        let handles: Vec<(String, Option<JoinHandle<()>>)> = {
            let mut workers = self.lock_workers();
            workers
                .iter_mut()
                .map(|worker| (worker.title().to_owned(), worker.take_handle()))
                .collect()
        };
        for (title, handle) in handles {
            if let Some(handle) = handle {
                let _ = handle.await;
            }
            debug!(
                target: TRACING_TARGET_POOL,
                pool = %self.name,
                worker = %title,
                "worker joined"
            );
        }

        debug!(
            target: TRACING_TARGET_POOL,
            pool = %self.name,
            drained = drain,
            "pool stopped"
        );
        Ok(())
    }

    /// Current pool counters including queue depth.
    pub fn metrics(&self) -> PoolMetricsSnapshot {
        self.metrics.snapshot(self.queue.len())
    }

    /// Per-worker counters keyed by worker title.
    pub fn worker_metrics(&self) -> Vec<(String, WorkerMetricsSnapshot)> {
        self.lock_workers()
            .iter()
            .map(|worker| (worker.title().to_owned(), worker.metrics()))
            .collect()
    }

    /// Broadcast a wake interval to every worker.
    pub fn set_wake_interval(&self, interval: Option<Duration>) {
        for worker in self.lock_workers().iter() {
            worker.set_wake_interval(interval);
        }
    }
}

#[async_trait]
impl Executor for WorkerPool {
    fn submit(&self, task: TaskFn) -> Result<TaskHandle> {
        self.execute(Job::callback("task", task))
    }

    fn submit_delayed(&self, task: TaskFn, delay: Duration) -> Result<TaskHandle> {
        if !self.is_running() {
            return Err(Error::not_running(format!(
                "pool '{}' is not running",
                self.name
            )));
        }

        let mut job = Job::callback("delayed-task", task);
        let handle = completion_pair(&mut job);

        let timer = self
            .timer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match timer.as_ref() {
            Some(lane) => {
                lane.schedule(job, delay, &self.name)?;
                Ok(handle)
            }
            None => Err(Error::not_running(format!(
                "pool '{}' has no timer lane",
                self.name
            ))),
        }
    }

    fn execute(&self, mut job: Job) -> Result<TaskHandle> {
        if !self.is_running() {
            return Err(Error::not_running(format!(
                "pool '{}' is not running",
                self.name
            )));
        }
        let handle = completion_pair(&mut job);
        self.queue.enqueue(job)?;
        Ok(handle)
    }

    fn worker_count(&self) -> usize {
        self.lock_workers().len()
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn pending_tasks(&self) -> usize {
        self.queue.len()
    }

    async fn shutdown(&self, wait_for_completion: bool) -> Result<()> {
        match self.stop(wait_for_completion).await {
            Ok(()) => Ok(()),
            // Shutdown of an already-stopped executor is a no-op.
            Err(error) if error.kind() == weft_core::ErrorKind::NotRunning => Ok(()),
            Err(error) => Err(error),
        }
    }
}
