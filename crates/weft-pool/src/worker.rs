//! Worker lifecycle and run loop.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::TRACING_TARGET_WORKER;
use crate::job::Job;
use crate::metrics::{PoolMetrics, WorkerMetrics, WorkerMetricsSnapshot};
use crate::queue::JobQueue;
use weft_core::{Error, Result};

/// Lifecycle states of a worker.
///
/// A worker is considered running while it is `Waiting` or `Working`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
pub enum WorkerState {
    Created = 0,
    Waiting = 1,
    Working = 2,
    Stopping = 3,
    Stopped = 4,
}

impl WorkerState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Waiting,
            2 => Self::Working,
            3 => Self::Stopping,
            4 => Self::Stopped,
            _ => Self::Created,
        }
    }

    /// Whether this state counts as running.
    pub fn is_running(self) -> bool {
        matches!(self, Self::Waiting | Self::Working)
    }
}

type Hook = Arc<dyn Fn() + Send + Sync>;

struct WorkerShared {
    title: String,
    state: AtomicU8,
    // Guarded separately from the queue wakeup path so interval updates
    // never contend with dispatch.
    wake_interval: Mutex<Option<Duration>>,
}

impl WorkerShared {
    fn set_state(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn wake_interval(&self) -> Option<Duration> {
        *self
            .wake_interval
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A single pool worker driving jobs off a shared queue.
///
/// The worker owns a background task spawned by [`Worker::start`]. The run
/// loop waits on the queue up to the configured wake interval, executes one
/// job per wakeup, and never lets a failing or panicking job take the task
/// down.
pub struct Worker {
    shared: Arc<WorkerShared>,
    queue: Arc<JobQueue>,
    pool_metrics: Arc<PoolMetrics>,
    metrics: Arc<WorkerMetrics>,
    shutdown: CancellationToken,
    handle: Option<JoinHandle<()>>,
    before_start: Option<Hook>,
    after_stop: Option<Hook>,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("title", &self.shared.title)
            .field("state", &self.state())
            .finish()
    }
}

impl Worker {
    /// Create a worker bound to the given queue and pool counters.
    pub fn new(
        title: impl Into<String>,
        queue: Arc<JobQueue>,
        pool_metrics: Arc<PoolMetrics>,
    ) -> Self {
        Self {
            shared: Arc::new(WorkerShared {
                title: title.into(),
                state: AtomicU8::new(WorkerState::Created as u8),
                wake_interval: Mutex::new(None),
            }),
            queue,
            pool_metrics,
            metrics: Arc::new(WorkerMetrics::default()),
            shutdown: CancellationToken::new(),
            handle: None,
            before_start: None,
            after_stop: None,
        }
    }

    /// Install a hook invoked on the worker task before the run loop starts.
    #[must_use]
    pub fn with_before_start(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.before_start = Some(Arc::new(hook));
        self
    }

    /// Install a hook invoked on the worker task after the run loop exits.
    #[must_use]
    pub fn with_after_stop(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.after_stop = Some(Arc::new(hook));
        self
    }

    /// The worker title, surfaced in logs.
    pub fn title(&self) -> &str {
        &self.shared.title
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WorkerState {
        self.shared.state()
    }

    /// Whether the worker is waiting for or executing work.
    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    /// Counters for this worker.
    pub fn metrics(&self) -> WorkerMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Update the wake interval; `None` waits indefinitely for work.
    pub fn set_wake_interval(&self, interval: Option<Duration>) {
        *self
            .shared
            .wake_interval
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = interval;
        self.queue.stop_waiting();
    }

    /// The currently configured wake interval.
    pub fn wake_interval(&self) -> Option<Duration> {
        self.shared.wake_interval()
    }

    /// Spawn the worker task. Fails with `AlreadyRunning` if the worker was
    /// started without an intervening stop.
    pub fn start(&mut self) -> Result<()> {
        if self.handle.is_some() {
            return Err(Error::already_running(format!(
                "worker '{}' is already running",
                self.shared.title
            )));
        }

        self.shutdown = CancellationToken::new();
        let loop_ctx = LoopCtx {
            shared: Arc::clone(&self.shared),
            queue: Arc::clone(&self.queue),
            pool_metrics: Arc::clone(&self.pool_metrics),
            metrics: Arc::clone(&self.metrics),
            shutdown: self.shutdown.clone(),
            before_start: self.before_start.clone(),
            after_stop: self.after_stop.clone(),
        };
        self.handle = Some(tokio::spawn(loop_ctx.run()));

        debug!(
            target: TRACING_TARGET_WORKER,
            worker = %self.shared.title,
            "worker started"
        );
        Ok(())
    }

    /// Signal the run loop to exit without waiting for it.
    pub(crate) fn signal_stop(&self) {
        self.shutdown.cancel();
    }

    pub(crate) fn take_handle(&mut self) -> Option<JoinHandle<()>> {
        self.handle.take()
    }

    /// Stop the worker and wait for its task to exit.
    ///
    /// Calling stop on a never-started worker returns `NotRunning`; calling
    /// it repeatedly after a successful stop is a no-op.
    pub async fn stop(&mut self) -> Result<()> {
        if self.handle.is_none() {
            if self.state() == WorkerState::Created {
                return Err(Error::not_running(format!(
                    "worker '{}' was never started",
                    self.shared.title
                )));
            }
            return Ok(());
        }

        self.shutdown.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        debug!(
            target: TRACING_TARGET_WORKER,
            worker = %self.shared.title,
            "worker stopped"
        );
        Ok(())
    }
}

struct LoopCtx {
    shared: Arc<WorkerShared>,
    queue: Arc<JobQueue>,
    pool_metrics: Arc<PoolMetrics>,
    metrics: Arc<WorkerMetrics>,
    shutdown: CancellationToken,
    before_start: Option<Hook>,
    after_stop: Option<Hook>,
}

impl LoopCtx {
    async fn run(self) {
        if let Some(hook) = &self.before_start {
            hook();
        }

        self.shared.set_state(WorkerState::Waiting);
        self.pool_metrics.worker_became_idle();

        loop {
            let interval = self.shared.wake_interval();
            let idle_started = Instant::now();

            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                dequeued = self.queue.dequeue() => {
                    self.metrics
                        .record_idle(idle_started.elapsed().as_nanos() as u64);
                    match dequeued {
                        Ok(job) => self.execute(job),
                        // Queue stopped and fully drained.
                        Err(_) => break,
                    }
                }
                _ = wake_tick(interval) => {
                    self.metrics
                        .record_idle(idle_started.elapsed().as_nanos() as u64);
                }
            }
        }

        self.pool_metrics.worker_became_busy();
        self.shared.set_state(WorkerState::Stopping);
        if let Some(hook) = &self.after_stop {
            hook();
        }
        self.shared.set_state(WorkerState::Stopped);
    }

    fn execute(&self, mut job: Job) {
        self.pool_metrics.worker_became_busy();
        self.shared.set_state(WorkerState::Working);

        let completion = job.take_completion();
        let name = job.name().to_owned();
        let started = Instant::now();

        let result = match catch_unwind(AssertUnwindSafe(|| job.run())) {
            Ok(result) => result,
            Err(_) => Err(Error::job_execution_failed(format!(
                "job '{name}' panicked"
            ))),
        };

        let proc_time_ns = started.elapsed().as_nanos() as u64;
        self.metrics.record_processed(proc_time_ns);
        // Cancellation is a normal shutdown event, not a failure.
        let succeeded = result.is_ok() || result.as_ref().is_err_and(Error::is_cancellation);
        self.pool_metrics.record_job(proc_time_ns, succeeded);

        if let Err(error) = &result {
            if !error.is_cancellation() {
                warn!(
                    target: TRACING_TARGET_WORKER,
                    worker = %self.shared.title,
                    job = %name,
                    error = %error,
                    "job execution failed"
                );
            }
        }

        if let Some(tx) = completion {
            let _ = tx.send(result);
        }

        self.shared.set_state(WorkerState::Waiting);
        self.pool_metrics.worker_became_idle();
    }
}

async fn wake_tick(interval: Option<Duration>) {
    match interval {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use weft_core::ErrorKind;

    fn test_worker() -> (Worker, Arc<JobQueue>) {
        let queue = Arc::new(JobQueue::unbounded("worker-test"));
        let metrics = Arc::new(PoolMetrics::default());
        let worker = Worker::new("test-worker", Arc::clone(&queue), metrics);
        (worker, queue)
    }

    #[tokio::test]
    async fn test_worker_runs_jobs() {
        let (mut worker, queue) = test_worker();
        let counter = Arc::new(AtomicUsize::new(0));

        worker.start().unwrap();

        for _ in 0..3 {
            let counter = Arc::clone(&counter);
            queue
                .enqueue(Job::callback("count", move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }))
                .unwrap();
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert!(worker.is_running());

        worker.stop().await.unwrap();
        assert_eq!(worker.state(), WorkerState::Stopped);
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let (mut worker, _queue) = test_worker();
        worker.start().unwrap();

        let err = worker.start().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyRunning);

        worker.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_before_start_fails() {
        let (mut worker, _queue) = test_worker();
        let err = worker.stop().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotRunning);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (mut worker, _queue) = test_worker();
        worker.start().unwrap();

        worker.stop().await.unwrap();
        let state_after_first = worker.state();
        worker.stop().await.unwrap();
        worker.stop().await.unwrap();

        assert_eq!(worker.state(), state_after_first);
        assert_eq!(worker.state(), WorkerState::Stopped);
    }

    #[tokio::test]
    async fn test_panicking_job_does_not_kill_worker() {
        let (mut worker, queue) = test_worker();
        let counter = Arc::new(AtomicUsize::new(0));

        worker.start().unwrap();

        queue
            .enqueue(Job::callback("boom", || panic!("job exploded")))
            .unwrap();
        let after = Arc::clone(&counter);
        queue
            .enqueue(Job::callback("survivor", move || {
                after.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(worker.is_running());

        worker.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_hooks_fire_around_run_loop() {
        let queue = Arc::new(JobQueue::unbounded("hooks"));
        let metrics = Arc::new(PoolMetrics::default());
        let started = Arc::new(AtomicUsize::new(0));
        let stopped = Arc::new(AtomicUsize::new(0));

        let started_hook = Arc::clone(&started);
        let stopped_hook = Arc::clone(&stopped);
        let mut worker = Worker::new("hooked", queue, metrics)
            .with_before_start(move || {
                started_hook.fetch_add(1, Ordering::SeqCst);
            })
            .with_after_stop(move || {
                stopped_hook.fetch_add(1, Ordering::SeqCst);
            });

        worker.start().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        worker.stop().await.unwrap();

        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(stopped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_wake_interval_roundtrip() {
        let (worker, _queue) = test_worker();
        assert_eq!(worker.wake_interval(), None);

        worker.set_wake_interval(Some(Duration::from_millis(250)));
        assert_eq!(worker.wake_interval(), Some(Duration::from_millis(250)));

        worker.set_wake_interval(None);
        assert_eq!(worker.wake_interval(), None);
    }
}
