//! Typed pool with independent job lanes.

use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::select_all;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::TRACING_TARGET_TYPED;
use crate::executor::{Executor, TaskFn, TaskHandle, completion_pair};
use crate::job::Job;
use crate::metrics::{PoolMetrics, PoolMetricsSnapshot, WorkerMetrics, WorkerMetricsSnapshot};
use crate::queue::JobQueue;
use crate::timer::TimerLane;
use weft_core::{Error, ErrorKind, Result};

/// Job lanes ordered by scheduling preference, highest first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
pub enum JobKind {
    RealTime,
    Batch,
    Background,
}

impl JobKind {
    /// Every lane, in descending priority order.
    pub const ALL: [JobKind; 3] = [JobKind::RealTime, JobKind::Batch, JobKind::Background];
}

struct Lane {
    queue: Arc<JobQueue>,
    metrics: Arc<PoolMetrics>,
    // Wakes only workers that service this lane; a pool-wide notify could
    // hand the wakeup to a worker with disjoint preferences and stall the
    // job.
    notify: Arc<Notify>,
}

/// One serviced lane as seen from a worker's run loop.
struct WorkerLane {
    kind: JobKind,
    queue: Arc<JobQueue>,
    metrics: Arc<PoolMetrics>,
    notify: Arc<Notify>,
}

struct TypedWorkerSlot {
    title: String,
    preferences: Vec<JobKind>,
    metrics: Arc<WorkerMetrics>,
    handle: Option<JoinHandle<()>>,
}

/// A pool with one queue per [`JobKind`].
///
/// Workers declare the lanes they service in descending preference order
/// and steal from lower-preference lanes whenever their preferred lanes are
/// idle. Submissions wake a waiter on the target lane, so a parked worker
/// is only woken for work it can actually pick up. Each lane keeps its own
/// counters; the aggregate view sums them.
pub struct TypedPool {
    name: String,
    lanes: BTreeMap<JobKind, Lane>,
    workers: Mutex<Vec<TypedWorkerSlot>>,
    running: AtomicBool,
    shutdown: Mutex<CancellationToken>,
    timer: Mutex<Option<TimerLane>>,
    default_kind: JobKind,
}

impl std::fmt::Debug for TypedPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypedPool")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .finish()
    }
}

impl TypedPool {
    /// Create an empty typed pool; every lane is bounded at `lane_capacity`.
    pub fn new(name: impl Into<String>, lane_capacity: usize) -> Self {
        let name = name.into();
        let lanes = JobKind::ALL
            .into_iter()
            .map(|kind| {
                let lane = Lane {
                    queue: Arc::new(JobQueue::bounded(format!("{name}-{kind}"), lane_capacity)),
                    metrics: Arc::new(PoolMetrics::default()),
                    notify: Arc::new(Notify::new()),
                };
                (kind, lane)
            })
            .collect();

        Self {
            name,
            lanes,
            workers: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            shutdown: Mutex::new(CancellationToken::new()),
            timer: Mutex::new(None),
            default_kind: JobKind::Batch,
        }
    }

    /// Lane used when the pool is driven through the plain executor contract.
    #[must_use]
    pub fn with_default_kind(mut self, kind: JobKind) -> Self {
        self.default_kind = kind;
        self
    }

    /// The pool name.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock_workers(&self) -> std::sync::MutexGuard<'_, Vec<TypedWorkerSlot>> {
        self.workers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a worker servicing `preferences`, highest preference first.
    pub fn add_worker(&self, title: impl Into<String>, preferences: Vec<JobKind>) -> Result<()> {
        if self.is_running() {
            return Err(Error::already_running(format!(
                "typed pool '{}' is running; workers must be registered before start",
                self.name
            )));
        }
        if preferences.is_empty() {
            return Err(Error::invalid_argument(
                "worker must declare at least one job kind",
            ));
        }

        self.lock_workers().push(TypedWorkerSlot {
            title: title.into(),
            preferences,
            metrics: Arc::new(WorkerMetrics::default()),
            handle: None,
        });
        Ok(())
    }

    /// Whether any registered worker services `kind`.
    pub fn covers(&self, kind: JobKind) -> bool {
        self.lock_workers()
            .iter()
            .any(|slot| slot.preferences.contains(&kind))
    }

    /// Submit a job to the lane for `kind`.
    ///
    /// Fails with `ResourceExhausted` when no registered worker services
    /// that kind.
    pub fn submit(&self, kind: JobKind, mut job: Job) -> Result<TaskHandle> {
        if !self.is_running() {
            return Err(Error::not_running(format!(
                "typed pool '{}' is not running",
                self.name
            )));
        }
        if !self.covers(kind) {
            return Err(Error::resource_exhausted(format!(
                "no worker in pool '{}' services {kind} jobs",
                self.name
            )));
        }

        let handle = completion_pair(&mut job);
        let lane = self.lane(kind);
        lane.queue.enqueue(job)?;
        // Wake a worker parked on this lane specifically.
        lane.notify.notify_one();
        Ok(handle)
    }

    fn lane(&self, kind: JobKind) -> &Lane {
        // Every kind is materialised in the constructor.
        &self.lanes[&kind]
    }

    /// Start every registered worker.
    pub fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(Error::already_running(format!(
                "typed pool '{}' is already running",
                self.name
            )));
        }

        let shutdown = CancellationToken::new();
        {
            let mut workers = self.lock_workers();
            if workers.is_empty() {
                self.running.store(false, Ordering::Release);
                return Err(Error::new(
                    ErrorKind::StartFailure,
                    format!("typed pool '{}' has no workers registered", self.name),
                ));
            }

            for slot in workers.iter_mut() {
                let ctx = TypedLoopCtx {
                    title: slot.title.clone(),
                    lanes: slot
                        .preferences
                        .iter()
                        .map(|kind| {
                            let lane = self.lane(*kind);
                            WorkerLane {
                                kind: *kind,
                                queue: Arc::clone(&lane.queue),
                                metrics: Arc::clone(&lane.metrics),
                                notify: Arc::clone(&lane.notify),
                            }
                        })
                        .collect(),
                    metrics: Arc::clone(&slot.metrics),
                    shutdown: shutdown.clone(),
                };
                slot.handle = Some(tokio::spawn(ctx.run()));
            }
        }

        *self
            .shutdown
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = shutdown;
        *self
            .timer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(TimerLane::spawn(
            &self.name,
            Arc::clone(&self.lane(self.default_kind).queue),
        ));

        debug!(
            target: TRACING_TARGET_TYPED,
            pool = %self.name,
            workers = self.worker_count(),
            "typed pool started"
        );
        Ok(())
    }

    /// Stop the pool, optionally draining every lane first.
    pub async fn stop(&self, drain: bool) -> Result<()> {
        if !self.running.swap(false, Ordering::AcqRel) {
            return Err(Error::not_running(format!(
                "typed pool '{}' is not running",
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

        for lane in self.lanes.values() {
            lane.queue.stop();
            if !drain {
                lane.queue.clear();
            }
        }
        // Queues are stopped first, so waking idle workers cannot race
        // with new work arriving.
        self.shutdown
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .cancel();
        for lane in self.lanes.values() {
            lane.notify.notify_waiters();
        }

        let handles: Vec<Option<JoinHandle<()>>> = {
            let mut workers = self.lock_workers();
            workers.iter_mut().map(|slot| slot.handle.take()).collect()
        };
        for handle in handles.into_iter().flatten() {
            let _ = handle.await;
        }

        debug!(
            target: TRACING_TARGET_TYPED,
            pool = %self.name,
            drained = drain,
            "typed pool stopped"
        );
        Ok(())
    }

    /// Counters for one lane, including its queue depth.
    pub fn lane_metrics(&self, kind: JobKind) -> PoolMetricsSnapshot {
        let lane = self.lane(kind);
        lane.metrics.snapshot(lane.queue.len())
    }

    /// Counters summed across every lane.
    pub fn aggregated_metrics(&self) -> PoolMetricsSnapshot {
        let mut total = PoolMetricsSnapshot {
            workers: self.worker_count(),
            ..Default::default()
        };
        let mut weighted_latency = 0u128;
        let mut executed = 0u128;

        for kind in JobKind::ALL {
            let snapshot = self.lane_metrics(kind);
            total.jobs_completed += snapshot.jobs_completed;
            total.jobs_failed += snapshot.jobs_failed;
            total.jobs_pending += snapshot.jobs_pending;
            let lane_executed = u128::from(snapshot.jobs_completed + snapshot.jobs_failed);
            weighted_latency += u128::from(snapshot.avg_latency_ns) * lane_executed;
            executed += lane_executed;
        }
        if executed > 0 {
            total.avg_latency_ns = (weighted_latency / executed) as u64;
        }
        total
    }

    /// Per-worker counters keyed by worker title.
    pub fn worker_metrics(&self) -> Vec<(String, WorkerMetricsSnapshot)> {
        self.lock_workers()
            .iter()
            .map(|slot| (slot.title.clone(), slot.metrics.snapshot()))
            .collect()
    }
}

#[async_trait]
impl Executor for TypedPool {
    fn submit(&self, task: TaskFn) -> Result<TaskHandle> {
        TypedPool::submit(self, self.default_kind, Job::callback("task", task))
    }

    fn submit_delayed(&self, task: TaskFn, delay: Duration) -> Result<TaskHandle> {
        if !self.is_running() {
            return Err(Error::not_running(format!(
                "typed pool '{}' is not running",
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
                "typed pool '{}' has no timer lane",
                self.name
            ))),
        }
    }

    fn execute(&self, job: Job) -> Result<TaskHandle> {
        TypedPool::submit(self, self.default_kind, job)
    }

    fn worker_count(&self) -> usize {
        self.lock_workers().len()
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn pending_tasks(&self) -> usize {
        self.lanes.values().map(|lane| lane.queue.len()).sum()
    }

    async fn shutdown(&self, wait_for_completion: bool) -> Result<()> {
        match self.stop(wait_for_completion).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::NotRunning => Ok(()),
            Err(error) => Err(error),
        }
    }
}

struct TypedLoopCtx {
    title: String,
    lanes: Vec<WorkerLane>,
    metrics: Arc<WorkerMetrics>,
    shutdown: CancellationToken,
}

impl TypedLoopCtx {
    async fn run(self) {
        'outer: loop {
            // Register on every serviced lane before scanning so an
            // enqueue between the scan and the park is never lost.
            let waits: Vec<_> = self
                .lanes
                .iter()
                .map(|lane| Box::pin(lane.notify.notified()))
                .collect();

            // Scan lanes in declared preference order; lower-preference
            // lanes are only reached when the preferred ones are idle.
            for lane in &self.lanes {
                if let Some(job) = lane.queue.try_dequeue() {
                    self.execute(lane.kind, &lane.metrics, job);
                    continue 'outer;
                }
            }

            if self.should_exit() {
                break;
            }

            let idle_started = Instant::now();
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    // Rescan before exiting so a job enqueued just before
                    // shutdown still drains.
                    if self.lanes.iter().all(|lane| lane.queue.is_empty()) {
                        break;
                    }
                }
                _ = select_all(waits) => {}
            }
            self.metrics
                .record_idle(idle_started.elapsed().as_nanos() as u64);
        }
    }

    fn should_exit(&self) -> bool {
        self.lanes
            .iter()
            .all(|lane| lane.queue.is_stopping() && lane.queue.is_empty())
    }

    fn execute(&self, kind: JobKind, lane_metrics: &PoolMetrics, mut job: Job) {
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
        let succeeded = result.is_ok() || result.as_ref().is_err_and(Error::is_cancellation);
        lane_metrics.record_job(proc_time_ns, succeeded);

        if let Err(error) = &result {
            if !error.is_cancellation() {
                warn!(
                    target: TRACING_TARGET_TYPED,
                    worker = %self.title,
                    lane = %kind,
                    job = %name,
                    error = %error,
                    "job execution failed"
                );
            }
        }

        if let Some(tx) = completion {
            let _ = tx.send(result);
        }
    }
}
