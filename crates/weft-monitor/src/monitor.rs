//! Multi-process metric registry and collection loop.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use jiff::Timestamp;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::TRACING_TARGET_MONITOR;
use crate::snapshot::{MetricsSnapshot, MultiProcessSnapshot, PoolId, ProcessId, SystemMetrics};
use crate::storage::MetricsRing;
use weft_core::{Error, Result};
use weft_pool::{PoolMetricsSnapshot, WorkerMetricsSnapshot};

/// Capacity of the lock-free ingestion ring.
const EVENT_RING_CAPACITY: usize = 4_096;

/// A metric update pushed by a reporting component.
///
/// Pools and workers push events into the monitor's lock-free ring instead
/// of holding a reference back into the monitor; the collection loop drains
/// the ring on every tick.
#[derive(Debug, Clone)]
pub enum MetricEvent {
    System {
        process: ProcessId,
        metrics: SystemMetrics,
    },
    Pool {
        pool: PoolId,
        metrics: PoolMetricsSnapshot,
    },
    Worker {
        process: ProcessId,
        worker: String,
        metrics: WorkerMetricsSnapshot,
    },
}

#[derive(Default)]
struct ProcessState {
    enabled: AtomicBool,
    system: RwLock<SystemMetrics>,
    pools: RwLock<HashMap<PoolId, PoolMetricsSnapshot>>,
    workers: RwLock<HashMap<String, WorkerMetricsSnapshot>>,
    history: Mutex<VecDeque<MetricsSnapshot>>,
}

struct MonitorInner {
    history_capacity: usize,
    processes: RwLock<HashMap<ProcessId, Arc<ProcessState>>>,
    events: MetricsRing<MetricEvent>,
    global_history: Mutex<VecDeque<MultiProcessSnapshot>>,
    sampler: Mutex<System>,
}

/// Registry and collector for per-process, per-pool metrics.
///
/// Registered processes each own a state block; a background task wakes at
/// the configured interval, drains the ingestion ring, refreshes system
/// numbers, and snapshots every enabled process into its history ring and
/// the global one.
pub struct MultiProcessMonitor {
    interval: Duration,
    inner: Arc<MonitorInner>,
    running: AtomicBool,
    worker: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl std::fmt::Debug for MultiProcessMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiProcessMonitor")
            .field("interval", &self.interval)
            .field("running", &self.running.load(Ordering::Acquire))
            .finish()
    }
}

impl MultiProcessMonitor {
    /// Create a monitor collecting every `interval`, keeping
    /// `history_capacity` snapshots per process.
    pub fn new(interval: Duration, history_capacity: usize) -> Result<Self> {
        Ok(Self {
            interval,
            inner: Arc::new(MonitorInner {
                history_capacity: history_capacity.max(1),
                processes: RwLock::new(HashMap::new()),
                events: MetricsRing::new(EVENT_RING_CAPACITY)?,
                global_history: Mutex::new(VecDeque::new()),
                sampler: Mutex::new(System::new()),
            }),
            running: AtomicBool::new(false),
            worker: Mutex::new(None),
        })
    }

    /// Register a process for collection. Registering twice is a no-op.
    pub fn register_process(&self, process: ProcessId) {
        let mut processes = self
            .inner
            .processes
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        processes.entry(process).or_insert_with(|| {
            let state = Arc::new(ProcessState::default());
            state.enabled.store(true, Ordering::Release);
            state
        });
    }

    /// Register a pool; its owning process is registered implicitly.
    pub fn register_pool(&self, pool: PoolId) {
        self.register_process(pool.process.clone());
        if let Some(state) = self.inner.state_of(&pool.process) {
            state
                .pools
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .entry(pool)
                .or_default();
        }
    }

    /// Enable or disable collection for one process.
    pub fn set_process_enabled(&self, process: &ProcessId, enabled: bool) -> Result<()> {
        match self.inner.state_of(process) {
            Some(state) => {
                state.enabled.store(enabled, Ordering::Release);
                Ok(())
            }
            None => Err(Error::invalid_argument(format!(
                "process {process} is not registered"
            ))),
        }
    }

    /// Push a metric event onto the lock-free ingestion ring.
    ///
    /// Returns false when the ring is full; the caller drops the event,
    /// never blocks.
    pub fn push_event(&self, event: MetricEvent) -> bool {
        self.inner.events.push(event)
    }

    /// Directly overwrite a process's system metrics.
    pub fn update_system_metrics(&self, process: &ProcessId, metrics: SystemMetrics) {
        if let Some(state) = self.inner.state_of(process) {
            *state
                .system
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner()) = metrics;
        }
    }

    /// Directly overwrite one pool's metrics.
    pub fn update_pool_metrics(&self, pool: &PoolId, metrics: PoolMetricsSnapshot) {
        if let Some(state) = self.inner.state_of(&pool.process) {
            state
                .pools
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .insert(pool.clone(), metrics);
        }
    }

    /// Directly overwrite one worker's metrics.
    pub fn update_worker_metrics(
        &self,
        process: &ProcessId,
        worker: impl Into<String>,
        metrics: WorkerMetricsSnapshot,
    ) {
        if let Some(state) = self.inner.state_of(process) {
            state
                .workers
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .insert(worker.into(), metrics);
        }
    }

    /// Start the background collection task.
    pub fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(Error::already_running("monitor is already running"));
        }

        let inner = Arc::clone(&self.inner);
        let interval = self.interval;
        let shutdown = CancellationToken::new();
        let task_shutdown = shutdown.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = task_shutdown.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        inner.collect();
                    }
                }
            }
        });

        *self
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some((shutdown, handle));
        debug!(
            target: TRACING_TARGET_MONITOR,
            interval_ms = interval.as_millis() as u64,
            "monitor collection started"
        );
        Ok(())
    }

    /// Stop the background collection task.
    pub async fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::AcqRel) {
            return Err(Error::not_running("monitor is not running"));
        }
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some((shutdown, handle)) = worker {
            shutdown.cancel();
            let _ = handle.await;
        }
        debug!(target: TRACING_TARGET_MONITOR, "monitor collection stopped");
        Ok(())
    }

    /// Run one collection pass immediately and return the global snapshot.
    pub fn collect_now(&self) -> MultiProcessSnapshot {
        self.inner.collect()
    }

    /// The most recent snapshot of one process.
    pub fn current_snapshot(&self, process: &ProcessId) -> Option<MetricsSnapshot> {
        let state = self.inner.state_of(process)?;
        let history = state
            .history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        history.back().cloned()
    }

    /// A snapshot of every registered process and pool, built from the
    /// current registry state without touching the history rings.
    pub fn multi_process_snapshot(&self) -> MultiProcessSnapshot {
        self.inner.build_global_snapshot()
    }

    /// The current metrics of one pool.
    pub fn pool_metrics(&self, pool: &PoolId) -> Option<PoolMetricsSnapshot> {
        let state = self.inner.state_of(&pool.process)?;
        let pools = state
            .pools
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        pools.get(pool).copied()
    }

    /// Up to `count` most recent snapshots for one process, oldest first.
    pub fn recent_history(&self, process: &ProcessId, count: usize) -> Vec<MetricsSnapshot> {
        let Some(state) = self.inner.state_of(process) else {
            return Vec::new();
        };
        let history = state
            .history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let skip = history.len().saturating_sub(count);
        history.iter().skip(skip).cloned().collect()
    }

    /// Comparative scores across the given processes.
    ///
    /// Produces `{name}_cpu_efficiency`, `{name}_memory_efficiency`, and
    /// `{name}_throughput` entries: throughput is total completed jobs,
    /// the efficiency scores divide it by the cpu and memory footprint.
    pub fn compare_process_performance(&self, processes: &[ProcessId]) -> HashMap<String, f64> {
        let mut results = HashMap::new();
        for process in processes {
            let Some(state) = self.inner.state_of(process) else {
                continue;
            };

            let system = *state
                .system
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let total_jobs: u64 = {
                let pools = state
                    .pools
                    .read()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                pools.values().map(|pool| pool.jobs_completed).sum()
            };

            let throughput = total_jobs as f64;
            let cpu_efficiency = throughput / system.cpu_usage_percent.max(1.0);
            let memory_mb = (system.memory_usage_bytes / (1024 * 1024)).max(1) as f64;
            let memory_efficiency = throughput / memory_mb;

            results.insert(format!("{}_cpu_efficiency", process.name), cpu_efficiency);
            results.insert(
                format!("{}_memory_efficiency", process.name),
                memory_efficiency,
            );
            results.insert(format!("{}_throughput", process.name), throughput);
        }
        results
    }

    /// Up to `count` most recent global snapshots, oldest first.
    pub fn recent_global_history(&self, count: usize) -> Vec<MultiProcessSnapshot> {
        let history = self
            .inner
            .global_history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let skip = history.len().saturating_sub(count);
        history.iter().skip(skip).cloned().collect()
    }
}

impl MonitorInner {
    fn state_of(&self, process: &ProcessId) -> Option<Arc<ProcessState>> {
        self.processes
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(process)
            .map(Arc::clone)
    }

    /// One collection pass: drain events, refresh system numbers, snapshot.
    fn collect(&self) -> MultiProcessSnapshot {
        for event in self.events.drain() {
            self.apply(event);
        }
        self.refresh_system_metrics();

        let snapshot = self.build_global_snapshot();
        let processes = self
            .processes
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for state in processes.values() {
            if !state.enabled.load(Ordering::Acquire) {
                continue;
            }
            let process_snapshot = self.build_process_snapshot(state, snapshot.capture_time);
            let mut history = state
                .history
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if history.len() >= self.history_capacity {
                history.pop_front();
            }
            history.push_back(process_snapshot);
        }
        drop(processes);

        {
            let mut global = self
                .global_history
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if global.len() >= self.history_capacity {
                global.pop_front();
            }
            global.push_back(snapshot.clone());
        }

        snapshot
    }

    fn apply(&self, event: MetricEvent) {
        match event {
            MetricEvent::System { process, metrics } => {
                if let Some(state) = self.state_of(&process) {
                    *state
                        .system
                        .write()
                        .unwrap_or_else(|poisoned| poisoned.into_inner()) = metrics;
                }
            }
            MetricEvent::Pool { pool, metrics } => {
                if let Some(state) = self.state_of(&pool.process) {
                    state
                        .pools
                        .write()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .insert(pool, metrics);
                }
            }
            MetricEvent::Worker {
                process,
                worker,
                metrics,
            } => {
                if let Some(state) = self.state_of(&process) {
                    state
                        .workers
                        .write()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .insert(worker, metrics);
                }
            }
        }
    }

    /// Overlay OS-level cpu and memory numbers for processes the sampler
    /// can see; externally reported values are kept otherwise.
    fn refresh_system_metrics(&self) {
        let pids: Vec<(ProcessId, Arc<ProcessState>)> = {
            let processes = self
                .processes
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            processes
                .iter()
                .filter(|(_, state)| state.enabled.load(Ordering::Acquire))
                .map(|(id, state)| (id.clone(), Arc::clone(state)))
                .collect()
        };
        if pids.is_empty() {
            return;
        }

        let mut sampler = self
            .sampler
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let targets: Vec<Pid> = pids
            .iter()
            .map(|(id, _)| Pid::from_u32(id.pid))
            .collect();
        sampler.refresh_processes(ProcessesToUpdate::Some(&targets), true);

        for (id, state) in pids {
            if let Some(observed) = sampler.process(Pid::from_u32(id.pid)) {
                let mut system = state
                    .system
                    .write()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                system.cpu_usage_percent = f64::from(observed.cpu_usage());
                system.memory_usage_bytes = observed.memory();
            }
        }
    }

    fn build_process_snapshot(
        &self,
        state: &ProcessState,
        capture_time: Timestamp,
    ) -> MetricsSnapshot {
        let system = *state
            .system
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let pool = {
            let pools = state
                .pools
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let mut aggregate = PoolMetricsSnapshot::default();
            for metrics in pools.values() {
                aggregate.workers += metrics.workers;
                aggregate.idle_workers += metrics.idle_workers;
                aggregate.jobs_completed += metrics.jobs_completed;
                aggregate.jobs_pending += metrics.jobs_pending;
                aggregate.jobs_failed += metrics.jobs_failed;
                aggregate.avg_latency_ns = aggregate.avg_latency_ns.max(metrics.avg_latency_ns);
            }
            aggregate
        };
        let workers = state
            .workers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        MetricsSnapshot {
            capture_time,
            system,
            pool,
            workers,
        }
    }

    fn build_global_snapshot(&self) -> MultiProcessSnapshot {
        let capture_time = Timestamp::now();
        let mut snapshot = MultiProcessSnapshot {
            capture_time,
            ..Default::default()
        };

        let processes = self
            .processes
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for (id, state) in processes.iter() {
            if !state.enabled.load(Ordering::Acquire) {
                continue;
            }
            let system = *state
                .system
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            snapshot.global_system.cpu_usage_percent += system.cpu_usage_percent;
            snapshot.global_system.memory_usage_bytes += system.memory_usage_bytes;
            snapshot.global_system.active_threads += system.active_threads;
            snapshot.process_metrics.insert(id.clone(), system);

            let pools = state
                .pools
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            for (pool_id, metrics) in pools.iter() {
                snapshot.pool_metrics.insert(pool_id.clone(), *metrics);
            }
        }

        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> MultiProcessMonitor {
        MultiProcessMonitor::new(Duration::from_millis(20), 64).unwrap()
    }

    fn process(pid: u32, name: &str) -> ProcessId {
        // Pids far outside the live range so the OS sampler never matches.
        ProcessId::new(900_000 + pid, name)
    }

    #[test]
    fn test_register_and_report() {
        let monitor = monitor();
        let proc_a = process(1, "alpha");
        let pool_a = PoolId::new(proc_a.clone(), "work", 0);
        monitor.register_pool(pool_a.clone());

        monitor.update_system_metrics(
            &proc_a,
            SystemMetrics {
                cpu_usage_percent: 25.0,
                memory_usage_bytes: 10 * 1024 * 1024,
                active_threads: 4,
            },
        );
        monitor.update_pool_metrics(
            &pool_a,
            PoolMetricsSnapshot {
                workers: 4,
                jobs_completed: 10,
                ..Default::default()
            },
        );

        let snapshot = monitor.collect_now();
        assert_eq!(snapshot.process_metrics.len(), 1);
        assert_eq!(snapshot.pool_metrics[&pool_a].jobs_completed, 10);

        let current = monitor.current_snapshot(&proc_a).unwrap();
        assert_eq!(current.system.cpu_usage_percent, 25.0);
        assert_eq!(current.pool.jobs_completed, 10);
    }

    #[test]
    fn test_event_ring_ingestion() {
        let monitor = monitor();
        let proc_a = process(2, "beta");
        let pool_a = PoolId::new(proc_a.clone(), "io", 0);
        monitor.register_pool(pool_a.clone());

        assert!(monitor.push_event(MetricEvent::Pool {
            pool: pool_a.clone(),
            metrics: PoolMetricsSnapshot {
                jobs_completed: 77,
                ..Default::default()
            },
        }));
        monitor.collect_now();

        assert_eq!(monitor.pool_metrics(&pool_a).unwrap().jobs_completed, 77);
    }

    #[test]
    fn test_disabled_process_is_skipped() {
        let monitor = monitor();
        let proc_a = process(3, "gamma");
        monitor.register_process(proc_a.clone());
        monitor.set_process_enabled(&proc_a, false).unwrap();

        let snapshot = monitor.collect_now();
        assert!(snapshot.process_metrics.is_empty());
        assert!(monitor.current_snapshot(&proc_a).is_none());
    }

    #[test]
    fn test_history_is_bounded() {
        let monitor = MultiProcessMonitor::new(Duration::from_millis(10), 4).unwrap();
        let proc_a = process(4, "delta");
        monitor.register_process(proc_a.clone());

        for _ in 0..10 {
            monitor.collect_now();
        }
        assert_eq!(monitor.recent_history(&proc_a, 100).len(), 4);
    }

    #[test]
    fn test_compare_process_performance() {
        let monitor = monitor();
        let proc_a = process(5, "epsilon");
        let proc_b = process(6, "zeta");
        let pool_a = PoolId::new(proc_a.clone(), "work", 0);
        let pool_b = PoolId::new(proc_b.clone(), "work", 0);
        monitor.register_pool(pool_a.clone());
        monitor.register_pool(pool_b.clone());

        monitor.update_system_metrics(
            &proc_a,
            SystemMetrics {
                cpu_usage_percent: 50.0,
                memory_usage_bytes: 100 * 1024 * 1024,
                active_threads: 4,
            },
        );
        monitor.update_pool_metrics(
            &pool_a,
            PoolMetricsSnapshot {
                jobs_completed: 1_000,
                ..Default::default()
            },
        );
        monitor.update_system_metrics(
            &proc_b,
            SystemMetrics {
                cpu_usage_percent: 50.0,
                memory_usage_bytes: 100 * 1024 * 1024,
                active_threads: 4,
            },
        );
        monitor.update_pool_metrics(
            &pool_b,
            PoolMetricsSnapshot {
                jobs_completed: 500,
                ..Default::default()
            },
        );

        let scores = monitor.compare_process_performance(&[proc_a, proc_b]);
        assert_eq!(scores["epsilon_throughput"], 1_000.0);
        assert_eq!(scores["zeta_throughput"], 500.0);
        assert!(scores["epsilon_cpu_efficiency"] > scores["zeta_cpu_efficiency"]);
    }

    #[tokio::test]
    async fn test_collection_task_lifecycle() {
        let monitor = MultiProcessMonitor::new(Duration::from_millis(10), 16).unwrap();
        let proc_a = process(7, "eta");
        monitor.register_process(proc_a.clone());

        monitor.start().unwrap();
        assert!(monitor.start().is_err());

        tokio::time::sleep(Duration::from_millis(60)).await;
        monitor.stop().await.unwrap();
        assert!(monitor.stop().await.is_err());

        assert!(!monitor.recent_history(&proc_a, 10).is_empty());
        assert!(!monitor.recent_global_history(10).is_empty());
    }
}
