//! Process-wide wiring of the fabric's collaborators.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::TRACING_TARGET_RUNTIME;
use weft_bus::MessageBus;
use weft_core::{Error, FabricConfig, Result, Sink, TracingSink};
use weft_monitor::{
    AutoScaler, MetricEvent, MetricsRing, MetricsSnapshot, MultiProcessMonitor,
    OptimizationConfig, PerfOptimizer, PoolId, ProcessId, ScalingAction, ScalingDecision,
    ScalingPolicy, SystemMetrics,
};
use weft_pool::{Executor, JobKind, TypedPool, WorkerPool};

/// Capacity of the scaling-hint ring.
const HINT_RING_CAPACITY: usize = 64;

/// A scaling recommendation queued for the pool side.
///
/// The optimizer never holds a reference into a pool; it pushes hints into
/// a bounded ring the pool owner drains on its next tick.
#[derive(Debug, Clone)]
pub struct ScalingHint {
    pub pool_name: String,
    pub decision: ScalingDecision,
}

/// Owns every fabric collaborator for the lifetime of the process.
///
/// Construction wires the components by explicit injection; nothing holds
/// a strong back-reference to anything else. Metric flow is push-based:
/// the feedback task reads pool counters, pushes events into the monitor's
/// lock-free ring, feeds the optimizer, and queues autoscaler hints.
pub struct Runtime {
    config: FabricConfig,
    process: ProcessId,
    io_pool: Arc<WorkerPool>,
    work_pool: Arc<WorkerPool>,
    typed_pool: Arc<TypedPool>,
    bus: Arc<MessageBus>,
    monitor: Arc<MultiProcessMonitor>,
    optimizer: Arc<PerfOptimizer>,
    autoscaler: Arc<AutoScaler>,
    hints: Arc<MetricsRing<ScalingHint>>,
    sink: Arc<dyn Sink>,
    running: AtomicBool,
    feedback: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("process", &self.process)
            .field("running", &self.running.load(Ordering::Acquire))
            .finish()
    }
}

impl Runtime {
    /// Build a runtime from configuration.
    pub fn new(config: FabricConfig) -> Result<Self> {
        config.validate().map_err(Error::invalid_argument)?;

        let pools = &config.thread_pools;
        let io_pool = Arc::new(WorkerPool::with_workers(
            "io",
            pools.queue_size,
            pools.io_workers,
        ));
        let work_pool = Arc::new(WorkerPool::with_workers(
            "work",
            pools.queue_size,
            pools.work_workers,
        ));

        let typed_pool = Arc::new(TypedPool::new("typed", pools.queue_size));
        for index in 0..pools.work_workers {
            typed_pool.add_worker(
                format!("typed-worker-{index}"),
                vec![JobKind::RealTime, JobKind::Batch, JobKind::Background],
            )?;
        }

        let bus = Arc::new(MessageBus::new(
            Arc::clone(&io_pool) as Arc<dyn Executor>,
            Arc::clone(&work_pool) as Arc<dyn Executor>,
        ));

        let monitor = Arc::new(MultiProcessMonitor::new(
            Duration::from_millis(config.monitoring.interval_ms),
            256,
        )?);
        let optimizer = Arc::new(PerfOptimizer::new(OptimizationConfig::default())?);
        let autoscaler = Arc::new(AutoScaler::new(ScalingPolicy {
            initial_resources: pools.work_workers,
            ..Default::default()
        }));

        let process = ProcessId::new(std::process::id(), "weft");
        monitor.register_pool(PoolId::new(process.clone(), "io", 0));
        monitor.register_pool(PoolId::new(process.clone(), "work", 0));
        monitor.register_pool(PoolId::new(process.clone(), "typed", 0));

        Ok(Self {
            config,
            process,
            io_pool,
            work_pool,
            typed_pool,
            bus,
            monitor,
            optimizer,
            autoscaler,
            hints: Arc::new(MetricsRing::new(HINT_RING_CAPACITY)?),
            sink: Arc::new(TracingSink),
            running: AtomicBool::new(false),
            feedback: Mutex::new(None),
        })
    }

    /// Replace the default tracing sink with a host-provided one.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn Sink>) -> Self {
        self.sink = sink;
        self
    }

    /// The publish/subscribe bus.
    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    /// The typed pool for lane-scheduled work.
    pub fn typed_pool(&self) -> &Arc<TypedPool> {
        &self.typed_pool
    }

    /// The worker pool serving subscriber callbacks.
    pub fn work_pool(&self) -> &Arc<WorkerPool> {
        &self.work_pool
    }

    /// The monitor collecting fabric metrics.
    pub fn monitor(&self) -> &Arc<MultiProcessMonitor> {
        &self.monitor
    }

    /// The adaptive optimizer.
    pub fn optimizer(&self) -> &Arc<PerfOptimizer> {
        &self.optimizer
    }

    /// This process's identity in the monitor.
    pub fn process(&self) -> &ProcessId {
        &self.process
    }

    /// Take the next queued scaling hint, if any.
    ///
    /// The pool owner calls this on its own tick and applies the decision
    /// at a safe point.
    pub fn poll_scaling_hint(&self) -> Option<ScalingHint> {
        self.hints.pop()
    }

    /// Start pools, bus, monitor, and the feedback loop.
    pub fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(Error::already_running("runtime is already running"));
        }

        self.io_pool.start()?;
        self.work_pool.start()?;
        self.typed_pool.start()?;
        self.bus.start()?;
        self.monitor.start()?;
        self.start_feedback_loop();

        debug!(
            target: TRACING_TARGET_RUNTIME,
            process = %self.process,
            io_workers = self.config.thread_pools.io_workers,
            work_workers = self.config.thread_pools.work_workers,
            "runtime started"
        );
        Ok(())
    }

    /// Stop everything: bus first (draining dispatches), then the typed
    /// pool, the monitor, and the optimizer.
    pub async fn shutdown(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::AcqRel) {
            return Err(Error::not_running("runtime is not running"));
        }

        let feedback = self
            .feedback
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some((shutdown, handle)) = feedback {
            shutdown.cancel();
            let _ = handle.await;
        }

        self.bus.stop().await?;
        self.typed_pool.stop(true).await?;
        self.monitor.stop().await?;
        self.optimizer.shutdown().await;

        debug!(target: TRACING_TARGET_RUNTIME, "runtime stopped");
        Ok(())
    }

    fn start_feedback_loop(&self) {
        let interval = Duration::from_millis(self.config.monitoring.interval_ms);
        let process = self.process.clone();
        let io_pool = Arc::clone(&self.io_pool);
        let work_pool = Arc::clone(&self.work_pool);
        let typed_pool = Arc::clone(&self.typed_pool);
        let monitor = Arc::clone(&self.monitor);
        let optimizer = Arc::clone(&self.optimizer);
        let autoscaler = Arc::clone(&self.autoscaler);
        let hints = Arc::clone(&self.hints);
        let sink = Arc::clone(&self.sink);
        let enabled = self.config.monitoring.enabled;

        let shutdown = CancellationToken::new();
        let task_shutdown = shutdown.clone();
        let handle = tokio::spawn(async move {
            if !enabled {
                return;
            }
            loop {
                tokio::select! {
                    biased;
                    _ = task_shutdown.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }

                // Push pool counters through the monitor's lock-free ring.
                for (name, metrics) in [
                    ("io", io_pool.metrics()),
                    ("work", work_pool.metrics()),
                    ("typed", typed_pool.aggregated_metrics()),
                ] {
                    sink.record(
                        "jobs_completed",
                        metrics.jobs_completed as f64,
                        &[("pool", name)],
                    );
                    sink.record(
                        "jobs_pending",
                        metrics.jobs_pending as f64,
                        &[("pool", name)],
                    );
                    let _ = monitor.push_event(MetricEvent::Pool {
                        pool: PoolId::new(process.clone(), name, 0),
                        metrics,
                    });
                }
                for (worker, metrics) in work_pool.worker_metrics() {
                    let _ = monitor.push_event(MetricEvent::Worker {
                        process: process.clone(),
                        worker,
                        metrics,
                    });
                }

                let Some(snapshot) = monitor.current_snapshot(&process) else {
                    continue;
                };
                optimizer.optimize_metric(&process, snapshot.clone());
                optimizer.adapt_to_cpu_load(snapshot.system.cpu_usage_percent);

                let decision = autoscaler.decide(&snapshot);
                if decision.action != ScalingAction::None
                    && !hints.push(ScalingHint {
                        pool_name: "work".to_owned(),
                        decision,
                    })
                {
                    debug!(
                        target: TRACING_TARGET_RUNTIME,
                        "hint ring full; dropping scaling hint"
                    );
                }
            }
        });

        *self
            .feedback
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some((shutdown, handle));
    }

    /// Report externally measured system metrics for this process.
    pub fn report_system_metrics(&self, metrics: SystemMetrics) {
        let _ = self.monitor.push_event(MetricEvent::System {
            process: self.process.clone(),
            metrics,
        });
    }

    /// The most recent snapshot of this process, if one was collected.
    pub fn current_snapshot(&self) -> Option<MetricsSnapshot> {
        self.monitor.current_snapshot(&self.process)
    }
}
