//! Cross-node snapshot aggregation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use jiff::Timestamp;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::TRACING_TARGET_OPTIMIZER;
use crate::snapshot::MultiProcessSnapshot;

/// Aggregation pacing and mode.
#[derive(Debug, Clone)]
pub struct AggregationConfig {
    /// Fan the per-node sums out over worker threads.
    pub parallel: bool,
    /// Interval of the optional periodic aggregation task.
    pub interval: Duration,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            parallel: false,
            interval: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
struct NodeEntry {
    snapshot: MultiProcessSnapshot,
    last_update: Timestamp,
    active: bool,
}

/// Callback invoked with each periodic aggregation result.
pub type AggregationCallback = Arc<dyn Fn(&MultiProcessSnapshot) + Send + Sync>;

/// Combines per-node snapshots into one global view.
///
/// Global cpu is the arithmetic mean over active nodes, memory and thread
/// counts are summed, and the per-process and per-pool maps are unioned
/// with last-writer-wins per identifier.
pub struct DistributedAggregator {
    config: AggregationConfig,
    nodes: Arc<RwLock<HashMap<String, NodeEntry>>>,
    worker: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl std::fmt::Debug for DistributedAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedAggregator")
            .field("parallel", &self.config.parallel)
            .finish()
    }
}

impl DistributedAggregator {
    pub fn new(config: AggregationConfig) -> Self {
        Self {
            config,
            nodes: Arc::new(RwLock::new(HashMap::new())),
            worker: Mutex::new(None),
        }
    }

    /// Record the latest snapshot from a node, marking it active.
    pub fn add_node_metrics(&self, node_id: impl Into<String>, snapshot: MultiProcessSnapshot) {
        let mut nodes = self
            .nodes
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        nodes.insert(
            node_id.into(),
            NodeEntry {
                snapshot,
                last_update: Timestamp::now(),
                active: true,
            },
        );
    }

    /// Mark a node inactive without dropping its last snapshot.
    pub fn deactivate_node(&self, node_id: &str) {
        let mut nodes = self
            .nodes
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(entry) = nodes.get_mut(node_id) {
            entry.active = false;
        }
    }

    /// Combine every active node's snapshot.
    pub fn aggregate_global(&self) -> MultiProcessSnapshot {
        let entries: Vec<NodeEntry> = {
            let nodes = self
                .nodes
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            nodes.values().filter(|entry| entry.active).cloned().collect()
        };

        let mut result = MultiProcessSnapshot {
            capture_time: Timestamp::now(),
            ..Default::default()
        };
        if entries.is_empty() {
            return result;
        }

        if self.config.parallel {
            self.parallel_sum(&entries, &mut result);
        } else {
            for entry in &entries {
                result.global_system.cpu_usage_percent +=
                    entry.snapshot.global_system.cpu_usage_percent;
                result.global_system.memory_usage_bytes +=
                    entry.snapshot.global_system.memory_usage_bytes;
                result.global_system.active_threads +=
                    entry.snapshot.global_system.active_threads;
            }
            result.global_system.cpu_usage_percent /= entries.len() as f64;
        }

        // Map union is last-writer-wins per identifier in both modes.
        for entry in entries {
            for (process, metrics) in entry.snapshot.process_metrics {
                result.process_metrics.insert(process, metrics);
            }
            for (pool, metrics) in entry.snapshot.pool_metrics {
                result.pool_metrics.insert(pool, metrics);
            }
        }

        result
    }

    /// Active nodes and their last update times.
    pub fn node_status(&self) -> HashMap<String, Timestamp> {
        let nodes = self
            .nodes
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        nodes
            .iter()
            .filter(|(_, entry)| entry.active)
            .map(|(node_id, entry)| (node_id.clone(), entry.last_update))
            .collect()
    }

    /// Start a periodic aggregation task invoking `callback` each interval.
    pub fn start(&self, callback: AggregationCallback) {
        let mut worker = self
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if worker.is_some() {
            return;
        }

        let nodes = Arc::clone(&self.nodes);
        let config = self.config.clone();
        let shutdown = CancellationToken::new();
        let task_shutdown = shutdown.clone();
        let handle = tokio::spawn(async move {
            let aggregator = DistributedAggregator {
                config,
                nodes,
                worker: Mutex::new(None),
            };
            loop {
                tokio::select! {
                    biased;
                    _ = task_shutdown.cancelled() => break,
                    _ = tokio::time::sleep(aggregator.config.interval) => {
                        let snapshot = aggregator.aggregate_global();
                        callback(&snapshot);
                    }
                }
            }
        });

        *worker = Some((shutdown, handle));
        debug!(target: TRACING_TARGET_OPTIMIZER, "periodic aggregation started");
    }

    /// Stop the periodic aggregation task.
    pub async fn stop(&self) {
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some((shutdown, handle)) = worker {
            shutdown.cancel();
            let _ = handle.await;
        }
    }

    fn parallel_sum(&self, entries: &[NodeEntry], result: &mut MultiProcessSnapshot) {
        use std::sync::atomic::{AtomicU64, Ordering};

        let total_cpu_milli = AtomicU64::new(0);
        let total_memory = AtomicU64::new(0);
        let total_threads = AtomicU64::new(0);

        std::thread::scope(|scope| {
            for entry in entries {
                let total_cpu_milli = &total_cpu_milli;
                let total_memory = &total_memory;
                let total_threads = &total_threads;
                scope.spawn(move || {
                    let system = &entry.snapshot.global_system;
                    total_cpu_milli.fetch_add(
                        (system.cpu_usage_percent * 1_000.0) as u64,
                        Ordering::Relaxed,
                    );
                    total_memory.fetch_add(system.memory_usage_bytes, Ordering::Relaxed);
                    total_threads
                        .fetch_add(u64::from(system.active_threads), Ordering::Relaxed);
                });
            }
        });

        result.global_system.cpu_usage_percent =
            total_cpu_milli.load(Ordering::Relaxed) as f64 / 1_000.0 / entries.len() as f64;
        result.global_system.memory_usage_bytes = total_memory.load(Ordering::Relaxed);
        result.global_system.active_threads =
            total_threads.load(Ordering::Relaxed).min(u64::from(u32::MAX)) as u32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{PoolId, ProcessId, SystemMetrics};

    fn node_snapshot(cpu: f64, memory: u64, threads: u32) -> MultiProcessSnapshot {
        MultiProcessSnapshot {
            capture_time: Timestamp::now(),
            global_system: SystemMetrics {
                cpu_usage_percent: cpu,
                memory_usage_bytes: memory,
                active_threads: threads,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_serial_aggregation_means_cpu_sums_memory() {
        let aggregator = DistributedAggregator::new(AggregationConfig::default());
        aggregator.add_node_metrics("node-a", node_snapshot(40.0, 1_000, 8));
        aggregator.add_node_metrics("node-b", node_snapshot(60.0, 3_000, 4));

        let global = aggregator.aggregate_global();
        assert_eq!(global.global_system.cpu_usage_percent, 50.0);
        assert_eq!(global.global_system.memory_usage_bytes, 4_000);
        assert_eq!(global.global_system.active_threads, 12);
    }

    #[test]
    fn test_parallel_aggregation_matches_serial() {
        let aggregator = DistributedAggregator::new(AggregationConfig {
            parallel: true,
            ..Default::default()
        });
        aggregator.add_node_metrics("node-a", node_snapshot(40.0, 1_000, 8));
        aggregator.add_node_metrics("node-b", node_snapshot(60.0, 3_000, 4));

        let global = aggregator.aggregate_global();
        assert!((global.global_system.cpu_usage_percent - 50.0).abs() < 0.01);
        assert_eq!(global.global_system.memory_usage_bytes, 4_000);
        assert_eq!(global.global_system.active_threads, 12);
    }

    #[test]
    fn test_map_union_is_last_writer_wins() {
        let aggregator = DistributedAggregator::new(AggregationConfig::default());
        let process = ProcessId::new(1, "shared");
        let pool = PoolId::new(process.clone(), "work", 0);

        let mut first = node_snapshot(10.0, 100, 1);
        first.process_metrics.insert(
            process.clone(),
            SystemMetrics {
                cpu_usage_percent: 11.0,
                ..Default::default()
            },
        );
        first.pool_metrics.insert(pool.clone(), Default::default());
        let mut second = node_snapshot(20.0, 200, 2);
        second.process_metrics.insert(
            process.clone(),
            SystemMetrics {
                cpu_usage_percent: 22.0,
                ..Default::default()
            },
        );

        aggregator.add_node_metrics("node-a", first);
        aggregator.add_node_metrics("node-b", second);

        let global = aggregator.aggregate_global();
        assert_eq!(global.process_metrics.len(), 1);
        assert!(global.pool_metrics.contains_key(&pool));
        let cpu = global.process_metrics[&process].cpu_usage_percent;
        assert!(cpu == 11.0 || cpu == 22.0);
    }

    #[test]
    fn test_inactive_nodes_are_excluded() {
        let aggregator = DistributedAggregator::new(AggregationConfig::default());
        aggregator.add_node_metrics("node-a", node_snapshot(40.0, 1_000, 8));
        aggregator.add_node_metrics("node-b", node_snapshot(60.0, 3_000, 4));
        aggregator.deactivate_node("node-b");

        let global = aggregator.aggregate_global();
        assert_eq!(global.global_system.cpu_usage_percent, 40.0);
        assert_eq!(aggregator.node_status().len(), 1);
    }

    #[tokio::test]
    async fn test_periodic_aggregation_invokes_callback() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let aggregator = DistributedAggregator::new(AggregationConfig {
            parallel: false,
            interval: Duration::from_millis(10),
        });
        aggregator.add_node_metrics("node-a", node_snapshot(10.0, 100, 1));

        let ticks = Arc::new(AtomicUsize::new(0));
        let observed = Arc::clone(&ticks);
        aggregator.start(Arc::new(move |_| {
            observed.fetch_add(1, Ordering::SeqCst);
        }));

        tokio::time::sleep(Duration::from_millis(60)).await;
        aggregator.stop().await;

        assert!(ticks.load(Ordering::SeqCst) >= 2);
    }
}
