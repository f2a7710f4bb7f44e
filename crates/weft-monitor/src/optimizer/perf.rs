//! Adaptive sampling, batching, and storage tuning.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::TRACING_TARGET_OPTIMIZER;
use crate::snapshot::{MetricsSnapshot, ProcessId};
use crate::storage::{BatchProcessor, CompressedStorage, TieredStorage, TieredStorageConfig};
use weft_core::Result;

/// Sampling rate bounds.
const MIN_SAMPLING_RATE: f64 = 0.1;
const MAX_SAMPLING_RATE: f64 = 1.0;
/// Batch size bounds applied under memory pressure.
const MIN_BATCH_SIZE: usize = 10;
const MAX_BATCH_SIZE: usize = 1_000;
/// Batch interval bounds applied under cpu load.
const MIN_BATCH_INTERVAL: Duration = Duration::from_millis(10);
const MAX_BATCH_INTERVAL: Duration = Duration::from_secs(1);

/// Feature switches and initial tuning for [`PerfOptimizer`].
#[derive(Debug, Clone)]
pub struct OptimizationConfig {
    pub enable_adaptive_sampling: bool,
    pub enable_batching: bool,
    pub enable_compression: bool,
    pub enable_tiered_storage: bool,
    pub batch_size: usize,
    pub batch_interval: Duration,
    pub compression_capacity: usize,
    pub tiers: TieredStorageConfig,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            enable_adaptive_sampling: true,
            enable_batching: true,
            enable_compression: true,
            enable_tiered_storage: true,
            batch_size: 100,
            batch_interval: Duration::from_millis(100),
            compression_capacity: 4_096,
            tiers: TieredStorageConfig::default(),
        }
    }
}

/// Counters exposed by the optimizer.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OptimizationStats {
    pub samples_skipped: u64,
    pub batches_processed: u64,
    pub memory_saved_bytes: u64,
    pub compression_ratio: f64,
}

#[derive(Debug, Clone, Copy)]
struct SamplingState {
    rate: f64,
    skip_count: u64,
}

impl Default for SamplingState {
    fn default() -> Self {
        Self {
            rate: MAX_SAMPLING_RATE,
            skip_count: 0,
        }
    }
}

/// The metric-path optimizer.
///
/// `optimize_metric` is the single entry point: the adaptive sampler may
/// decline a snapshot, otherwise it flows through the batch processor into
/// tiered storage, with a standalone compression buffer tracking savings.
/// The `adapt_to_*` methods let the feedback loop retune batching and
/// trigger tier aging under pressure.
pub struct PerfOptimizer {
    config: OptimizationConfig,
    storage: Option<Arc<TieredStorage>>,
    batch: Option<BatchProcessor>,
    compression: Option<CompressedStorage>,
    sampling: Mutex<HashMap<ProcessId, SamplingState>>,
    samples_skipped: AtomicU64,
    memory_saved_bytes: AtomicU64,
}

impl std::fmt::Debug for PerfOptimizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerfOptimizer")
            .field("stats", &self.stats())
            .finish()
    }
}

impl PerfOptimizer {
    pub fn new(config: OptimizationConfig) -> Result<Self> {
        let storage = if config.enable_tiered_storage {
            Some(Arc::new(TieredStorage::new(config.tiers.clone())?))
        } else {
            None
        };

        let batch = if config.enable_batching {
            let sink = storage.clone();
            let processor = BatchProcessor::new(
                config.batch_size,
                config.batch_interval,
                Arc::new(move |snapshots: &[MetricsSnapshot]| {
                    if let Some(storage) = &sink {
                        for snapshot in snapshots {
                            storage.store(snapshot.clone());
                        }
                    }
                }),
            );
            processor.start();
            Some(processor)
        } else {
            None
        };

        let compression = config.enable_compression.then(|| {
            CompressedStorage::new(config.compression_capacity, jiff::Timestamp::now())
        });

        Ok(Self {
            config,
            storage,
            batch,
            compression,
            sampling: Mutex::new(HashMap::new()),
            samples_skipped: AtomicU64::new(0),
            memory_saved_bytes: AtomicU64::new(0),
        })
    }

    /// Feed one snapshot through the optimized path.
    ///
    /// Returns false when the adaptive sampler declined it.
    pub fn optimize_metric(&self, process: &ProcessId, snapshot: MetricsSnapshot) -> bool {
        if self.config.enable_adaptive_sampling && !self.should_sample(process) {
            self.samples_skipped.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        if let Some(compression) = &self.compression {
            compression.store(&snapshot);
            let raw = std::mem::size_of::<MetricsSnapshot>() as u64;
            self.memory_saved_bytes.fetch_add(
                raw.saturating_sub(crate::storage::COMPRESSED_METRIC_SIZE as u64),
                Ordering::Relaxed,
            );
        }

        if let Some(batch) = &self.batch {
            batch.add(snapshot);
            return true;
        }
        if let Some(storage) = &self.storage {
            storage.store(snapshot);
        }
        true
    }

    /// Adjust a process's sampling rate for the observed load.
    ///
    /// High load (> 80) multiplies the rate by 0.8, low load (< 30) by
    /// 1.2, clamped to [0.1, 1.0].
    pub fn adjust_sampling_rate(&self, process: &ProcessId, current_load: f64) {
        let mut sampling = self
            .sampling
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let state = sampling.entry(process.clone()).or_default();

        if current_load > 80.0 {
            state.rate = (state.rate * 0.8).max(MIN_SAMPLING_RATE);
        } else if current_load < 30.0 {
            state.rate = (state.rate * 1.2).min(MAX_SAMPLING_RATE);
        }
    }

    /// React to memory pressure in `[0, 1]`.
    ///
    /// Above 0.8 the batch size halves and tier aging runs; below 0.3 the
    /// batch size doubles.
    pub fn adapt_to_memory_pressure(&self, pressure: f64) {
        let Some(batch) = &self.batch else {
            return;
        };

        if pressure > 0.8 {
            let halved = (batch.batch_size() / 2).max(MIN_BATCH_SIZE);
            batch.set_batch_size(halved);
            if let Some(storage) = &self.storage {
                storage.perform_aging();
            }
            debug!(
                target: TRACING_TARGET_OPTIMIZER,
                batch_size = halved,
                "shrank batch size under memory pressure"
            );
        } else if pressure < 0.3 {
            let doubled = (batch.batch_size() * 2).min(MAX_BATCH_SIZE);
            batch.set_batch_size(doubled);
        }
    }

    /// React to cpu load in percent.
    ///
    /// Above 80 the batch interval grows by 1.5x (capped at one second);
    /// below 30 it shrinks by 0.8x (floored at 10 ms).
    pub fn adapt_to_cpu_load(&self, cpu_load: f64) {
        let Some(batch) = &self.batch else {
            return;
        };

        let current = batch.flush_interval();
        if cpu_load > 80.0 {
            let grown = current.mul_f64(1.5).min(MAX_BATCH_INTERVAL);
            batch.set_flush_interval(grown);
        } else if cpu_load < 30.0 {
            let shrunk = current.mul_f64(0.8).max(MIN_BATCH_INTERVAL);
            batch.set_flush_interval(shrunk);
        }
    }

    /// The current sampling rate for a process.
    pub fn sampling_rate(&self, process: &ProcessId) -> f64 {
        self.sampling
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(process)
            .map_or(MAX_SAMPLING_RATE, |state| state.rate)
    }

    /// The tiered storage behind the optimizer, when enabled.
    pub fn storage(&self) -> Option<&Arc<TieredStorage>> {
        self.storage.as_ref()
    }

    /// Flush the batch processor and stop its background task.
    pub async fn shutdown(&self) {
        if let Some(batch) = &self.batch {
            batch.stop().await;
        }
    }

    /// Current optimizer counters.
    pub fn stats(&self) -> OptimizationStats {
        OptimizationStats {
            samples_skipped: self.samples_skipped.load(Ordering::Relaxed),
            batches_processed: self
                .batch
                .as_ref()
                .map_or(0, |batch| batch.stats().batches_processed),
            memory_saved_bytes: self.memory_saved_bytes.load(Ordering::Relaxed),
            compression_ratio: self
                .compression
                .as_ref()
                .map_or(0.0, CompressedStorage::compression_ratio),
        }
    }

    fn should_sample(&self, process: &ProcessId) -> bool {
        let mut sampling = self
            .sampling
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let state = sampling.entry(process.clone()).or_default();

        if rand::rng().random::<f64>() < state.rate {
            true
        } else {
            state.skip_count += 1;
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SystemMetrics;

    fn snapshot() -> MetricsSnapshot {
        MetricsSnapshot::now(SystemMetrics::default(), Default::default())
    }

    fn bare_config() -> OptimizationConfig {
        OptimizationConfig {
            enable_adaptive_sampling: false,
            enable_batching: false,
            enable_compression: false,
            enable_tiered_storage: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_metric_reaches_storage_without_batching() {
        let optimizer = PerfOptimizer::new(bare_config()).unwrap();
        assert!(optimizer.optimize_metric(&ProcessId::new(1, "p"), snapshot()));
        assert_eq!(optimizer.storage().unwrap().hot_len(), 1);
    }

    #[tokio::test]
    async fn test_sampling_rate_adjustment() {
        let optimizer = PerfOptimizer::new(OptimizationConfig::default()).unwrap();
        let process = ProcessId::new(2, "loaded");

        optimizer.adjust_sampling_rate(&process, 95.0);
        assert!((optimizer.sampling_rate(&process) - 0.8).abs() < 1e-9);

        // Repeated high load keeps shrinking toward the floor.
        for _ in 0..20 {
            optimizer.adjust_sampling_rate(&process, 95.0);
        }
        assert!((optimizer.sampling_rate(&process) - 0.1).abs() < 1e-9);

        // Low load recovers toward full sampling.
        for _ in 0..30 {
            optimizer.adjust_sampling_rate(&process, 10.0);
        }
        assert!((optimizer.sampling_rate(&process) - 1.0).abs() < 1e-9);

        optimizer.shutdown().await;
    }

    #[tokio::test]
    async fn test_sampler_at_floor_skips_most_samples() {
        let optimizer = PerfOptimizer::new(OptimizationConfig {
            enable_batching: false,
            enable_compression: false,
            enable_tiered_storage: false,
            ..Default::default()
        })
        .unwrap();
        let process = ProcessId::new(3, "noisy");
        for _ in 0..20 {
            optimizer.adjust_sampling_rate(&process, 95.0);
        }

        for _ in 0..200 {
            optimizer.optimize_metric(&process, snapshot());
        }
        let stats = optimizer.stats();
        assert!(
            stats.samples_skipped > 100,
            "rate 0.1 should skip most of 200 samples, skipped {}",
            stats.samples_skipped
        );
    }

    #[tokio::test]
    async fn test_memory_pressure_halves_batch_size() {
        let optimizer = PerfOptimizer::new(OptimizationConfig {
            enable_adaptive_sampling: false,
            batch_size: 200,
            ..Default::default()
        })
        .unwrap();

        optimizer.adapt_to_memory_pressure(0.9);
        assert_eq!(optimizer.batch.as_ref().unwrap().batch_size(), 100);

        optimizer.adapt_to_memory_pressure(0.1);
        optimizer.adapt_to_memory_pressure(0.1);
        assert_eq!(optimizer.batch.as_ref().unwrap().batch_size(), 400);

        optimizer.shutdown().await;
    }

    #[tokio::test]
    async fn test_cpu_load_retunes_interval() {
        let optimizer = PerfOptimizer::new(OptimizationConfig {
            enable_adaptive_sampling: false,
            batch_interval: Duration::from_millis(100),
            ..Default::default()
        })
        .unwrap();
        let batch = optimizer.batch.as_ref().unwrap();

        optimizer.adapt_to_cpu_load(90.0);
        assert_eq!(batch.flush_interval(), Duration::from_millis(150));

        // Growth saturates at one second.
        for _ in 0..10 {
            optimizer.adapt_to_cpu_load(90.0);
        }
        assert_eq!(batch.flush_interval(), Duration::from_secs(1));

        // Shrink saturates at ten milliseconds.
        for _ in 0..30 {
            optimizer.adapt_to_cpu_load(5.0);
        }
        assert_eq!(batch.flush_interval(), Duration::from_millis(10));

        optimizer.shutdown().await;
    }

    #[tokio::test]
    async fn test_compression_tracks_savings() {
        let optimizer = PerfOptimizer::new(OptimizationConfig {
            enable_adaptive_sampling: false,
            enable_batching: false,
            enable_tiered_storage: false,
            ..Default::default()
        })
        .unwrap();

        optimizer.optimize_metric(&ProcessId::new(4, "p"), snapshot());
        let stats = optimizer.stats();
        assert!(stats.memory_saved_bytes > 0);
        assert!(stats.compression_ratio > 0.0 && stats.compression_ratio < 0.15);
    }
}
