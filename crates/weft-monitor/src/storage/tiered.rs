//! Hot/warm/cold tiered snapshot storage.

use std::sync::Mutex;
use std::time::Duration;

use jiff::{SignedDuration, Timestamp};
use tracing::debug;

use super::compressed::{COMPRESSED_METRIC_SIZE, CompressedStorage};
use super::ring::MetricsRing;
use crate::TRACING_TARGET_STORAGE;
use crate::snapshot::MetricsSnapshot;
use weft_core::Result;

/// Capacities and aging policy for [`TieredStorage`].
#[derive(Debug, Clone)]
pub struct TieredStorageConfig {
    /// Hot tier capacity; must be a power of two.
    pub hot_capacity: usize,
    /// Warm tier capacity in compressed samples.
    pub warm_capacity: usize,
    /// Cold tier capacity in compressed samples.
    pub cold_capacity: usize,
    /// Warm samples older than this move to cold during aging.
    pub warm_max_age: Duration,
}

impl Default for TieredStorageConfig {
    fn default() -> Self {
        Self {
            hot_capacity: 1_024,
            warm_capacity: 4_096,
            cold_capacity: 8_192,
            warm_max_age: Duration::from_secs(3_600),
        }
    }
}

/// Per-tier memory usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TierMemoryStats {
    pub hot_tier_bytes: usize,
    pub warm_tier_bytes: usize,
    pub cold_tier_bytes: usize,
    pub total_bytes: usize,
}

/// Storage layering a lock-free hot ring over compressed warm and cold
/// tiers sharing one base time.
///
/// When the hot tier fills past half its capacity, `perform_aging` moves
/// the older half into the warm tier and pushes warm samples past their
/// maximum age into cold. `retrieve` consults warm first, then cold.
pub struct TieredStorage {
    config: TieredStorageConfig,
    hot: MetricsRing<MetricsSnapshot>,
    warm: CompressedStorage,
    cold: CompressedStorage,
    aging: Mutex<()>,
}

impl std::fmt::Debug for TieredStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredStorage")
            .field("hot", &self.hot.len())
            .field("warm", &self.warm.len())
            .field("cold", &self.cold.len())
            .finish()
    }
}

impl TieredStorage {
    /// Create tiered storage based at the current time.
    pub fn new(config: TieredStorageConfig) -> Result<Self> {
        let base_time = Timestamp::now();
        Ok(Self {
            hot: MetricsRing::new(config.hot_capacity)?,
            warm: CompressedStorage::new(config.warm_capacity, base_time),
            cold: CompressedStorage::new(config.cold_capacity, base_time),
            config,
            aging: Mutex::new(()),
        })
    }

    /// Store a snapshot in the hot tier, aging first when it is full.
    pub fn store(&self, snapshot: MetricsSnapshot) {
        if !self.hot.push(snapshot.clone()) {
            self.perform_aging();
            // Aging frees at least half the ring.
            self.hot.push_evicting(snapshot);
        } else if self.hot.len() > self.config.hot_capacity / 2 {
            self.perform_aging();
        }
    }

    /// Move the older half of the hot tier into warm and over-age warm
    /// samples into cold.
    pub fn perform_aging(&self) {
        // One aging pass at a time; concurrent callers skip.
        let Ok(_guard) = self.aging.try_lock() else {
            return;
        };

        let hot_now = self.hot.len();
        let to_age = hot_now / 2;
        for _ in 0..to_age {
            match self.hot.pop() {
                Some(snapshot) => {
                    self.warm.store(&snapshot);
                }
                None => break,
            }
        }

        let age_limit = SignedDuration::try_from(self.config.warm_max_age)
            .unwrap_or_else(|_| SignedDuration::from_secs(3_600));
        let cutoff = Timestamp::now() - age_limit;
        let expired = self.warm.drain_older_than(cutoff);
        let expired_count = expired.len();
        for metric in expired {
            self.cold.store_metric(metric);
        }

        if to_age > 0 || expired_count > 0 {
            debug!(
                target: TRACING_TARGET_STORAGE,
                aged_to_warm = to_age,
                aged_to_cold = expired_count,
                "tier aging pass"
            );
        }
    }

    /// Look up the snapshot captured closest to `time_point`, consulting
    /// warm first, then cold. Matches within one second are accepted.
    pub fn retrieve(&self, time_point: Timestamp) -> Option<MetricsSnapshot> {
        let window = SignedDuration::from_secs(1);
        for tier in [&self.warm, &self.cold] {
            let candidates = tier.retrieve_range(time_point - window, time_point + window);
            if let Some(snapshot) = candidates.into_iter().min_by_key(|snapshot| {
                snapshot
                    .capture_time
                    .duration_since(time_point)
                    .abs()
                    .as_millis()
            }) {
                return Some(snapshot);
            }
        }
        None
    }

    /// Per-tier byte usage.
    pub fn memory_stats(&self) -> TierMemoryStats {
        let hot_tier_bytes = self.hot.len() * std::mem::size_of::<MetricsSnapshot>();
        let warm_tier_bytes = self.warm.len() * COMPRESSED_METRIC_SIZE;
        let cold_tier_bytes = self.cold.len() * COMPRESSED_METRIC_SIZE;
        TierMemoryStats {
            hot_tier_bytes,
            warm_tier_bytes,
            cold_tier_bytes,
            total_bytes: hot_tier_bytes + warm_tier_bytes + cold_tier_bytes,
        }
    }

    /// Number of snapshots in the hot tier.
    pub fn hot_len(&self) -> usize {
        self.hot.len()
    }

    /// Number of compressed samples in the warm tier.
    pub fn warm_len(&self) -> usize {
        self.warm.len()
    }

    /// Number of compressed samples in the cold tier.
    pub fn cold_len(&self) -> usize {
        self.cold.len()
    }
}
