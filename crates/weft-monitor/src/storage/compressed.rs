//! Compressed metric samples and their append-only storage.

use std::sync::Mutex;

use jiff::{SignedDuration, Timestamp};

use crate::snapshot::{MetricsSnapshot, SystemMetrics};
use weft_pool::PoolMetricsSnapshot;

/// Size of one encoded [`CompressedMetric`] in bytes.
pub const COMPRESSED_METRIC_SIZE: usize = 20;

/// A lossily compressed metric sample.
///
/// The persisted layout is exactly 20 bytes, packed little-endian:
/// `timestamp_offset:u32 | cpu:u16 | mem_mb:u32 | threads:u16 |
/// jobs_done:u32 | queue_depth:u16 | latency_ms:u16`. The timestamp offset
/// is seconds since the owning storage's base time; cpu is in 0.01 % units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompressedMetric {
    pub timestamp_offset: u32,
    pub cpu_centi_percent: u16,
    pub memory_mb: u32,
    pub thread_count: u16,
    pub jobs_completed: u32,
    pub queue_depth: u16,
    pub latency_ms: u16,
}

impl CompressedMetric {
    /// Encode into the packed little-endian wire layout.
    pub fn encode(&self) -> [u8; COMPRESSED_METRIC_SIZE] {
        let mut out = [0u8; COMPRESSED_METRIC_SIZE];
        out[0..4].copy_from_slice(&self.timestamp_offset.to_le_bytes());
        out[4..6].copy_from_slice(&self.cpu_centi_percent.to_le_bytes());
        out[6..10].copy_from_slice(&self.memory_mb.to_le_bytes());
        out[10..12].copy_from_slice(&self.thread_count.to_le_bytes());
        out[12..16].copy_from_slice(&self.jobs_completed.to_le_bytes());
        out[16..18].copy_from_slice(&self.queue_depth.to_le_bytes());
        out[18..20].copy_from_slice(&self.latency_ms.to_le_bytes());
        out
    }

    /// Decode from the packed little-endian wire layout.
    pub fn decode(data: &[u8; COMPRESSED_METRIC_SIZE]) -> Self {
        let field = |range: std::ops::Range<usize>| &data[range];
        Self {
            timestamp_offset: u32::from_le_bytes(field(0..4).try_into().unwrap_or_default()),
            cpu_centi_percent: u16::from_le_bytes(field(4..6).try_into().unwrap_or_default()),
            memory_mb: u32::from_le_bytes(field(6..10).try_into().unwrap_or_default()),
            thread_count: u16::from_le_bytes(field(10..12).try_into().unwrap_or_default()),
            jobs_completed: u32::from_le_bytes(field(12..16).try_into().unwrap_or_default()),
            queue_depth: u16::from_le_bytes(field(16..18).try_into().unwrap_or_default()),
            latency_ms: u16::from_le_bytes(field(18..20).try_into().unwrap_or_default()),
        }
    }
}

/// Append-only circular store of compressed samples.
///
/// Compression is lossy: cpu at 0.01 % granularity, memory at MB
/// granularity, latency at ms granularity. Decompression re-inflates
/// best-effort snapshots. Once the capacity is reached the oldest samples
/// are overwritten.
pub struct CompressedStorage {
    base_time: Timestamp,
    capacity: usize,
    entries: Mutex<CircularEntries>,
}

struct CircularEntries {
    samples: Vec<CompressedMetric>,
    write_index: usize,
}

impl std::fmt::Debug for CompressedStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompressedStorage")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

impl CompressedStorage {
    /// Create storage with `capacity` samples relative to `base_time`.
    pub fn new(capacity: usize, base_time: Timestamp) -> Self {
        Self {
            base_time,
            capacity,
            entries: Mutex::new(CircularEntries {
                samples: Vec::with_capacity(capacity.min(4_096)),
                write_index: 0,
            }),
        }
    }

    /// The base timestamp offsets are measured from.
    pub fn base_time(&self) -> Timestamp {
        self.base_time
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CircularEntries> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Compress and store a snapshot. Returns false when `capacity` is zero.
    pub fn store(&self, snapshot: &MetricsSnapshot) -> bool {
        if self.capacity == 0 {
            return false;
        }
        self.store_metric(self.compress(snapshot))
    }

    /// Store an already-compressed sample, overwriting the oldest at capacity.
    pub fn store_metric(&self, metric: CompressedMetric) -> bool {
        if self.capacity == 0 {
            return false;
        }
        let mut entries = self.lock();
        if entries.samples.len() < self.capacity {
            entries.samples.push(metric);
        } else {
            let index = entries.write_index % self.capacity;
            entries.samples[index] = metric;
        }
        entries.write_index += 1;
        true
    }

    /// Re-inflate the sample at `index`.
    pub fn retrieve(&self, index: usize) -> Option<MetricsSnapshot> {
        let entries = self.lock();
        entries
            .samples
            .get(index)
            .map(|metric| self.decompress(metric))
    }

    /// Re-inflate every sample captured within `[start, end]`.
    pub fn retrieve_range(&self, start: Timestamp, end: Timestamp) -> Vec<MetricsSnapshot> {
        let entries = self.lock();
        entries
            .samples
            .iter()
            .filter(|metric| {
                let at = self.timestamp_of(metric);
                at >= start && at <= end
            })
            .map(|metric| self.decompress(metric))
            .collect()
    }

    /// Remove and return every sample older than `cutoff`.
    pub fn drain_older_than(&self, cutoff: Timestamp) -> Vec<CompressedMetric> {
        let mut entries = self.lock();
        let (older, kept): (Vec<CompressedMetric>, Vec<CompressedMetric>) = entries
            .samples
            .drain(..)
            .partition(|metric| self.timestamp_of(metric) < cutoff);
        entries.samples = kept;
        entries.write_index = entries.samples.len();
        older
    }

    /// The wall-clock capture time of a stored sample.
    pub fn timestamp_of(&self, metric: &CompressedMetric) -> Timestamp {
        self.base_time + SignedDuration::from_secs(i64::from(metric.timestamp_offset))
    }

    /// Number of stored samples.
    pub fn len(&self) -> usize {
        self.lock().samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().samples.is_empty()
    }

    /// Bytes used by the stored samples.
    pub fn memory_usage(&self) -> usize {
        self.len() * COMPRESSED_METRIC_SIZE
    }

    /// Ratio of compressed to raw snapshot size; below 1.0 means smaller.
    pub fn compression_ratio(&self) -> f64 {
        COMPRESSED_METRIC_SIZE as f64 / std::mem::size_of::<MetricsSnapshot>() as f64
    }

    fn compress(&self, snapshot: &MetricsSnapshot) -> CompressedMetric {
        let offset = snapshot
            .capture_time
            .duration_since(self.base_time)
            .as_secs()
            .clamp(0, i64::from(u32::MAX)) as u32;

        CompressedMetric {
            timestamp_offset: offset,
            cpu_centi_percent: (snapshot.system.cpu_usage_percent * 100.0)
                .clamp(0.0, f64::from(u16::MAX)) as u16,
            memory_mb: (snapshot.system.memory_usage_bytes / (1024 * 1024))
                .min(u64::from(u32::MAX)) as u32,
            thread_count: snapshot.system.active_threads.min(u32::from(u16::MAX)) as u16,
            jobs_completed: snapshot.pool.jobs_completed.min(u64::from(u32::MAX)) as u32,
            queue_depth: snapshot.pool.jobs_pending.min(u64::from(u16::MAX)) as u16,
            latency_ms: (snapshot.pool.avg_latency_ns / 1_000_000).min(u64::from(u16::MAX))
                as u16,
        }
    }

    fn decompress(&self, metric: &CompressedMetric) -> MetricsSnapshot {
        MetricsSnapshot {
            capture_time: self.timestamp_of(metric),
            system: SystemMetrics {
                cpu_usage_percent: f64::from(metric.cpu_centi_percent) / 100.0,
                memory_usage_bytes: u64::from(metric.memory_mb) * 1024 * 1024,
                active_threads: u32::from(metric.thread_count),
            },
            pool: PoolMetricsSnapshot {
                jobs_completed: u64::from(metric.jobs_completed),
                jobs_pending: u64::from(metric.queue_depth),
                avg_latency_ns: u64::from(metric.latency_ms) * 1_000_000,
                ..Default::default()
            },
            workers: Default::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_snapshot(base: Timestamp, offset_secs: i64) -> MetricsSnapshot {
        MetricsSnapshot {
            capture_time: base + SignedDuration::from_secs(offset_secs),
            system: SystemMetrics {
                cpu_usage_percent: 42.37,
                memory_usage_bytes: 256 * 1024 * 1024,
                active_threads: 12,
            },
            pool: PoolMetricsSnapshot {
                jobs_completed: 1_500,
                jobs_pending: 25,
                avg_latency_ns: 3_000_000,
                ..Default::default()
            },
            workers: Default::default(),
        }
    }

    #[test]
    fn test_wire_layout_is_20_bytes_little_endian() {
        let metric = CompressedMetric {
            timestamp_offset: 0x0102_0304,
            cpu_centi_percent: 0x0506,
            memory_mb: 0x0708_090a,
            thread_count: 0x0b0c,
            jobs_completed: 0x0d0e_0f10,
            queue_depth: 0x1112,
            latency_ms: 0x1314,
        };

        let encoded = metric.encode();
        assert_eq!(encoded.len(), COMPRESSED_METRIC_SIZE);
        assert_eq!(&encoded[0..4], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&encoded[4..6], &[0x06, 0x05]);
        assert_eq!(&encoded[6..10], &[0x0a, 0x09, 0x08, 0x07]);
        assert_eq!(&encoded[10..12], &[0x0c, 0x0b]);
        assert_eq!(&encoded[12..16], &[0x10, 0x0f, 0x0e, 0x0d]);
        assert_eq!(&encoded[16..18], &[0x12, 0x11]);
        assert_eq!(&encoded[18..20], &[0x14, 0x13]);
        assert_eq!(CompressedMetric::decode(&encoded), metric);
    }

    #[test]
    fn test_lossy_roundtrip_preserves_granularity() {
        let base = Timestamp::now();
        let storage = CompressedStorage::new(16, base);
        assert!(storage.store(&sample_snapshot(base, 90)));

        let restored = storage.retrieve(0).unwrap();
        assert_eq!(restored.system.cpu_usage_percent, 42.37);
        assert_eq!(restored.system.memory_usage_bytes, 256 * 1024 * 1024);
        assert_eq!(restored.system.active_threads, 12);
        assert_eq!(restored.pool.jobs_completed, 1_500);
        assert_eq!(restored.pool.jobs_pending, 25);
        assert_eq!(restored.pool.avg_latency_ns, 3_000_000);
        assert_eq!(
            restored.capture_time,
            base + SignedDuration::from_secs(90)
        );
    }

    #[test]
    fn test_capacity_wraps_overwriting_oldest() {
        let base = Timestamp::now();
        let storage = CompressedStorage::new(2, base);
        for offset in 0..3 {
            storage.store(&sample_snapshot(base, offset));
        }

        assert_eq!(storage.len(), 2);
        // The slot of the oldest sample now holds the newest one.
        let overwritten = storage.retrieve(0).unwrap();
        assert_eq!(
            overwritten.capture_time,
            base + SignedDuration::from_secs(2)
        );
    }

    #[test]
    fn test_retrieve_range() {
        let base = Timestamp::now();
        let storage = CompressedStorage::new(16, base);
        for offset in [10, 20, 30, 40] {
            storage.store(&sample_snapshot(base, offset));
        }

        let range = storage.retrieve_range(
            base + SignedDuration::from_secs(15),
            base + SignedDuration::from_secs(35),
        );
        assert_eq!(range.len(), 2);
    }

    #[test]
    fn test_compression_ratio_is_below_threshold() {
        let storage = CompressedStorage::new(4, Timestamp::now());
        assert!(storage.compression_ratio() < 0.15);
    }
}
