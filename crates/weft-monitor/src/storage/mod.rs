//! Tiered metric storage: lock-free hot ring, compressed warm and cold
//! tiers, and the batch processor feeding them.

mod batch;
mod compressed;
mod ring;
mod tiered;

pub use batch::{BatchCallback, BatchProcessor, BatchStats};
pub use compressed::{COMPRESSED_METRIC_SIZE, CompressedMetric, CompressedStorage};
pub use ring::MetricsRing;
pub use tiered::{TierMemoryStats, TieredStorage, TieredStorageConfig};
