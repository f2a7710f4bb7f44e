#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

// Tracing target constants for consistent logging
pub const TRACING_TARGET_STORAGE: &str = "weft_monitor::storage";
pub const TRACING_TARGET_MONITOR: &str = "weft_monitor::monitor";
pub const TRACING_TARGET_ANALYTICS: &str = "weft_monitor::analytics";
pub const TRACING_TARGET_OPTIMIZER: &str = "weft_monitor::optimizer";

pub mod analytics;
pub mod monitor;
pub mod optimizer;
pub mod snapshot;
pub mod storage;

#[doc(hidden)]
pub mod prelude;

// Re-export key types
pub use analytics::{
    AlertCondition, AlertEvent, AlertManager, AlertSeverity, AnomalyResult, AnomalySeverity,
    PredictionPoint, TrendDirection, TrendPoint, TrendResult,
};
pub use monitor::{MetricEvent, MultiProcessMonitor};
pub use optimizer::{
    AggregationConfig, AutoScaler, DistributedAggregator, OptimizationConfig, OptimizationStats,
    PerfOptimizer, ScalingAction, ScalingDecision, ScalingPolicy,
};
pub use snapshot::{MetricsSnapshot, MultiProcessSnapshot, PoolId, ProcessId, SystemMetrics};
pub use storage::{
    BatchProcessor, CompressedMetric, CompressedStorage, MetricsRing, TieredStorage,
    TieredStorageConfig,
};
pub use weft_core::{Error, Result};
