//! Commonly used items from weft-monitor.
//!
//! This prelude module re-exports the monitoring, analytics, and optimizer
//! types, making it easy to import everything with a single `use`.

pub use crate::analytics::{
    AlertCondition, AlertEvent, AlertManager, AlertSeverity, AnomalyResult, AnomalySeverity,
    PredictionPoint, TrendDirection, TrendPoint, TrendResult, analyze_trend, detect_anomalies,
    detect_change_points, detect_seasonality, predict_capacity_exhaustion, predict_linear,
};
pub use crate::monitor::{MetricEvent, MultiProcessMonitor};
pub use crate::optimizer::{
    AggregationConfig, AutoScaler, DistributedAggregator, OptimizationConfig, OptimizationStats,
    PerfOptimizer, ScalingAction, ScalingDecision, ScalingPolicy,
};
pub use crate::snapshot::{
    MetricsSnapshot, MultiProcessSnapshot, PoolId, ProcessId, SystemMetrics,
};
pub use crate::storage::{
    BatchProcessor, CompressedMetric, CompressedStorage, MetricsRing, TieredStorage,
    TieredStorageConfig,
};
pub use weft_core::{Error, ErrorKind, Result};
