//! Metric snapshot types shared across the monitoring layer.

use std::collections::HashMap;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use weft_pool::{PoolMetricsSnapshot, WorkerMetricsSnapshot};

/// Identifies one monitored process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessId {
    pub pid: u32,
    pub name: String,
    pub start_time: Timestamp,
}

impl ProcessId {
    pub fn new(pid: u32, name: impl Into<String>) -> Self {
        Self {
            pid,
            name: name.into(),
            start_time: Timestamp::now(),
        }
    }
}

impl std::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.name, self.pid)
    }
}

/// Identifies one pool instance inside a monitored process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PoolId {
    pub process: ProcessId,
    pub pool_name: String,
    pub instance_id: u32,
}

impl PoolId {
    pub fn new(process: ProcessId, pool_name: impl Into<String>, instance_id: u32) -> Self {
        Self {
            process,
            pool_name: pool_name.into(),
            instance_id,
        }
    }
}

impl std::fmt::Display for PoolId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}@{}", self.process, self.pool_name, self.instance_id)
    }
}

/// Process-level system metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub cpu_usage_percent: f64,
    pub memory_usage_bytes: u64,
    pub active_threads: u32,
}

/// One process's metrics captured at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub capture_time: Timestamp,
    pub system: SystemMetrics,
    pub pool: PoolMetricsSnapshot,
    pub workers: HashMap<String, WorkerMetricsSnapshot>,
}

impl MetricsSnapshot {
    /// A snapshot captured now with the given system and pool metrics.
    pub fn now(system: SystemMetrics, pool: PoolMetricsSnapshot) -> Self {
        Self {
            capture_time: Timestamp::now(),
            system,
            pool,
            workers: HashMap::new(),
        }
    }
}

/// Aggregated view over every registered process and pool.
#[derive(Debug, Clone, Default)]
pub struct MultiProcessSnapshot {
    pub capture_time: Timestamp,
    pub global_system: SystemMetrics,
    pub process_metrics: HashMap<ProcessId, SystemMetrics>,
    pub pool_metrics: HashMap<PoolId, PoolMetricsSnapshot>,
}
