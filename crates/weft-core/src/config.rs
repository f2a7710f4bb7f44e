//! Structured fabric configuration.
//!
//! The fabric consumes a fully structured configuration object; loading it
//! from files, watching, and reloading are the host application's concern.

use serde::{Deserialize, Serialize};

/// Default number of I/O executor workers.
const DEFAULT_IO_WORKERS: usize = 2;
/// Default number of work executor workers.
const DEFAULT_WORK_WORKERS: usize = 4;
/// Default job queue capacity.
const DEFAULT_QUEUE_SIZE: usize = 10_000;
/// Default monitoring collection interval in milliseconds.
const DEFAULT_MONITORING_INTERVAL_MS: u64 = 1_000;

/// Top-level configuration consumed by the fabric runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FabricConfig {
    pub network: NetworkConfig,
    pub thread_pools: ThreadPoolConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub monitoring: MonitoringConfig,
}

/// Network bridge settings, consumed by external transport collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub port: u16,
    pub max_connections: u32,
    pub timeout_ms: u64,
    pub retry_attempts: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: 8452,
            max_connections: 1_024,
            timeout_ms: 5_000,
            retry_attempts: 3,
        }
    }
}

/// Worker pool sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadPoolConfig {
    pub io_workers: usize,
    pub work_workers: usize,
    pub queue_size: usize,
    pub lockfree: bool,
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            io_workers: DEFAULT_IO_WORKERS,
            work_workers: DEFAULT_WORK_WORKERS,
            queue_size: DEFAULT_QUEUE_SIZE,
            lockfree: false,
        }
    }
}

/// Database settings, consumed by external persistent-queue collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub connection_string: String,
    pub pool: DatabasePoolConfig,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            kind: "postgres".to_owned(),
            connection_string: String::new(),
            pool: DatabasePoolConfig::default(),
        }
    }
}

/// Connection pool sizing for the database collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabasePoolConfig {
    pub min_connections: u32,
    pub max_connections: u32,
    pub idle_timeout_s: u64,
}

impl Default for DatabasePoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 1,
            max_connections: 16,
            idle_timeout_s: 300,
        }
    }
}

/// Logging settings; writer implementations are external collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(rename = "async")]
    pub asynchronous: bool,
    pub writers: Vec<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            asynchronous: true,
            writers: vec!["console".to_owned()],
        }
    }
}

/// Monitoring collection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub enabled: bool,
    pub interval_ms: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: DEFAULT_MONITORING_INTERVAL_MS,
        }
    }
}

impl FabricConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the I/O worker count.
    #[must_use]
    pub fn with_io_workers(mut self, workers: usize) -> Self {
        self.thread_pools.io_workers = workers;
        self
    }

    /// Set the work worker count.
    #[must_use]
    pub fn with_work_workers(mut self, workers: usize) -> Self {
        self.thread_pools.work_workers = workers;
        self
    }

    /// Set the job queue capacity.
    #[must_use]
    pub fn with_queue_size(mut self, size: usize) -> Self {
        self.thread_pools.queue_size = size;
        self
    }

    /// Set the monitoring collection interval in milliseconds.
    #[must_use]
    pub fn with_monitoring_interval_ms(mut self, interval_ms: u64) -> Self {
        self.monitoring.interval_ms = interval_ms;
        self
    }

    /// Validate the configuration and return any issues.
    pub fn validate(&self) -> Result<(), String> {
        if self.thread_pools.io_workers == 0 {
            return Err("thread_pools.io_workers cannot be zero".to_owned());
        }
        if self.thread_pools.work_workers == 0 {
            return Err("thread_pools.work_workers cannot be zero".to_owned());
        }
        if self.thread_pools.queue_size == 0 {
            return Err("thread_pools.queue_size cannot be zero".to_owned());
        }
        if self.monitoring.enabled && self.monitoring.interval_ms == 0 {
            return Err("monitoring.interval_ms cannot be zero when enabled".to_owned());
        }
        if self.database.pool.min_connections > self.database.pool.max_connections {
            return Err("database.pool.min_connections exceeds max_connections".to_owned());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = FabricConfig::new();
        assert!(config.validate().is_ok());
        assert_eq!(config.thread_pools.io_workers, DEFAULT_IO_WORKERS);
        assert_eq!(config.thread_pools.work_workers, DEFAULT_WORK_WORKERS);
    }

    #[test]
    fn test_config_builder() {
        let config = FabricConfig::new()
            .with_io_workers(8)
            .with_work_workers(16)
            .with_queue_size(500);

        assert_eq!(config.thread_pools.io_workers, 8);
        assert_eq!(config.thread_pools.work_workers, 16);
        assert_eq!(config.thread_pools.queue_size, 500);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let zero_workers = FabricConfig::new().with_work_workers(0);
        assert!(zero_workers.validate().is_err());

        let zero_interval = FabricConfig::new().with_monitoring_interval_ms(0);
        assert!(zero_interval.validate().is_err());
    }

    #[test]
    fn test_config_roundtrip() {
        let config = FabricConfig::new().with_queue_size(2_048);
        let json = serde_json::to_string(&config).unwrap();
        let parsed: FabricConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.thread_pools.queue_size, 2_048);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: FabricConfig =
            serde_json::from_str(r#"{"thread_pools": {"work_workers": 12}}"#).unwrap();
        assert_eq!(parsed.thread_pools.work_workers, 12);
        assert_eq!(parsed.thread_pools.io_workers, DEFAULT_IO_WORKERS);
        assert_eq!(parsed.network.retry_attempts, 3);
    }
}
