//! Pluggable log and metric sink contract.
//!
//! The fabric emits structured records through this trait; hosts may plug in
//! their own implementation. No output format is mandated.

/// Severity level for structured log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Destination for structured log records and metric samples.
pub trait Sink: Send + Sync {
    /// Emit a structured log record.
    fn log(&self, level: LogLevel, fields: &[(&str, &str)]);

    /// Record a metric sample with labels.
    fn record(&self, metric: &str, value: f64, labels: &[(&str, &str)]);
}

/// Default sink that forwards records to the `tracing` ecosystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl Sink for TracingSink {
    fn log(&self, level: LogLevel, fields: &[(&str, &str)]) {
        match level {
            LogLevel::Trace => tracing::trace!(fields = ?fields),
            LogLevel::Debug => tracing::debug!(fields = ?fields),
            LogLevel::Info => tracing::info!(fields = ?fields),
            LogLevel::Warn => tracing::warn!(fields = ?fields),
            LogLevel::Error => tracing::error!(fields = ?fields),
        }
    }

    fn record(&self, metric: &str, value: f64, labels: &[(&str, &str)]) {
        tracing::debug!(metric = %metric, value = value, labels = ?labels, "metric sample");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        records: Mutex<Vec<(String, f64)>>,
    }

    impl Sink for RecordingSink {
        fn log(&self, _level: LogLevel, _fields: &[(&str, &str)]) {}

        fn record(&self, metric: &str, value: f64, _labels: &[(&str, &str)]) {
            self.records.lock().unwrap().push((metric.to_owned(), value));
        }
    }

    #[test]
    fn test_custom_sink_receives_records() {
        let sink = RecordingSink::default();
        sink.record("jobs_completed", 42.0, &[("pool", "work")]);

        let records = sink.records.lock().unwrap();
        assert_eq!(records.as_slice(), &[("jobs_completed".to_owned(), 42.0)]);
    }

    #[test]
    fn test_level_ordering() {
        assert!(LogLevel::Trace < LogLevel::Error);
        assert_eq!(LogLevel::Warn.to_string(), "warn");
    }
}
