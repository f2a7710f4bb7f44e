//! Lightweight metric counters for pools and workers.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Shared atomic counters updated by pool workers.
///
/// Counters are approximate by design: updates are relaxed and readers
/// observe a consistent-enough snapshot for monitoring purposes.
#[derive(Debug, Default)]
pub struct PoolMetrics {
    workers: AtomicUsize,
    idle_workers: AtomicUsize,
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    total_proc_time_ns: AtomicU64,
}

impl PoolMetrics {
    pub fn set_worker_count(&self, count: usize) {
        self.workers.store(count, Ordering::Relaxed);
    }

    pub fn worker_became_idle(&self) {
        self.idle_workers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn worker_became_busy(&self) {
        // Saturating: a worker that never reported idle must not underflow.
        let _ = self
            .idle_workers
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |idle| {
                idle.checked_sub(1)
            });
    }

    /// Record one finished job with its execution latency.
    pub fn record_job(&self, proc_time_ns: u64, succeeded: bool) {
        if succeeded {
            self.jobs_completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.jobs_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.total_proc_time_ns
            .fetch_add(proc_time_ns, Ordering::Relaxed);
    }

    /// Capture the current counter values.
    pub fn snapshot(&self, jobs_pending: usize) -> PoolMetricsSnapshot {
        let completed = self.jobs_completed.load(Ordering::Relaxed);
        let failed = self.jobs_failed.load(Ordering::Relaxed);
        let total_ns = self.total_proc_time_ns.load(Ordering::Relaxed);
        let executed = completed + failed;

        PoolMetricsSnapshot {
            workers: self.workers.load(Ordering::Relaxed),
            idle_workers: self.idle_workers.load(Ordering::Relaxed),
            jobs_completed: completed,
            jobs_pending: jobs_pending as u64,
            jobs_failed: failed,
            avg_latency_ns: if executed == 0 { 0 } else { total_ns / executed },
        }
    }
}

/// Point-in-time view of a pool's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PoolMetricsSnapshot {
    pub workers: usize,
    pub idle_workers: usize,
    pub jobs_completed: u64,
    pub jobs_pending: u64,
    pub jobs_failed: u64,
    pub avg_latency_ns: u64,
}

/// Shared atomic counters updated by a single worker.
#[derive(Debug, Default)]
pub struct WorkerMetrics {
    jobs_processed: AtomicU64,
    proc_time_ns: AtomicU64,
    idle_time_ns: AtomicU64,
}

impl WorkerMetrics {
    pub fn record_processed(&self, proc_time_ns: u64) {
        self.jobs_processed.fetch_add(1, Ordering::Relaxed);
        self.proc_time_ns.fetch_add(proc_time_ns, Ordering::Relaxed);
    }

    pub fn record_idle(&self, idle_time_ns: u64) {
        self.idle_time_ns.fetch_add(idle_time_ns, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> WorkerMetricsSnapshot {
        WorkerMetricsSnapshot {
            jobs_processed: self.jobs_processed.load(Ordering::Relaxed),
            proc_time_ns: self.proc_time_ns.load(Ordering::Relaxed),
            idle_time_ns: self.idle_time_ns.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of one worker's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct WorkerMetricsSnapshot {
    pub jobs_processed: u64,
    pub proc_time_ns: u64,
    pub idle_time_ns: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_latency() {
        let metrics = PoolMetrics::default();
        metrics.record_job(100, true);
        metrics.record_job(300, true);

        let snapshot = metrics.snapshot(0);
        assert_eq!(snapshot.jobs_completed, 2);
        assert_eq!(snapshot.avg_latency_ns, 200);
    }

    #[test]
    fn test_failed_jobs_counted_separately() {
        let metrics = PoolMetrics::default();
        metrics.record_job(50, true);
        metrics.record_job(150, false);

        let snapshot = metrics.snapshot(3);
        assert_eq!(snapshot.jobs_completed, 1);
        assert_eq!(snapshot.jobs_failed, 1);
        assert_eq!(snapshot.jobs_pending, 3);
    }

    #[test]
    fn test_idle_counter_never_underflows() {
        let metrics = PoolMetrics::default();
        metrics.worker_became_busy();
        assert_eq!(metrics.snapshot(0).idle_workers, 0);
    }
}
