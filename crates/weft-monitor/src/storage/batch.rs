//! Batch accumulation of metric snapshots.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::TRACING_TARGET_STORAGE;
use crate::snapshot::MetricsSnapshot;

/// Callback invoked with each completed batch.
pub type BatchCallback = Arc<dyn Fn(&[MetricsSnapshot]) + Send + Sync>;

/// Counters exposed by the batch processor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub batches_processed: u64,
    pub metrics_processed: u64,
    pub flush_count: u64,
}

struct BatchInner {
    batch_size: AtomicUsize,
    flush_interval_ms: AtomicU64,
    callback: BatchCallback,
    batch: Mutex<Vec<MetricsSnapshot>>,
    notify: Notify,
    batches_processed: AtomicU64,
    metrics_processed: AtomicU64,
    flush_count: AtomicU64,
}

impl BatchInner {
    fn flush(&self) {
        let batch = {
            let mut pending = self
                .batch
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if pending.is_empty() {
                return;
            }
            std::mem::take(&mut *pending)
        };

        self.batches_processed.fetch_add(1, Ordering::Relaxed);
        self.metrics_processed
            .fetch_add(batch.len() as u64, Ordering::Relaxed);
        self.flush_count.fetch_add(1, Ordering::Relaxed);
        (self.callback)(&batch);
    }
}

/// Accumulates snapshots and hands full batches to a callback.
///
/// A batch is flushed when it reaches the configured size or when the
/// flush interval elapses, whichever comes first. Batch size and interval
/// can be retuned at runtime by the optimizer.
pub struct BatchProcessor {
    inner: Arc<BatchInner>,
    running: AtomicBool,
    worker: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl std::fmt::Debug for BatchProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchProcessor")
            .field("batch_size", &self.batch_size())
            .field("running", &self.running.load(Ordering::Acquire))
            .finish()
    }
}

impl BatchProcessor {
    pub fn new(batch_size: usize, flush_interval: Duration, callback: BatchCallback) -> Self {
        Self {
            inner: Arc::new(BatchInner {
                batch_size: AtomicUsize::new(batch_size.max(1)),
                flush_interval_ms: AtomicU64::new(flush_interval.as_millis().max(1) as u64),
                callback,
                batch: Mutex::new(Vec::new()),
                notify: Notify::new(),
                batches_processed: AtomicU64::new(0),
                metrics_processed: AtomicU64::new(0),
                flush_count: AtomicU64::new(0),
            }),
            running: AtomicBool::new(false),
            worker: Mutex::new(None),
        }
    }

    /// Add a snapshot to the current batch.
    pub fn add(&self, snapshot: MetricsSnapshot) {
        let len = {
            let mut pending = self
                .inner
                .batch
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            pending.push(snapshot);
            pending.len()
        };
        if len >= self.inner.batch_size.load(Ordering::Relaxed) {
            self.inner.notify.notify_one();
        }
    }

    /// Flush whatever is accumulated right now on the caller's thread.
    pub fn flush(&self) {
        self.inner.flush();
    }

    /// Start the background flush task. Idempotent.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }

        let inner = Arc::clone(&self.inner);
        let shutdown = CancellationToken::new();
        let task_shutdown = shutdown.clone();
        let handle = tokio::spawn(async move {
            loop {
                let interval =
                    Duration::from_millis(inner.flush_interval_ms.load(Ordering::Relaxed));
                tokio::select! {
                    biased;
                    _ = task_shutdown.cancelled() => {
                        inner.flush();
                        break;
                    }
                    _ = inner.notify.notified() => {
                        let full = {
                            let pending = inner
                                .batch
                                .lock()
                                .unwrap_or_else(|poisoned| poisoned.into_inner());
                            pending.len() >= inner.batch_size.load(Ordering::Relaxed)
                        };
                        if full {
                            inner.flush();
                        }
                    }
                    _ = tokio::time::sleep(interval) => inner.flush(),
                }
            }
        });

        *self
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some((shutdown, handle));
        debug!(target: TRACING_TARGET_STORAGE, "batch processor started");
    }

    /// Stop the background task, flushing the remainder. Idempotent.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some((shutdown, handle)) = worker {
            shutdown.cancel();
            let _ = handle.await;
        }
        debug!(target: TRACING_TARGET_STORAGE, "batch processor stopped");
    }

    /// Current batch size threshold.
    pub fn batch_size(&self) -> usize {
        self.inner.batch_size.load(Ordering::Relaxed)
    }

    /// Retune the batch size threshold.
    pub fn set_batch_size(&self, batch_size: usize) {
        self.inner
            .batch_size
            .store(batch_size.max(1), Ordering::Relaxed);
    }

    /// Current flush interval.
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.inner.flush_interval_ms.load(Ordering::Relaxed))
    }

    /// Retune the flush interval.
    pub fn set_flush_interval(&self, interval: Duration) {
        self.inner
            .flush_interval_ms
            .store(interval.as_millis().max(1) as u64, Ordering::Relaxed);
    }

    /// Processing counters.
    pub fn stats(&self) -> BatchStats {
        BatchStats {
            batches_processed: self.inner.batches_processed.load(Ordering::Relaxed),
            metrics_processed: self.inner.metrics_processed.load(Ordering::Relaxed),
            flush_count: self.inner.flush_count.load(Ordering::Relaxed),
        }
    }
}
