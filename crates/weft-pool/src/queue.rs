//! FIFO job queues shared between producers and pool workers.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;
use tracing::debug;

use crate::TRACING_TARGET_QUEUE;
use crate::job::Job;
use weft_core::{Error, Result};

struct QueueInner {
    jobs: VecDeque<Job>,
    stopping: bool,
}

/// A thread-safe FIFO queue of jobs.
///
/// The `VecDeque` length is the single source of truth for size, so
/// `len() == 0` and `is_empty()` can never disagree. A stopping queue
/// rejects new work but still yields already-queued jobs, which is what
/// lets a pool drain on shutdown.
pub struct JobQueue {
    name: String,
    capacity: usize,
    inner: Mutex<QueueInner>,
    notify: Notify,
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("name", &self.name)
            .field("len", &self.len())
            .field("stopping", &self.is_stopping())
            .finish()
    }
}

impl JobQueue {
    /// Create a queue bounded at `capacity` jobs.
    pub fn bounded(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            capacity,
            inner: Mutex::new(QueueInner {
                jobs: VecDeque::new(),
                stopping: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Create a queue without a practical capacity bound.
    pub fn unbounded(name: impl Into<String>) -> Self {
        Self::bounded(name, usize::MAX)
    }

    /// The queue name, used in logs and error messages.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueInner> {
        // A poisoned lock cannot corrupt the VecDeque invariants, so recover.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a job. Fails with `QueueStopped` once the queue is stopping
    /// and with `QueueFull` at capacity.
    pub fn enqueue(&self, job: Job) -> Result<()> {
        {
            let mut inner = self.lock();
            if inner.stopping {
                return Err(Error::queue_stopped(format!(
                    "queue '{}' is stopping",
                    self.name
                )));
            }
            if inner.jobs.len() >= self.capacity {
                return Err(Error::queue_full(format!(
                    "queue '{}' is at capacity {}",
                    self.name, self.capacity
                )));
            }
            inner.jobs.push_back(job);
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Append a batch of jobs in order. All-or-nothing: if the batch does
    /// not fit the remaining capacity nothing is enqueued.
    pub fn enqueue_batch(&self, jobs: Vec<Job>) -> Result<()> {
        let count = jobs.len();
        {
            let mut inner = self.lock();
            if inner.stopping {
                return Err(Error::queue_stopped(format!(
                    "queue '{}' is stopping",
                    self.name
                )));
            }
            if self.capacity.saturating_sub(inner.jobs.len()) < count {
                return Err(Error::queue_full(format!(
                    "queue '{}' cannot accept a batch of {}",
                    self.name, count
                )));
            }
            inner.jobs.extend(jobs);
        }
        for _ in 0..count {
            self.notify.notify_one();
        }
        debug!(
            target: TRACING_TARGET_QUEUE,
            queue = %self.name,
            count = count,
            "enqueued job batch"
        );
        Ok(())
    }

    /// Remove and return the oldest job, waiting until one is available.
    ///
    /// Returns `QueueStopped` once the queue is stopping and empty.
    pub async fn dequeue(&self) -> Result<Job> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            {
                let mut inner = self.lock();
                if let Some(job) = inner.jobs.pop_front() {
                    return Ok(job);
                }
                if inner.stopping {
                    return Err(Error::queue_stopped(format!(
                        "queue '{}' is stopped",
                        self.name
                    )));
                }
            }
            notified.await;
        }
    }

    /// Remove and return the oldest job without waiting.
    pub fn try_dequeue(&self) -> Option<Job> {
        self.lock().jobs.pop_front()
    }

    /// Drain every pending job in enqueue order.
    pub fn dequeue_batch(&self) -> Vec<Job> {
        self.lock().jobs.drain(..).collect()
    }

    /// Discard all pending jobs without executing them.
    ///
    /// Jobs with completion handles resolve as cancelled on drop.
    pub fn clear(&self) -> usize {
        let dropped = {
            let mut inner = self.lock();
            let jobs: Vec<Job> = inner.jobs.drain(..).collect();
            jobs.len()
        };
        if dropped > 0 {
            debug!(
                target: TRACING_TARGET_QUEUE,
                queue = %self.name,
                dropped = dropped,
                "cleared pending jobs"
            );
        }
        dropped
    }

    /// Number of pending jobs.
    pub fn len(&self) -> usize {
        self.lock().jobs.len()
    }

    /// Whether no jobs are pending.
    pub fn is_empty(&self) -> bool {
        self.lock().jobs.is_empty()
    }

    /// Whether the queue has been stopped.
    pub fn is_stopping(&self) -> bool {
        self.lock().stopping
    }

    /// Mark the queue as stopping and wake every waiter.
    pub fn stop(&self) {
        {
            let mut inner = self.lock();
            inner.stopping = true;
        }
        self.notify.notify_waiters();
    }

    /// Wake every waiter without stopping the queue.
    ///
    /// Waiters re-check the queue and resume waiting if nothing changed;
    /// workers use this to re-read their wake interval.
    pub fn stop_waiting(&self) {
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use weft_core::ErrorKind;

    fn noop(name: &str) -> Job {
        Job::callback(name.to_owned(), || Ok(()))
    }

    #[test]
    fn test_size_and_empty_agree() {
        let queue = JobQueue::unbounded("test");
        assert_eq!(queue.len(), 0);
        assert!(queue.is_empty());

        queue.enqueue(noop("a")).unwrap();
        queue.enqueue(noop("b")).unwrap();
        assert_eq!(queue.len(), 2);
        assert!(!queue.is_empty());

        queue.clear();
        assert_eq!(queue.len(), 0);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_fifo_order_in_batch_dequeue() {
        let queue = JobQueue::unbounded("test");
        queue
            .enqueue_batch(vec![noop("first"), noop("second"), noop("third")])
            .unwrap();

        let drained = queue.dequeue_batch();
        let names: Vec<&str> = drained.iter().map(Job::name).collect();
        assert_eq!(names, vec!["first", "second", "third"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_enqueue_on_stopped_queue_fails() {
        let queue = JobQueue::unbounded("test");
        queue.stop();

        let err = queue.enqueue(noop("late")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::QueueStopped);
    }

    #[test]
    fn test_bounded_capacity() {
        let queue = JobQueue::bounded("small", 2);
        queue.enqueue(noop("a")).unwrap();
        queue.enqueue(noop("b")).unwrap();

        let err = queue.enqueue(noop("c")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::QueueFull);

        let err = queue.enqueue_batch(vec![noop("d")]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::QueueFull);
    }

    #[tokio::test]
    async fn test_dequeue_waits_for_job() {
        let queue = Arc::new(JobQueue::unbounded("test"));

        let waiter = Arc::clone(&queue);
        let handle = tokio::spawn(async move { waiter.dequeue().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.enqueue(noop("delivered")).unwrap();

        let job = handle.await.unwrap().unwrap();
        assert_eq!(job.name(), "delivered");
    }

    #[tokio::test]
    async fn test_stop_wakes_waiters_with_queue_stopped() {
        let queue = Arc::new(JobQueue::unbounded("test"));

        let waiter = Arc::clone(&queue);
        let handle = tokio::spawn(async move { waiter.dequeue().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.stop();

        let err = handle.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::QueueStopped);
    }

    #[tokio::test]
    async fn test_stopping_queue_still_drains() {
        let queue = JobQueue::unbounded("test");
        queue.enqueue(noop("pending")).unwrap();
        queue.stop();

        let job = queue.dequeue().await.unwrap();
        assert_eq!(job.name(), "pending");

        let err = queue.dequeue().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::QueueStopped);
    }
}
