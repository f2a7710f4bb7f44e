//! Delayed-job lane shared by the pool implementations.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::time::DelayQueue;
use tracing::warn;

use crate::TRACING_TARGET_POOL;
use crate::job::Job;
use crate::queue::JobQueue;
use weft_core::{Error, Result};

/// Timer lane feeding delayed jobs back into a pool's own queue.
///
/// Delayed work shares the pool's workers; the lane never detaches
/// free-running tasks.
pub(crate) struct TimerLane {
    tx: mpsc::UnboundedSender<(Job, Duration)>,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl TimerLane {
    pub(crate) fn spawn(pool_name: &str, queue: Arc<JobQueue>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<(Job, Duration)>();
        let shutdown = CancellationToken::new();
        let lane_shutdown = shutdown.clone();
        let pool_name = pool_name.to_owned();

        let handle = tokio::spawn(async move {
            let mut delayed: DelayQueue<Job> = DelayQueue::new();
            loop {
                tokio::select! {
                    biased;
                    _ = lane_shutdown.cancelled() => break,
                    entry = rx.recv() => match entry {
                        Some((job, delay)) => {
                            delayed.insert(job, delay);
                        }
                        None => break,
                    },
                    Some(expired) = delayed.next(), if !delayed.is_empty() => {
                        let job = expired.into_inner();
                        if let Err(error) = queue.enqueue(job) {
                            warn!(
                                target: TRACING_TARGET_POOL,
                                pool = %pool_name,
                                error = %error,
                                "dropping delayed job; queue rejected it"
                            );
                        }
                    }
                }
            }
        });

        Self {
            tx,
            shutdown,
            handle,
        }
    }

    pub(crate) fn schedule(&self, job: Job, delay: Duration, pool_name: &str) -> Result<()> {
        self.tx.send((job, delay)).map_err(|_| {
            Error::queue_stopped(format!("pool '{pool_name}' timer lane is stopped"))
        })
    }

    pub(crate) async fn stop(self) {
        self.shutdown.cancel();
        drop(self.tx);
        let _ = self.handle.await;
    }
}
