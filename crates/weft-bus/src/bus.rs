//! Publish/subscribe bus composing executors and a router.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::join_all;
use tracing::{debug, warn};

use crate::TRACING_TARGET_BUS;
use crate::container::MessagingContainer;
use crate::router::{SubscriberFilter, TopicRouter};
use weft_core::{Error, Result};
use weft_pool::{Executor, ExecutorExt};

/// The publish/subscribe entry point of the fabric.
///
/// Routing work runs on the I/O executor, subscriber callbacks on the
/// worker executor behind the router. Executors are injected so tests can
/// pass stubs and hosts can share pools between collaborators.
pub struct MessageBus {
    io_executor: Arc<dyn Executor>,
    work_executor: Arc<dyn Executor>,
    router: Arc<TopicRouter>,
    running: AtomicBool,
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("running", &self.is_running())
            .field("subscribers", &self.router.subscriber_count())
            .finish()
    }
}

impl MessageBus {
    /// Create a bus over the given executors.
    ///
    /// The router dispatches subscriber callbacks on `work_executor`;
    /// `publish_async` routing jobs run on `io_executor`.
    pub fn new(io_executor: Arc<dyn Executor>, work_executor: Arc<dyn Executor>) -> Self {
        let router = Arc::new(TopicRouter::new(Arc::clone(&work_executor)));
        Self {
            io_executor,
            work_executor,
            router,
            running: AtomicBool::new(false),
        }
    }

    /// The router backing this bus.
    pub fn router(&self) -> &Arc<TopicRouter> {
        &self.router
    }

    /// Whether the bus accepts publishes and subscriptions.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Mark the bus running.
    pub fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(Error::already_running("bus is already running"));
        }
        debug!(target: TRACING_TARGET_BUS, "bus started");
        Ok(())
    }

    /// Stop the bus: drain pending dispatches, then tear down executors.
    pub async fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::AcqRel) {
            return Err(Error::not_running("bus is not running"));
        }

        self.io_executor.shutdown(true).await?;
        self.work_executor.shutdown(true).await?;
        debug!(target: TRACING_TARGET_BUS, "bus stopped");
        Ok(())
    }

    /// Publish `msg` and wait for every matched callback to complete.
    ///
    /// Routing happens on the caller's task. The first callback error is
    /// returned; remaining errors are logged.
    pub async fn publish_sync(&self, msg: MessagingContainer) -> Result<()> {
        if !self.is_running() {
            return Err(Error::queue_stopped("bus is stopped"));
        }

        let handles = self.router.route(&msg)?;
        let results = join_all(handles.into_iter().map(|handle| handle.wait())).await;

        let mut first_error = None;
        for result in results {
            if let Err(error) = result {
                if first_error.is_none() {
                    first_error = Some(error);
                } else {
                    warn!(
                        target: TRACING_TARGET_BUS,
                        topic = %msg.topic(),
                        error = %error,
                        "additional subscriber error"
                    );
                }
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Publish `msg` without waiting for delivery.
    ///
    /// The routing work is enqueued on the I/O executor; this only fails
    /// when that enqueue fails. Callback errors are logged, never returned.
    pub fn publish_async(&self, msg: MessagingContainer) -> Result<()> {
        if !self.is_running() {
            return Err(Error::queue_stopped("bus is stopped"));
        }

        let router = Arc::clone(&self.router);
        let topic = msg.topic().to_owned();
        self.io_executor
            .spawn_named(&format!("route:{topic}"), move || {
                match router.route(&msg) {
                    // Dispatch jobs run to completion on the worker
                    // executor; their handles are not awaited here.
                    Ok(_handles) => Ok(()),
                    Err(error) => {
                        warn!(
                            target: TRACING_TARGET_BUS,
                            topic = %msg.topic(),
                            error = %error,
                            "async routing failed"
                        );
                        Err(error)
                    }
                }
            })?;
        Ok(())
    }

    /// Subscribe a callback to `pattern` with the default priority.
    pub fn subscribe(
        &self,
        pattern: &str,
        callback: impl Fn(&MessagingContainer) -> Result<()> + Send + Sync + 'static,
    ) -> Result<u64> {
        if !self.is_running() {
            return Err(Error::not_running("bus is not running"));
        }
        self.router.subscribe(pattern, callback)
    }

    /// Subscribe with an optional filter and explicit priority.
    pub fn subscribe_with(
        &self,
        pattern: &str,
        callback: impl Fn(&MessagingContainer) -> Result<()> + Send + Sync + 'static,
        filter: Option<SubscriberFilter>,
        priority: u8,
    ) -> Result<u64> {
        if !self.is_running() {
            return Err(Error::not_running("bus is not running"));
        }
        self.router.subscribe_with(pattern, callback, filter, priority)
    }

    /// Remove a subscription.
    pub fn unsubscribe(&self, id: u64) -> Result<()> {
        self.router.unsubscribe(id)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use super::*;
    use crate::trace::TraceContext;
    use weft_core::ErrorKind;
    use weft_pool::WorkerPool;

    fn message(topic: &str) -> MessagingContainer {
        MessagingContainer::create("test-src", "test-tgt", topic).unwrap()
    }

    fn test_bus() -> MessageBus {
        let io = Arc::new(WorkerPool::with_workers("bus-io", 1_024, 1));
        let work = Arc::new(WorkerPool::with_workers("bus-work", 1_024, 1));
        io.start().unwrap();
        work.start().unwrap();
        MessageBus::new(io, work)
    }

    #[tokio::test]
    async fn test_publish_sync_delivers_to_subscribers() {
        let bus = test_bus();
        bus.start().unwrap();

        let hits = Arc::new(AtomicUsize::new(0));
        let observed = Arc::clone(&hits);
        bus.subscribe("greetings.#", move |_| {
            observed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

        bus.publish_sync(message("greetings.hello")).await.unwrap();
        bus.publish_sync(message("greetings.bye.forever"))
            .await
            .unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 2);
        bus.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_publish_async_returns_before_delivery() {
        let bus = test_bus();
        bus.start().unwrap();

        let hits = Arc::new(AtomicUsize::new(0));
        let observed = Arc::clone(&hits);
        bus.subscribe("deferred", move |_| {
            observed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

        bus.publish_async(message("deferred")).unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        bus.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_publish_sync_returns_first_callback_error() {
        let bus = test_bus();
        bus.start().unwrap();

        bus.subscribe_with(
            "failing",
            |_| Err(Error::job_execution_failed("subscriber a failed")),
            None,
            8,
        )
        .unwrap();
        let survived = Arc::new(AtomicUsize::new(0));
        let observed = Arc::clone(&survived);
        bus.subscribe_with(
            "failing",
            move |_| {
                observed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            None,
            2,
        )
        .unwrap();

        let err = bus.publish_sync(message("failing")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::JobExecutionFailed);
        // The failing subscriber must not poison the other one.
        assert_eq!(survived.load(Ordering::SeqCst), 1);

        bus.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_trace_propagates_into_callback() {
        let bus = test_bus();
        bus.start().unwrap();

        let observed_trace = Arc::new(std::sync::Mutex::new(String::new()));
        let sink = Arc::clone(&observed_trace);
        bus.subscribe("traced", move |_| {
            *sink.lock().unwrap() = TraceContext::current();
            Ok(())
        })
        .unwrap();

        TraceContext::set("T1");
        let msg = message("traced");
        assert_eq!(msg.trace_id(), "T1");
        TraceContext::clear();

        bus.publish_sync(msg).await.unwrap();
        assert_eq!(observed_trace.lock().unwrap().as_str(), "T1");

        bus.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stopped_bus_rejects_operations() {
        let bus = test_bus();

        let err = bus.publish_sync(message("t")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::QueueStopped);
        let err = bus.publish_async(message("t")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::QueueStopped);
        let err = bus.subscribe("t", |_| Ok(())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotRunning);
    }

    #[tokio::test]
    async fn test_publish_with_no_subscribers_succeeds() {
        let bus = test_bus();
        bus.start().unwrap();

        bus.publish_sync(message("void")).await.unwrap();

        bus.stop().await.unwrap();
    }
}
