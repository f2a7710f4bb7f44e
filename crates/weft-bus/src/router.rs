//! Topic router resolving subscriptions and enqueuing dispatch jobs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::TRACING_TARGET_ROUTER;
use crate::container::MessagingContainer;
use crate::pattern::Pattern;
use crate::trace::ScopedTrace;
use weft_core::{Error, Result};
use weft_pool::{Executor, Job, TaskHandle};

/// Callback invoked for each message a subscription receives.
pub type SubscriberCallback = Arc<dyn Fn(&MessagingContainer) -> Result<()> + Send + Sync>;

/// Predicate narrowing which matched messages a subscription receives.
pub type SubscriberFilter = Arc<dyn Fn(&MessagingContainer) -> bool + Send + Sync>;

/// Highest subscription priority.
pub const MAX_PRIORITY: u8 = 10;
/// Priority assigned when none is given.
pub const DEFAULT_PRIORITY: u8 = 5;

/// A registered subscription.
///
/// In-flight dispatch jobs hold a shared reference, so unsubscribing while
/// a dispatch is running is safe; the subscription is destroyed after the
/// last in-flight job completes.
pub struct Subscription {
    id: u64,
    pattern: Pattern,
    callback: SubscriberCallback,
    filter: Option<SubscriberFilter>,
    priority: u8,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    fn accepts(&self, msg: &MessagingContainer) -> bool {
        self.pattern.matches(msg.topic())
            && self.filter.as_ref().is_none_or(|filter| filter(msg))
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("pattern", &self.pattern.as_str())
            .field("priority", &self.priority)
            .finish()
    }
}

/// Routes messages to matching subscriptions.
///
/// Subscribe and unsubscribe take the write lock; `route` takes only the
/// read lock and never executes callbacks on the calling thread: each
/// surviving subscription becomes a dispatch job on the router's executor.
/// The routed/dispatched counters are approximate by design.
pub struct TopicRouter {
    subscriptions: RwLock<HashMap<u64, Arc<Subscription>>>,
    executor: Arc<dyn Executor>,
    next_id: AtomicU64,
    routed: AtomicU64,
    dispatched: AtomicU64,
}

impl std::fmt::Debug for TopicRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicRouter")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl TopicRouter {
    /// Create a router dispatching on `executor`.
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            executor,
            next_id: AtomicU64::new(1),
            routed: AtomicU64::new(0),
            dispatched: AtomicU64::new(0),
        }
    }

    /// Register a callback for `pattern` with the default priority.
    pub fn subscribe(
        &self,
        pattern: &str,
        callback: impl Fn(&MessagingContainer) -> Result<()> + Send + Sync + 'static,
    ) -> Result<u64> {
        self.subscribe_with(pattern, callback, None, DEFAULT_PRIORITY)
    }

    /// Register a callback with an optional filter and explicit priority.
    pub fn subscribe_with(
        &self,
        pattern: &str,
        callback: impl Fn(&MessagingContainer) -> Result<()> + Send + Sync + 'static,
        filter: Option<SubscriberFilter>,
        priority: u8,
    ) -> Result<u64> {
        if priority > MAX_PRIORITY {
            return Err(Error::invalid_argument(format!(
                "priority {priority} exceeds maximum {MAX_PRIORITY}"
            )));
        }
        let pattern = Pattern::compile(pattern)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let subscription = Arc::new(Subscription {
            id,
            pattern,
            callback: Arc::new(callback),
            filter,
            priority,
        });

        self.subscriptions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id, Arc::clone(&subscription));

        debug!(
            target: TRACING_TARGET_ROUTER,
            subscription = id,
            pattern = %subscription.pattern,
            priority = priority,
            "subscription registered"
        );
        Ok(id)
    }

    /// Remove a subscription by id.
    pub fn unsubscribe(&self, id: u64) -> Result<()> {
        let removed = self
            .subscriptions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&id);

        match removed {
            Some(subscription) => {
                debug!(
                    target: TRACING_TARGET_ROUTER,
                    subscription = id,
                    pattern = %subscription.pattern,
                    "subscription removed"
                );
                Ok(())
            }
            None => Err(Error::invalid_argument(format!(
                "no subscription with id {id}"
            ))),
        }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscriptions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Number of dispatch jobs waiting on the executor.
    pub fn pending_dispatches(&self) -> usize {
        self.executor.pending_tasks()
    }

    /// Approximate number of messages routed so far.
    pub fn routed_count(&self) -> u64 {
        self.routed.load(Ordering::Relaxed)
    }

    /// Approximate number of dispatch jobs enqueued so far.
    pub fn dispatched_count(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    /// Resolve subscriptions for `msg` and enqueue one dispatch job each.
    ///
    /// Matches are filtered, then ordered by priority (highest first) with
    /// ties broken by lowest id, and enqueued in that order. Zero matches is
    /// success with no dispatches. The returned handles resolve when the
    /// callbacks complete.
    pub fn route(&self, msg: &MessagingContainer) -> Result<Vec<TaskHandle>> {
        self.routed.fetch_add(1, Ordering::Relaxed);

        let mut matched: Vec<Arc<Subscription>> = {
            let subscriptions = self
                .subscriptions
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            subscriptions
                .values()
                .filter(|subscription| subscription.pattern.matches(msg.topic()))
                .map(Arc::clone)
                .collect()
        };

        // Filters run outside the subscription lock.
        matched.retain(|subscription| subscription.accepts(msg));
        matched.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut handles = Vec::with_capacity(matched.len());
        for subscription in matched {
            let msg = msg.clone();
            let callback = Arc::clone(&subscription.callback);
            let job = Job::callback(format!("dispatch:{}", msg.topic()), move || {
                let _trace = ScopedTrace::new(msg.trace_id());
                callback(&msg)
            });
            handles.push(self.executor.execute(job)?);
            self.dispatched.fetch_add(1, Ordering::Relaxed);
        }

        Ok(handles)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use weft_pool::WorkerPool;

    fn message(topic: &str) -> MessagingContainer {
        MessagingContainer::create("test-src", "test-tgt", topic).unwrap()
    }

    async fn single_worker_executor() -> Arc<WorkerPool> {
        let pool = Arc::new(WorkerPool::with_workers("router-test", 1_024, 1));
        pool.start().unwrap();
        pool
    }

    async fn route_and_wait(router: &TopicRouter, topic: &str) {
        for handle in router.route(&message(topic)).unwrap() {
            let _ = handle.wait().await;
        }
    }

    #[tokio::test]
    async fn test_wildcard_match_counts() {
        let executor = single_worker_executor().await;
        let router = TopicRouter::new(executor.clone());

        let hash_hits = Arc::new(AtomicUsize::new(0));
        let star_hits = Arc::new(AtomicUsize::new(0));
        let literal_hits = Arc::new(AtomicUsize::new(0));

        {
            let hits = Arc::clone(&hash_hits);
            router
                .subscribe("event.#", move |_| {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .unwrap();
        }
        {
            let hits = Arc::clone(&star_hits);
            router
                .subscribe("event.user.*", move |_| {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .unwrap();
        }
        {
            let hits = Arc::clone(&literal_hits);
            router
                .subscribe("event.user.login", move |_| {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .unwrap();
        }

        for topic in [
            "event.user.login",
            "event.user.logout",
            "event.order.placed",
            "event.system.startup.complete",
        ] {
            route_and_wait(&router, topic).await;
        }

        assert_eq!(hash_hits.load(Ordering::SeqCst), 4);
        assert_eq!(star_hits.load(Ordering::SeqCst), 2);
        assert_eq!(literal_hits.load(Ordering::SeqCst), 1);

        executor.stop(true).await.unwrap();
    }

    #[tokio::test]
    async fn test_priority_orders_dispatch() {
        let executor = single_worker_executor().await;
        let router = TopicRouter::new(executor.clone());

        let order = Arc::new(Mutex::new(Vec::new()));
        {
            let order = Arc::clone(&order);
            router
                .subscribe_with(
                    "t",
                    move |_| {
                        order.lock().unwrap().push("low");
                        Ok(())
                    },
                    None,
                    2,
                )
                .unwrap();
        }
        {
            let order = Arc::clone(&order);
            router
                .subscribe_with(
                    "t",
                    move |_| {
                        order.lock().unwrap().push("high");
                        Ok(())
                    },
                    None,
                    8,
                )
                .unwrap();
        }

        route_and_wait(&router, "t").await;

        assert_eq!(order.lock().unwrap().as_slice(), ["high", "low"]);
        executor.stop(true).await.unwrap();
    }

    #[tokio::test]
    async fn test_filter_narrows_matches() {
        let executor = single_worker_executor().await;
        let router = TopicRouter::new(executor.clone());

        let hits = Arc::new(AtomicUsize::new(0));
        let observed = Arc::clone(&hits);
        let filter: SubscriberFilter = Arc::new(|msg| msg.source() == "allowed");
        router
            .subscribe_with(
                "filtered.topic",
                move |_| {
                    observed.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
                Some(filter),
                DEFAULT_PRIORITY,
            )
            .unwrap();

        let rejected = MessagingContainer::create("blocked", "tgt", "filtered.topic").unwrap();
        let accepted = MessagingContainer::create("allowed", "tgt", "filtered.topic").unwrap();

        for handle in router.route(&rejected).unwrap() {
            let _ = handle.wait().await;
        }
        for handle in router.route(&accepted).unwrap() {
            let _ = handle.wait().await;
        }

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        executor.stop(true).await.unwrap();
    }

    #[tokio::test]
    async fn test_zero_matches_is_success() {
        let executor = single_worker_executor().await;
        let router = TopicRouter::new(executor.clone());

        let handles = router.route(&message("nobody.listens")).unwrap();
        assert!(handles.is_empty());

        executor.stop(true).await.unwrap();
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let executor = single_worker_executor().await;
        let router = TopicRouter::new(executor.clone());

        let hits = Arc::new(AtomicUsize::new(0));
        let observed = Arc::clone(&hits);
        let id = router
            .subscribe("gone.soon", move |_| {
                observed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        route_and_wait(&router, "gone.soon").await;
        router.unsubscribe(id).unwrap();
        route_and_wait(&router, "gone.soon").await;

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(router.unsubscribe(id).is_err());

        executor.stop(true).await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_pattern_and_priority_are_rejected() {
        let executor = single_worker_executor().await;
        let router = TopicRouter::new(executor.clone());

        assert!(router.subscribe("bad..pattern", |_| Ok(())).is_err());
        assert!(
            router
                .subscribe_with("fine.topic", |_| Ok(()), None, MAX_PRIORITY + 1)
                .is_err()
        );

        executor.stop(true).await.unwrap();
    }
}
