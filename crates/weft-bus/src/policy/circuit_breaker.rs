//! Circuit breaker gating calls to an unreliable downstream.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::TRACING_TARGET_POLICY;

/// Breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum BreakerState {
    /// Normal operation.
    Closed,
    /// Failures exceeded the threshold; calls are refused.
    Open,
    /// Probing whether the downstream recovered.
    HalfOpen,
}

/// Thresholds and timing for a [`CircuitBreaker`].
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the breaker open.
    pub failure_threshold: u32,
    /// Successes in half-open required to close again.
    pub success_threshold: u32,
    /// How long the breaker stays open before probing.
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            timeout: Duration::from_secs(30),
        }
    }
}

struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
}

/// Failure-rate gate protecting downstream calls.
///
/// `can_attempt` is the single gate; `record_success` and `record_failure`
/// drive the transitions. All transitions are serialized by one mutex.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("state", &self.state())
            .finish()
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure: None,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether a call may be attempted right now.
    ///
    /// An open breaker lazily transitions to half-open once the timeout has
    /// elapsed since the last failure.
    pub fn can_attempt(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|at| at.elapsed())
                    .unwrap_or_default();
                if elapsed > self.config.timeout {
                    inner.state = BreakerState::HalfOpen;
                    debug!(
                        target: TRACING_TARGET_POLICY,
                        "circuit breaker half-open after timeout"
                    );
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    inner.state = BreakerState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    debug!(target: TRACING_TARGET_POLICY, "circuit breaker closed");
                }
            }
            BreakerState::Closed => {
                inner.failure_count = 0;
            }
            BreakerState::Open => {}
        }
    }

    /// Record a failed call.
    ///
    /// Any failure in half-open reopens the breaker regardless of prior
    /// successes.
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.failure_count += 1;
        inner.last_failure = Some(Instant::now());

        if inner.state == BreakerState::HalfOpen
            || inner.failure_count >= self.config.failure_threshold
        {
            inner.state = BreakerState::Open;
            inner.success_count = 0;
            debug!(
                target: TRACING_TARGET_POLICY,
                failures = inner.failure_count,
                "circuit breaker opened"
            );
        }
    }

    /// Current breaker state.
    pub fn state(&self) -> BreakerState {
        self.lock().state
    }
}
