//! Cooperative cancellation with callback fan-out.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::Notify;
use tracing::warn;

use crate::TRACING_TARGET_CANCEL;
use weft_core::{Error, Result};

type Callback = Box<dyn FnOnce() + Send + 'static>;

struct TokenState {
    cancelled: AtomicBool,
    callbacks: Mutex<Vec<Callback>>,
    notify: Notify,
    panic_logged: AtomicBool,
}

impl TokenState {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            cancelled: AtomicBool::new(false),
            callbacks: Mutex::new(Vec::new()),
            notify: Notify::new(),
            panic_logged: AtomicBool::new(false),
        })
    }

    /// Flip the flag and drain callbacks under the lock, then invoke the
    /// drained callbacks outside the lock.
    fn cancel(self: &Arc<Self>) {
        let drained = {
            let mut callbacks = self
                .callbacks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if self.cancelled.swap(true, Ordering::AcqRel) {
                return;
            }
            std::mem::take(&mut *callbacks)
        };

        self.notify.notify_waiters();
        for callback in drained {
            self.invoke(callback);
        }
    }

    fn invoke(self: &Arc<Self>, callback: Callback) {
        if catch_unwind(AssertUnwindSafe(callback)).is_err()
            && !self.panic_logged.swap(true, Ordering::AcqRel)
        {
            warn!(
                target: TRACING_TARGET_CANCEL,
                "cancellation callback panicked; further panics on this token are suppressed"
            );
        }
    }
}

/// A cooperative cancellation token.
///
/// Cloning shares the underlying state. Once cancelled a token stays
/// cancelled, and every registered callback fires exactly once: either at
/// cancel time or immediately on registration when the token is already
/// cancelled. No operation on a token fails; callback panics are caught and
/// logged at most once per token.
#[derive(Clone)]
pub struct CancelToken {
    state: Arc<TokenState>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl CancelToken {
    /// Create a new, uncancelled token.
    pub fn new() -> Self {
        Self {
            state: TokenState::new(),
        }
    }

    /// Create a token that is cancelled when any of the parents is cancelled.
    ///
    /// Each parent holds only a weak reference to the child state, so a
    /// dropped child never keeps a cycle alive and a cancelled parent with
    /// no surviving children is a no-op.
    pub fn linked(parents: &[CancelToken]) -> Self {
        let child = Self::new();
        let weak = Arc::downgrade(&child.state);

        for parent in parents {
            let weak: Weak<TokenState> = weak.clone();
            parent.on_cancel(move || {
                if let Some(state) = weak.upgrade() {
                    state.cancel();
                }
            });
        }

        child
    }

    /// Cancel the token. Idempotent.
    pub fn cancel(&self) {
        self.state.cancel();
    }

    /// Whether the token has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    /// Register a callback invoked when the token is cancelled.
    ///
    /// If the token is already cancelled the callback runs immediately,
    /// outside any token lock.
    pub fn on_cancel(&self, callback: impl FnOnce() + Send + 'static) {
        let callback: Callback = Box::new(callback);
        {
            let mut callbacks = self
                .state
                .callbacks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if !self.state.cancelled.load(Ordering::Acquire) {
                callbacks.push(callback);
                return;
            }
        }
        self.state.invoke(callback);
    }

    /// Returns an error of kind `Cancelled` if the token has been cancelled.
    pub fn ensure_active(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::cancelled("operation cancelled"))
        } else {
            Ok(())
        }
    }

    /// Wait until the token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.state.notify.notified();
            tokio::pin!(notified);
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}
