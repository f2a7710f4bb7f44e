//! Scoped trace-id propagation across publish and dispatch boundaries.
//!
//! Subscriber callbacks are synchronous, so the current trace id lives in a
//! thread-local installed around each callback invocation. Downstream
//! publishes made from inside a callback pick up the same trace id.

use std::cell::RefCell;
use std::time::{SystemTime, UNIX_EPOCH};

thread_local! {
    static CURRENT_TRACE: RefCell<String> = const { RefCell::new(String::new()) };
}

/// Access to the calling thread's trace id.
pub struct TraceContext;

impl TraceContext {
    /// Install `id` as the current trace id.
    pub fn set(id: impl Into<String>) {
        let id = id.into();
        CURRENT_TRACE.with(|cell| *cell.borrow_mut() = id);
    }

    /// The current trace id, or an empty string when unset.
    pub fn current() -> String {
        CURRENT_TRACE.with(|cell| cell.borrow().clone())
    }

    /// Generate a fresh trace id: 12 hex digits of the current millisecond
    /// timestamp, a dash, and 8 random hex digits.
    pub fn generate() -> String {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis())
            .unwrap_or_default();
        let random: u32 = rand::random();
        format!("{:012x}-{random:08x}", millis & 0xffff_ffff_ffff)
    }

    /// Clear the current trace id.
    pub fn clear() {
        CURRENT_TRACE.with(|cell| cell.borrow_mut().clear());
    }
}

/// RAII guard installing a trace id for the current scope.
///
/// The previous id is restored on drop, or cleared when there was none.
pub struct ScopedTrace {
    previous: String,
}

impl ScopedTrace {
    /// Install `id`, remembering whatever was current before.
    pub fn new(id: impl Into<String>) -> Self {
        let previous = TraceContext::current();
        TraceContext::set(id);
        Self { previous }
    }
}

impl Drop for ScopedTrace {
    fn drop(&mut self) {
        if self.previous.is_empty() {
            TraceContext::clear();
        } else {
            TraceContext::set(std::mem::take(&mut self.previous));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_trace_is_empty() {
        TraceContext::clear();
        assert_eq!(TraceContext::current(), "");
    }

    #[test]
    fn test_set_and_clear() {
        TraceContext::set("trace-1");
        assert_eq!(TraceContext::current(), "trace-1");
        TraceContext::clear();
        assert_eq!(TraceContext::current(), "");
    }

    #[test]
    fn test_generated_id_shape() {
        let id = TraceContext::generate();
        let (timestamp, random) = id.split_once('-').expect("dash separator");
        assert_eq!(timestamp.len(), 12);
        assert_eq!(random.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() || c == '-'));
    }

    #[test]
    fn test_scoped_trace_restores_previous() {
        TraceContext::set("outer");
        {
            let _scope = ScopedTrace::new("inner");
            assert_eq!(TraceContext::current(), "inner");
        }
        assert_eq!(TraceContext::current(), "outer");
        TraceContext::clear();
    }

    #[test]
    fn test_scoped_trace_clears_when_no_previous() {
        TraceContext::clear();
        {
            let _scope = ScopedTrace::new("only");
            assert_eq!(TraceContext::current(), "only");
        }
        assert_eq!(TraceContext::current(), "");
    }

    #[test]
    fn test_nested_scopes() {
        TraceContext::clear();
        let _outer = ScopedTrace::new("a");
        {
            let _inner = ScopedTrace::new("b");
            assert_eq!(TraceContext::current(), "b");
        }
        assert_eq!(TraceContext::current(), "a");
    }
}
