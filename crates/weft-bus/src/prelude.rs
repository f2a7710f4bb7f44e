//! Commonly used items from weft-bus.
//!
//! This prelude module re-exports the types needed to publish, subscribe,
//! and route messages, making it easy to import everything with a single
//! `use` statement.

pub use crate::bus::MessageBus;
pub use crate::container::{ContainerBuilder, MessagingContainer, TypedValue};
pub use crate::pattern::Pattern;
pub use crate::policy::{
    BreakerState, CircuitBreaker, CircuitBreakerConfig, InstanceHealth, LoadBalancer,
    ServiceInstance, Strategy,
};
pub use crate::router::{SubscriberCallback, SubscriberFilter, Subscription, TopicRouter};
pub use crate::trace::{ScopedTrace, TraceContext};
pub use weft_core::{Error, ErrorKind, Result};
