#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

// Tracing target constants for consistent logging
pub const TRACING_TARGET_CONTAINER: &str = "weft_bus::container";
pub const TRACING_TARGET_ROUTER: &str = "weft_bus::router";
pub const TRACING_TARGET_BUS: &str = "weft_bus::bus";
pub const TRACING_TARGET_POLICY: &str = "weft_bus::policy";

pub mod bus;
pub mod container;
pub mod pattern;
pub mod policy;
pub mod router;
pub mod trace;

#[doc(hidden)]
pub mod prelude;

// Re-export key types
pub use bus::MessageBus;
pub use container::{ContainerBuilder, MessagingContainer, TypedValue};
pub use pattern::Pattern;
pub use policy::{
    BreakerState, CircuitBreaker, CircuitBreakerConfig, InstanceHealth, LoadBalancer,
    ServiceInstance, Strategy,
};
pub use router::{Subscription, TopicRouter};
pub use trace::{ScopedTrace, TraceContext};
pub use weft_core::{Error, Result};
