#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

// Tracing target constants for consistent logging
pub const TRACING_TARGET_CANCEL: &str = "weft_pool::cancel";
pub const TRACING_TARGET_QUEUE: &str = "weft_pool::queue";
pub const TRACING_TARGET_WORKER: &str = "weft_pool::worker";
pub const TRACING_TARGET_POOL: &str = "weft_pool::pool";
pub const TRACING_TARGET_TYPED: &str = "weft_pool::typed";

pub mod cancel;
pub mod executor;
pub mod job;
pub mod metrics;
pub mod pool;
pub mod queue;
mod timer;
pub mod typed;
pub mod worker;

#[doc(hidden)]
pub mod prelude;

// Re-export key types
pub use cancel::CancelToken;
pub use executor::{Executor, ExecutorExt, TaskFn, TaskHandle};
pub use job::Job;
pub use metrics::{PoolMetricsSnapshot, WorkerMetricsSnapshot};
pub use pool::WorkerPool;
pub use queue::JobQueue;
pub use typed::{JobKind, TypedPool};
pub use weft_core::{Error, Result};
pub use worker::{Worker, WorkerState};
