//! Commonly used items from weft-pool.
//!
//! This prelude module re-exports the types needed to build and drive
//! pools, making it easy to import everything with a single `use`.

pub use crate::cancel::CancelToken;
pub use crate::executor::{Executor, ExecutorExt, TaskFn, TaskHandle};
pub use crate::job::Job;
pub use crate::metrics::{PoolMetricsSnapshot, WorkerMetricsSnapshot};
pub use crate::pool::WorkerPool;
pub use crate::queue::JobQueue;
pub use crate::typed::{JobKind, TypedPool};
pub use crate::worker::{Worker, WorkerState};
pub use weft_core::{Error, ErrorKind, Result};
