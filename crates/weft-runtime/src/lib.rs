#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

// Tracing target constants for consistent logging
pub const TRACING_TARGET_RUNTIME: &str = "weft_runtime::runtime";

mod runtime;
mod tracing_setup;

#[doc(hidden)]
pub mod prelude;

pub use runtime::{Runtime, ScalingHint};
pub use tracing_setup::initialize_tracing;
pub use weft_core::{Error, FabricConfig, Result};
