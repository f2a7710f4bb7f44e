//! Commonly used items from weft-core.
//!
//! This prelude module exports the most commonly used types to simplify
//! imports in consuming code.

pub use crate::config::FabricConfig;
pub use crate::error::{Error, ErrorCategory, ErrorKind, Result};
pub use crate::sink::{LogLevel, Sink, TracingSink};
