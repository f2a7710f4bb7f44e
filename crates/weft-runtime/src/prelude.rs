//! Commonly used items from weft-runtime.

pub use crate::runtime::{Runtime, ScalingHint};
pub use crate::tracing_setup::initialize_tracing;
pub use weft_bus::prelude::*;
pub use weft_core::{FabricConfig, Result};
pub use weft_monitor::prelude::*;
pub use weft_pool::prelude::*;
