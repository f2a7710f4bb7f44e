#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

pub mod config;
pub mod error;
pub mod sink;

#[doc(hidden)]
pub mod prelude;

pub use config::{
    DatabaseConfig, DatabasePoolConfig, FabricConfig, LoggingConfig, MonitoringConfig,
    NetworkConfig, ThreadPoolConfig,
};
pub use error::{Error, ErrorCategory, ErrorKind, Result};
pub use sink::{LogLevel, Sink, TracingSink};
