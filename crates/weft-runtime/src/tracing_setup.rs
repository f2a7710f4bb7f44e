//! Observability and tracing configuration.

use tracing_subscriber::fmt::layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use weft_core::LoggingConfig;

fn build_env_filter(config: &LoggingConfig) -> tracing_subscriber::EnvFilter {
    let current = std::env::var("RUST_LOG").unwrap_or_else(|_| config.level.clone());
    tracing_subscriber::EnvFilter::new(current)
}

/// Initializes the tracing subscriber for the fabric.
///
/// Sets up structured logging with environment-based filtering and pretty
/// formatting. `RUST_LOG` overrides the configured level when present.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn initialize_tracing(config: &LoggingConfig) -> anyhow::Result<()> {
    let env_filter = build_env_filter(config);
    let fmt_layer = layer().pretty();
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to install tracing subscriber: {error}"))?;

    tracing::trace!(
        target: crate::TRACING_TARGET_RUNTIME,
        level = %config.level,
        "initialized tracing subscriber",
    );
    Ok(())
}
