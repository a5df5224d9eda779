//! Structured logging setup.

use crate::config::LoggingConfig;
use crate::error::{DiscoveryError, Result};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Install the global `tracing` subscriber described by `config`.
///
/// `RUST_LOG` directives override the configured level. Fails if a global subscriber
/// is already installed.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(config.log_level).into())
        .from_env_lossy();

    let layer = if config.json_format {
        fmt::layer().json().with_current_span(true).boxed()
    } else {
        fmt::layer().with_target(true).boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .map_err(|e| DiscoveryError::ConfigError(format!("Failed to initialize logging: {e}")))?;

    tracing::info!(app = %config.app_name, level = %config.log_level, "Logging initialized");
    Ok(())
}
