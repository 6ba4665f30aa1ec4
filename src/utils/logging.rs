//! Structured logging setup.
//!
//! Installs a `tracing-subscriber` formatter built from [`LoggingConfig`].
//! `RUST_LOG` overrides the configured level when set.

use crate::config::LoggingConfig;
use crate::error::{ProtocolError, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber.
///
/// Calling this again after a subscriber is installed is a no-op that
/// returns `Ok(false)`.
pub fn init_logging(config: &LoggingConfig) -> Result<bool> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(config.log_level.as_str().to_lowercase())
            .map_err(|e| ProtocolError::ConfigError(format!("Invalid log filter: {e}")))?,
    };

    let builder = fmt().with_env_filter(filter).with_target(true);
    let installed = if config.json_format {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    };

    if installed {
        tracing::info!(app = %config.app_name, "Logging initialized");
    }
    Ok(installed)
}
