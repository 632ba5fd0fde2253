//! Tracing subscriber setup.

use crate::config::LoggingConfig;
use crate::error::{CoreError, Result};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `level`. Events go to stderr; with `json`
/// set, as one JSON object per line.
///
/// # Errors
///
/// Returns `CoreError::Logging` if the filter is invalid or a global
/// subscriber is already installed.
pub fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directives(level))
            .map_err(|e| CoreError::Logging(format!("invalid log level '{level}': {e}")))?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true).with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
    };

    installed.map_err(|e| CoreError::Logging(e.to_string()))
}

/// Installs the subscriber described by a `[logging]` section.
///
/// # Errors
///
/// See [`init_logging`].
pub fn init_from_config(config: &LoggingConfig) -> Result<()> {
    init_logging(&config.level, config.json)
}

fn default_directives(level: &str) -> String {
    format!("conductor={level},conductor_core={level},conductor_orchestrator={level},warn")
}
