//! Logging setup and configuration

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::LoggingSettings;

/// Setup tracing subscriber from the `[logging]` config section
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn setup_logging(settings: &LoggingSettings) -> crate::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.level))
        .map_err(|e| crate::Error::Config(format!("Invalid log filter: {}", e)))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_ansi(settings.ansi)
                .with_target(settings.show_target),
        )
        .try_init()
        .map_err(|e| crate::Error::Logging(e.to_string()))
}
