use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid log filter `{filter}`: {message}")]
    InvalidFilter { filter: String, message: String },
    #[error("a global tracing subscriber is already installed")]
    AlreadyInitialized,
}

/// Installs the global fmt subscriber. `RUST_LOG` wins over the configured
/// level when it is set.
pub fn init_logging(config: &LoggingConfig) -> Result<(), TelemetryError> {
    let filter = build_filter(config)?;

    let installed = match config.format {
        LogFormat::Compact => tracing_subscriber::fmt()
            .with_target(false)
            .with_env_filter(filter)
            .compact()
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_target(false)
            .with_env_filter(filter)
            .pretty()
            .try_init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .with_target(false)
            .with_env_filter(filter)
            .json()
            .try_init(),
    };

    installed.map_err(|_| TelemetryError::AlreadyInitialized)
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter, TelemetryError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let directive = config.level.trim().to_ascii_lowercase();
    EnvFilter::try_new(&directive)
        .map_err(|error| TelemetryError::InvalidFilter { filter: directive, message: error.to_string() })
}

#[cfg(test)]
mod tests {
    use super::{build_filter, init_logging, TelemetryError};
    use crate::config::{LogFormat, LoggingConfig};

    #[test]
    fn second_initialization_is_an_error_not_a_panic() {
        let config = LoggingConfig { level: "debug".to_string(), format: LogFormat::Compact };
        let _ = init_logging(&config);
        assert!(matches!(init_logging(&config), Err(TelemetryError::AlreadyInitialized)));
    }

    #[test]
    fn configured_level_builds_a_filter() {
        let config = LoggingConfig { level: "warn".to_string(), format: LogFormat::Json };
        assert!(build_filter(&config).is_ok());
    }
}
