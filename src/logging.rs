//! Diagnostic logging setup.

use crate::config::{LogFormat, LoggingConfig};
use crate::error::{AppError, AppResult};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

/// Build the filter: `RUST_LOG` wins over the configured level.
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

/// Install the global subscriber. Diagnostics go to stderr unless a log
/// file is configured, keeping stdout for the run summary.
pub fn init(config: &LoggingConfig) -> AppResult<()> {
    let filter = env_filter(config);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let result = match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| AppError::Logging(format!("{}: {}", path.display(), e)))?;
            let builder = builder.with_writer(Mutex::new(file)).with_ansi(false);
            match config.format {
                LogFormat::Json => builder.json().try_init(),
                LogFormat::Pretty => builder.pretty().try_init(),
                LogFormat::Compact => builder.compact().try_init(),
            }
        }
        None => {
            let builder = builder.with_writer(std::io::stderr);
            match config.format {
                LogFormat::Json => builder.json().try_init(),
                LogFormat::Pretty => builder.pretty().try_init(),
                LogFormat::Compact => builder.compact().try_init(),
            }
        }
    };

    result.map_err(|e| AppError::Logging(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_env_filter_uses_configured_level() {
        std::env::remove_var("RUST_LOG");
        let config = LoggingConfig {
            level: "debug".to_string(),
            ..LoggingConfig::default()
        };
        assert_eq!(env_filter(&config).to_string(), "debug");
    }
}
