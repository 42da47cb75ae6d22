use crate::config::ConfigError;
use crate::report::ReportError;
use std::path::PathBuf;
use thiserror::Error;

/// A specialized `Result` type for the application layer.
pub type AppResult<T> = Result<T, AppError>;

/// Unified application error type.
///
/// Covers what can stop the monitor before or after a run. Failures during
/// the run itself are part of the run outcome, not errors.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid reboot marker: {0}")]
    RebootMarker(#[from] regex::Error),

    #[error("Could not open the console log '{path}': {source}")]
    ConsoleLog {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not reach '{0}' as a serial port, telnet port or program")]
    NoTransport(String),

    #[error(transparent)]
    Report(#[from] ReportError),

    #[error("Failed to initialise logging: {0}")]
    Logging(String),

    #[error("An I/O error occurred: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_transport_message() {
        let err = AppError::NoTransport("COM7".to_string());
        assert_eq!(
            err.to_string(),
            "Could not reach 'COM7' as a serial port, telnet port or program"
        );
    }

    #[test]
    fn test_config_error_converts() {
        let err: AppError = ConfigError::validation("run.banner_timeout_ms", "must be non-zero").into();
        assert!(matches!(err, AppError::Config(_)));
    }
}
