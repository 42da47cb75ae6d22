//! Configuration module for hil-monitor.
//!
//! This module provides TOML-based configuration with environment variable overrides.
//!
//! # Configuration Resolution
//!
//! Configuration is loaded from the following locations (in order of priority):
//!
//! 1. `HIL_MONITOR_CONFIG` environment variable (explicit path)
//! 2. `./hil-monitor.toml` (current directory)
//! 3. `~/.config/hil-monitor/config.toml` (XDG on Linux/macOS)
//! 4. `%APPDATA%\hil-monitor\config.toml` (Windows)
//! 5. Built-in defaults (no file required)
//!
//! # Environment Overrides
//!
//! Most values can be overridden via environment variables.
//! The pattern is: `HIL_MONITOR_<SECTION>_<KEY>`
//!
//! Examples:
//! - `HIL_MONITOR_SERIAL_BAUD_RATE=921600`
//! - `HIL_MONITOR_RUN_TIMEOUT_SECS=3600`
//! - `HIL_MONITOR_REPORT_FORMAT=json`
//!
//! # Example
//!
//! ```rust,no_run
//! use hil_monitor::config::ConfigLoader;
//!
//! let loader = ConfigLoader::load()?;
//! let config = loader.config();
//! println!("Baud rate: {}", config.serial.baud_rate);
//! # Ok::<(), hil_monitor::config::ConfigError>(())
//! ```

mod error;
mod loader;
mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{
    get_default_config_dir, get_default_config_path, resolve_config_path, ConfigLoader,
};
pub use schema::{
    Config, LogFormat, LoggingConfig, ProcessConfig, ReportConfig, RunConfig, SerialConfig,
    TelnetConfig, Terminator,
};
