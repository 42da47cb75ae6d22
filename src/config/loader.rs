//! Configuration loader with file resolution and environment override support.

use super::error::{ConfigError, ConfigResult};
use super::schema::{Config, LogFormat, Terminator};
use crate::report::ReportFormat;
use crate::run_state::RebootPolicy;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Environment variable prefix for overrides
const ENV_PREFIX: &str = "HIL_MONITOR";

/// Config file name looked up in the current directory
const LOCAL_CONFIG_FILE_NAME: &str = "hil-monitor.toml";

/// Config file name inside the per-user config directory
const CONFIG_FILE_NAME: &str = "config.toml";

/// Environment variable for explicit config path
const CONFIG_PATH_ENV: &str = "HIL_MONITOR_CONFIG";

const APP_DIR: &str = "hil-monitor";

/// Configuration loader with resolution and override logic.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Resolved config file path (if any)
    pub config_path: Option<PathBuf>,
    /// The loaded configuration
    pub config: Config,
}

impl ConfigLoader {
    /// Load configuration using standard resolution order.
    ///
    /// Resolution priority (highest to lowest):
    /// 1. `HIL_MONITOR_CONFIG` environment variable (explicit path)
    /// 2. `./hil-monitor.toml` (current directory)
    /// 3. `~/.config/hil-monitor/config.toml` (XDG on Linux/macOS)
    /// 4. `%APPDATA%\hil-monitor\config.toml` (Windows)
    /// 5. Built-in defaults (no file required)
    ///
    /// Environment variables can override any config file values.
    pub fn load() -> ConfigResult<Self> {
        let config_path = resolve_config_path();

        let mut config = if let Some(ref path) = config_path {
            load_from_file(path)?
        } else {
            Config::default()
        };

        apply_env_overrides(&mut config)?;

        Ok(Self { config_path, config })
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(ConfigError::NotFound(path));
        }
        let mut config = load_from_file(&path)?;
        apply_env_overrides(&mut config)?;

        Ok(Self {
            config_path: Some(path),
            config,
        })
    }

    /// Create a loader with default configuration (no file).
    pub fn with_defaults() -> ConfigResult<Self> {
        let mut config = Config::default();
        apply_env_overrides(&mut config)?;

        Ok(Self {
            config_path: None,
            config,
        })
    }

    /// Get the loaded configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get a mutable reference to the configuration.
    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Consume the loader and return the configuration.
    pub fn into_config(self) -> Config {
        self.config
    }
}

/// Resolve the configuration file path using standard locations.
pub fn resolve_config_path() -> Option<PathBuf> {
    // 1. Explicit environment variable
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. Current directory
    let cwd_config = PathBuf::from(LOCAL_CONFIG_FILE_NAME);
    if cwd_config.exists() {
        return Some(cwd_config);
    }

    // 3. XDG config directory (Linux/macOS) or APPDATA (Windows)
    if let Some(app_config) = get_default_config_path() {
        if app_config.exists() {
            return Some(app_config);
        }
    }

    None
}

/// Get the platform-specific config directory.
fn get_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    }

    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
    }
}

/// Load configuration from a file.
fn load_from_file(path: &Path) -> ConfigResult<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })?;

    let config: Config = toml::from_str(&content)?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> ConfigResult<()> {
    if config.serial.baud_rate == 0 {
        return Err(ConfigError::validation("serial.baud_rate", "must be non-zero"));
    }
    if config.run.reboot_marker.is_empty() {
        return Err(ConfigError::validation(
            "run.reboot_marker",
            "must not be empty",
        ));
    }
    if config.run.banner_timeout_ms == 0 {
        return Err(ConfigError::validation(
            "run.banner_timeout_ms",
            "must be non-zero",
        ));
    }
    Ok(())
}

fn env_var(key: &str) -> Option<(String, String)> {
    let var = format!("{}_{}", ENV_PREFIX, key);
    std::env::var(&var).ok().map(|val| (var, val))
}

fn parse_env<T: FromStr>(var: &str, val: &str, what: &str) -> ConfigResult<T> {
    val.trim()
        .parse()
        .map_err(|_| ConfigError::env_parse(var, format!("Invalid {}", what)))
}

fn parse_env_enum<T: serde::de::DeserializeOwned>(var: &str, val: &str) -> ConfigResult<T> {
    T::deserialize(toml::Value::String(val.trim().to_lowercase()))
        .map_err(|e| ConfigError::env_parse(var, e.to_string()))
}

/// Apply environment variable overrides to the configuration.
///
/// Environment variables follow the pattern: `HIL_MONITOR_<SECTION>_<KEY>`
/// For example:
/// - `HIL_MONITOR_SERIAL_BAUD_RATE=921600`
/// - `HIL_MONITOR_RUN_REBOOT_POLICY=keep-watching`
/// - `HIL_MONITOR_REPORT_FORMAT=json`
fn apply_env_overrides(config: &mut Config) -> ConfigResult<()> {
    // Serial overrides
    if let Some((var, val)) = env_var("SERIAL_BAUD_RATE") {
        config.serial.baud_rate = parse_env(&var, &val, "baud rate")?;
    }
    if let Some((var, val)) = env_var("SERIAL_READ_TIMEOUT_MS") {
        config.serial.read_timeout_ms = parse_env(&var, &val, "timeout")?;
    }

    // Telnet overrides
    if let Some((_, val)) = env_var("TELNET_HOST") {
        config.telnet.host = val;
    }
    if let Some((var, val)) = env_var("TELNET_READ_TIMEOUT_MS") {
        config.telnet.read_timeout_ms = parse_env(&var, &val, "timeout")?;
    }

    // Process overrides
    if let Some((var, val)) = env_var("PROCESS_SETTLE_TIME_MS") {
        config.process.settle_time_ms = parse_env(&var, &val, "settle time")?;
    }

    // Run overrides
    if let Some((var, val)) = env_var("RUN_TERMINATOR") {
        config.run.terminator = parse_env_enum::<Terminator>(&var, &val)?;
    }
    if let Some((var, val)) = env_var("RUN_BANNER_TIMEOUT_MS") {
        config.run.banner_timeout_ms = parse_env(&var, &val, "timeout")?;
    }
    if let Some((var, val)) = env_var("RUN_TIMEOUT_SECS") {
        config.run.run_timeout_secs = Some(parse_env(&var, &val, "timeout")?);
    }
    if let Some((var, val)) = env_var("RUN_REBOOT_POLICY") {
        config.run.reboot_policy = parse_env_enum::<RebootPolicy>(&var, &val)?;
    }
    if let Some((_, val)) = env_var("RUN_REBOOT_MARKER") {
        config.run.reboot_marker = val;
    }

    // Report overrides
    if let Some((_, val)) = env_var("REPORT_SUITE") {
        config.report.suite = val;
    }
    if let Some((var, val)) = env_var("REPORT_FORMAT") {
        config.report.format = parse_env_enum::<ReportFormat>(&var, &val)?;
    }

    // Logging overrides
    if let Some((_, val)) = env_var("LOGGING_LEVEL") {
        config.logging.level = val;
    }
    if let Some((var, val)) = env_var("LOGGING_FORMAT") {
        config.logging.format = parse_env_enum::<LogFormat>(&var, &val)?;
    }

    Ok(())
}

/// Get the default config directory for creating new config files.
pub fn get_default_config_dir() -> Option<PathBuf> {
    get_config_dir().map(|d| d.join(APP_DIR))
}

/// Get the default config file path for creating new config files.
pub fn get_default_config_path() -> Option<PathBuf> {
    get_default_config_dir().map(|d| d.join(CONFIG_FILE_NAME))
}
