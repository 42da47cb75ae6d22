//! Configuration schema definitions.
//!
//! This module defines the structure of the configuration file using serde.
//! All configuration sections are defined here with appropriate defaults.

use crate::dispatch::DEFAULT_REBOOT_MARKER;
use crate::orchestrator::RunSettings;
use crate::report::ReportFormat;
use crate::run_state::RebootPolicy;
use crate::transport::{ProcessSettings, SerialSettings, TelnetSettings, TransportSettings};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Serial port configuration
    pub serial: SerialConfig,
    /// Telnet configuration
    pub telnet: TelnetConfig,
    /// Child process configuration
    pub process: ProcessConfig,
    /// Run protocol configuration
    pub run: RunConfig,
    /// Report configuration
    pub report: ReportConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Settings for every transport kind.
    pub fn transport_settings(&self) -> TransportSettings {
        TransportSettings {
            serial: SerialSettings {
                baud_rate: self.serial.baud_rate,
                read_timeout: self.serial.read_timeout(),
            },
            telnet: TelnetSettings {
                host: self.telnet.host.clone(),
                connect_timeout: Duration::from_millis(self.telnet.connect_timeout_ms),
                read_timeout: Duration::from_millis(self.telnet.read_timeout_ms),
            },
            process: ProcessSettings {
                settle_time: Duration::from_millis(self.process.settle_time_ms),
                read_timeout: Duration::from_millis(self.process.read_timeout_ms),
            },
        }
    }
}

/// Serial port configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Baud rate
    pub baud_rate: u32,
    /// Read timeout in milliseconds
    pub read_timeout_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: 115200,
            read_timeout_ms: 50,
        }
    }
}

impl SerialConfig {
    /// Get the read timeout as Duration
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Telnet configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelnetConfig {
    /// Host the console server runs on
    pub host: String,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
}

impl Default for TelnetConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            connect_timeout_ms: 1000,
            read_timeout_ms: 1000,
        }
    }
}

/// Child process configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    /// Time to let the program start before checking it is still alive
    pub settle_time_ms: u64,
    pub read_timeout_ms: u64,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            settle_time_ms: 5000,
            read_timeout_ms: 50,
        }
    }
}

/// Run protocol configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Line terminator accepted alongside `\n`: "cr", "lf" or "none"
    pub terminator: Terminator,
    /// How long to wait for the menu banner in milliseconds
    pub banner_timeout_ms: u64,
    /// Give up on the run after this many seconds (unset: wait forever)
    pub run_timeout_secs: Option<u64>,
    /// What a reboot does to the run
    pub reboot_policy: RebootPolicy,
    /// Text that marks a target crash
    pub reboot_marker: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            terminator: Terminator::Cr,
            banner_timeout_ms: 60_000,
            run_timeout_secs: None,
            reboot_policy: RebootPolicy::EndRun,
            reboot_marker: DEFAULT_REBOOT_MARKER.to_string(),
        }
    }
}

impl RunConfig {
    /// Orchestrator settings for this section.
    pub fn settings(&self) -> RunSettings {
        RunSettings {
            terminator: self.terminator.byte(),
            banner_timeout: Duration::from_millis(self.banner_timeout_ms),
            run_timeout: self.run_timeout_secs.map(Duration::from_secs),
            reboot_policy: self.reboot_policy,
        }
    }
}

/// Extra line terminator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Terminator {
    /// Carriage return (the Unity console default)
    #[default]
    Cr,
    /// Line feed only
    Lf,
    /// Same as `Lf`
    None,
}

impl Terminator {
    pub fn byte(self) -> Option<u8> {
        match self {
            Self::Cr => Some(b'\r'),
            Self::Lf | Self::None => None,
        }
    }
}

/// Report configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Test suite name
    pub suite: String,
    /// Class name given to every test case
    pub class_name: String,
    /// Output format: "xml" or "json"
    pub format: ReportFormat,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            suite: "esp-idf".to_string(),
            class_name: "cellular_tests".to_string(),
            format: ReportFormat::Xml,
        }
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Log format: "json", "pretty", "compact"
    pub format: LogFormat,
    /// Write diagnostics here instead of stderr
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            file: None,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format
    Json,
    /// Pretty format with colors
    #[default]
    Pretty,
    /// Compact format
    Compact,
}
