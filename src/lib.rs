//! Hardware-in-the-loop test monitor library
//!
//! Drives a Unity test build running on a target (or as a host program),
//! follows its console output and turns it into a test report.
//!
//! # Modules
//!
//! - `transport`: serial, telnet and child-process consoles behind one trait
//! - `reader`: line assembly over any transport
//! - `dispatch`: ordered recognizers that classify console lines
//! - `run_state`: counters, ledger and reboot handling for one run
//! - `orchestrator`: the run protocol from menu banner to summary
//! - `report`: JUnit-style XML and JSON reports
//! - `config`: Configuration management with TOML support
//! - `logging`: tracing subscriber setup
//! - `error`: Unified error handling

pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod reader;
pub mod report;
pub mod run_state;
pub mod transport;

// Re-export commonly used types for convenience
pub use dispatch::{Marker, PatternTable, RecognizerKind};
pub use error::{AppError, AppResult};
pub use orchestrator::{
    CancelToken, Completion, Orchestrator, Phase, RunEnd, RunOutcome, RunSettings, StartFailure,
};
pub use reader::{LineEvent, LineReader};
pub use report::{Report, ReportError, ReportFormat};
pub use run_state::{RebootPolicy, RunState, TestOutcome, TestStatus};
pub use transport::{
    open_transport, ScriptedTransport, Transport, TransportChoice, TransportError,
    TransportKind, TransportOpenError,
};

// Re-export config types
pub use config::{Config, ConfigError, ConfigLoader, ConfigResult};
