//! Shared test utilities for hil-monitor tests.
//!
//! This module provides common test infrastructure including:
//! - Scripted device consoles with pre-programmed output
//! - Orchestrator construction with fast timeouts
//! - A capture sink that can be inspected after the run

#![allow(dead_code)]

use hil_monitor::transport::ScriptedTransport;
use hil_monitor::{Orchestrator, PatternTable, RebootPolicy, RunOutcome, RunSettings};
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// The menu banner printed by the Unity test app.
pub const BANNER: &str = "Press ENTER to see the list of tests.";

/// A scripted console that behaves like a Unity target: it prints the menu
/// banner and the test list, pauses, then prints `run_lines`.
///
/// # Example
/// ```ignore
/// let device = unity_device("SCRIPT0", &["Running testFoo...", "1 Tests 0 Failures 0 Ignored"]);
/// ```
pub fn unity_device(name: &str, run_lines: &[&str]) -> ScriptedTransport {
    let mut device = ScriptedTransport::new(name);
    device.push_line("ESP-IDF boot");
    device.push_line(BANNER);
    device.push_line("Here's the test menu, pick your combo:");
    device.push_line("(1)\t\"testFoo\" [cellular]");
    device.push_timeout();
    for line in run_lines {
        device.push_line(line);
    }
    device
}

/// A scripted child process: one-directional, output only.
pub fn program_output(name: &str, run_lines: &[&str]) -> ScriptedTransport {
    let mut program = ScriptedTransport::new(name).one_directional();
    for line in run_lines {
        program.push_line(line);
    }
    program
}

/// Settings with short deadlines suitable for tests.
pub fn fast_settings() -> RunSettings {
    RunSettings {
        banner_timeout: Duration::from_secs(5),
        ..RunSettings::default()
    }
}

/// Run the orchestrator over a scripted transport with the default policy.
pub fn run_scripted(transport: ScriptedTransport) -> RunOutcome {
    run_with_policy(transport, RebootPolicy::EndRun)
}

/// Run the orchestrator over a scripted transport with a reboot policy.
pub fn run_with_policy(transport: ScriptedTransport, policy: RebootPolicy) -> RunOutcome {
    let settings = RunSettings {
        reboot_policy: policy,
        ..fast_settings()
    };
    Orchestrator::new(Box::new(transport), PatternTable::default(), settings).run()
}

/// A `Write` sink that shares its buffer with the test.
#[derive(Debug, Clone, Default)]
pub struct SharedSink(Arc<Mutex<Vec<u8>>>);

impl SharedSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far, as text.
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
