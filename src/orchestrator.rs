//! Test-run orchestration.
//!
//! The orchestrator owns the transport for the whole run. On a bidirectional
//! transport it waits for the Unity menu banner, asks for the test list,
//! sends the run-all command, then watches the output until the device
//! reports its summary. A one-directional transport (a child process) runs
//! its tests unprompted, so watching starts straight away.
//!
//! ```text
//! AwaitingBanner -> ListingTests -> RunningAllTests -> Watching -> Finished
//! ```
//!
//! Whatever happens, the transport is closed exactly once and the state
//! collected so far is returned for reporting.

use crate::dispatch::{is_banner, PatternTable};
use crate::reader::{LineEvent, LineReader};
use crate::report::Report;
use crate::run_state::{Applied, RebootPolicy, RunState, TestStatus, Timestamp};
use crate::transport::{Transport, TransportError};
use chrono::{DateTime, Local, Utc};
use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Sent to make the Unity menu list the tests.
pub const LIST_COMMAND: &[u8] = b"\r\n";

/// Sent to make the Unity menu run every test.
pub const RUN_ALL_COMMAND: &[u8] = b"*\r\n";

/// Settings for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSettings {
    /// Line terminator accepted in addition to `\n`.
    pub terminator: Option<u8>,
    /// How long to wait for the menu banner (and the test listing).
    pub banner_timeout: Duration,
    /// Give up watching after this long.
    pub run_timeout: Option<Duration>,
    pub reboot_policy: RebootPolicy,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            terminator: Some(b'\r'),
            banner_timeout: Duration::from_secs(60),
            run_timeout: None,
            reboot_policy: RebootPolicy::EndRun,
        }
    }
}

/// Cooperative cancellation, polled between reads.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Where the run protocol currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingBanner,
    ListingTests,
    RunningAllTests,
    Watching,
    Finished,
}

/// Why the tests never started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartFailure {
    /// The stream ended before the menu was ready.
    StreamEnded,
    /// The banner did not appear in time.
    BannerTimeout(Duration),
    Cancelled,
}

/// How a run ended.
#[derive(Debug)]
pub enum RunEnd {
    /// The device printed its summary.
    Completed,
    /// The target rebooted and the policy ended the run.
    Rebooted,
    /// The stream ended without a summary.
    StreamClosed,
    Cancelled,
    /// The run deadline passed.
    TimedOut(Duration),
    NotStarted(StartFailure),
    /// A read or write failed fatally.
    TransportFailed(TransportError),
}

impl RunEnd {
    /// Whether the run ended without the device's summary.
    pub fn is_early(&self) -> bool {
        !matches!(self, Self::Completed)
    }
}

impl fmt::Display for RunEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "test run completed"),
            Self::Rebooted => write!(f, "run ended early: the target rebooted"),
            Self::StreamClosed => write!(f, "run ended early: the stream closed before the summary"),
            Self::Cancelled => write!(f, "run ended early: cancelled"),
            Self::TimedOut(limit) => write!(f, "run ended early: no summary within {:?}", limit),
            Self::NotStarted(StartFailure::StreamEnded) => {
                write!(f, "run did not start: the stream ended before the menu banner")
            }
            Self::NotStarted(StartFailure::BannerTimeout(limit)) => {
                write!(f, "run did not start: no menu banner within {:?}", limit)
            }
            Self::NotStarted(StartFailure::Cancelled) => write!(f, "run did not start: cancelled"),
            Self::TransportFailed(e) => write!(f, "run ended early: transport failure: {}", e),
        }
    }
}

/// The signal a caller maps to an exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The run finished normally with this many failures.
    Failures(u32),
    /// The run did not start or did not reach the device's summary.
    Aborted,
}

/// Everything known once a run is over.
#[derive(Debug)]
pub struct RunOutcome {
    pub state: RunState,
    pub end: RunEnd,
    /// Lines dropped because they were not valid text.
    pub decode_errors: u64,
    /// The phase the run was in when it ended.
    pub ended_in: Phase,
}

impl RunOutcome {
    pub fn completion(&self) -> Completion {
        match self.end {
            RunEnd::Completed => Completion::Failures(self.state.tests_failed()),
            _ => Completion::Aborted,
        }
    }

    /// Build the report, noting an early end if there was one.
    pub fn report(&self, suite: &str, class_name: &str) -> Report {
        let report = Report::build(&self.state, suite, class_name);
        if self.end.is_early() {
            report.with_end_note(self.end.to_string())
        } else {
            report
        }
    }

    /// One-line aggregate for the console.
    pub fn summary_line(&self) -> String {
        let mut line = format!(
            "{} test(s) run, {} failed, {} ignored, {} reboot(s)",
            self.state.tests_run(),
            self.state.tests_failed(),
            self.state.tests_ignored(),
            self.state.reboots()
        );
        if self.end.is_early() {
            line.push_str(&format!("; {}", self.end));
            if let Some(test) = self.state.interrupted_test() {
                line.push_str(&format!(" (during {}())", test));
            }
        }
        line
    }
}

/// Drives one test run over one transport.
pub struct Orchestrator {
    reader: LineReader,
    table: PatternTable,
    settings: RunSettings,
    state: RunState,
    phase: Phase,
    cancel: CancelToken,
}

impl Orchestrator {
    pub fn new(transport: Box<dyn Transport>, table: PatternTable, settings: RunSettings) -> Self {
        let state = RunState::new(settings.reboot_policy);
        Self {
            reader: LineReader::new(transport, settings.terminator),
            table,
            settings,
            state,
            phase: Phase::AwaitingBanner,
            cancel: CancelToken::new(),
        }
    }

    /// Copy every line read to `sink` (the raw console log).
    #[must_use]
    pub fn with_capture(mut self, sink: Box<dyn Write + Send>) -> Self {
        self.reader.set_capture(sink);
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run to completion and release the transport.
    pub fn run(mut self) -> RunOutcome {
        let end = match self.prepare() {
            Ok(()) => self.watch(),
            Err(end) => end,
        };
        let ended_in = self.phase;
        self.enter(Phase::Finished);

        match &end {
            RunEnd::Completed => info!("{}", end),
            RunEnd::TransportFailed(_) => error!("{}", end),
            _ => warn!("{}", end),
        }
        if let Some(drift) = self.state.drift() {
            warn!("Trusting the device summary over observed outcomes: {}", drift);
        }

        let decode_errors = self.reader.decode_errors();
        let mut transport = self.reader.into_inner();
        if let Err(e) = transport.close() {
            warn!("Failed to close {}: {}", transport.name(), e);
        }

        RunOutcome {
            state: self.state,
            end,
            decode_errors,
            ended_in,
        }
    }

    fn enter(&mut self, phase: Phase) {
        debug!("{:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    fn prepare(&mut self) -> Result<(), RunEnd> {
        if !self.reader.transport().is_bidirectional() {
            info!(
                "{} is one-directional; assuming it runs all tests by itself",
                self.reader.transport().name()
            );
            self.enter(Phase::Watching);
            self.state.begin(Timestamp::now());
            return Ok(());
        }

        self.await_banner()?;
        self.list_tests()?;
        self.run_all()
    }

    fn await_banner(&mut self) -> Result<(), RunEnd> {
        self.enter(Phase::AwaitingBanner);
        info!("Reading initial text from {}...", self.reader.transport().name());
        let deadline = Instant::now() + self.settings.banner_timeout;
        loop {
            if self.cancel.is_cancelled() {
                return Err(RunEnd::NotStarted(StartFailure::Cancelled));
            }
            if Instant::now() >= deadline {
                return Err(RunEnd::NotStarted(StartFailure::BannerTimeout(
                    self.settings.banner_timeout,
                )));
            }
            match self.reader.next_line() {
                Ok(LineEvent::Line(line)) => {
                    if is_banner(&line) {
                        return Ok(());
                    }
                }
                Ok(LineEvent::Idle) => {}
                Ok(LineEvent::Closed) => return Err(RunEnd::NotStarted(StartFailure::StreamEnded)),
                Err(e) => return Err(RunEnd::TransportFailed(e)),
            }
        }
    }

    fn list_tests(&mut self) -> Result<(), RunEnd> {
        self.enter(Phase::ListingTests);
        info!("Listing tests...");
        self.send(LIST_COMMAND)?;

        // The listing is only logged; it ends at the first quiet read.
        let deadline = Instant::now() + self.settings.banner_timeout;
        while Instant::now() < deadline && !self.cancel.is_cancelled() {
            match self.reader.next_line() {
                Ok(LineEvent::Line(line)) => {
                    debug!("listing: {}", line);
                }
                Ok(LineEvent::Idle) => return Ok(()),
                Ok(LineEvent::Closed) => return Err(RunEnd::NotStarted(StartFailure::StreamEnded)),
                Err(e) => return Err(RunEnd::TransportFailed(e)),
            }
        }
        Ok(())
    }

    fn run_all(&mut self) -> Result<(), RunEnd> {
        self.enter(Phase::RunningAllTests);
        info!("Sending command to run all tests...");
        self.send(RUN_ALL_COMMAND)?;
        let now = Timestamp::now();
        self.state.begin(now);
        info!("Run of all tests started on {}.", ctime(now.wall));
        self.enter(Phase::Watching);
        Ok(())
    }

    fn send(&mut self, command: &[u8]) -> Result<(), RunEnd> {
        self.reader
            .transport_mut()
            .write_bytes(command)
            .map(|_| ())
            .map_err(RunEnd::TransportFailed)
    }

    fn watch(&mut self) -> RunEnd {
        info!("Watching test output until the test run completes.");
        let deadline = self.settings.run_timeout.map(|limit| (Instant::now() + limit, limit));
        loop {
            if self.state.is_finished() {
                return if self.state.summary_seen() {
                    RunEnd::Completed
                } else {
                    RunEnd::Rebooted
                };
            }
            if self.cancel.is_cancelled() {
                self.state.finish_unplanned();
                return RunEnd::Cancelled;
            }
            if let Some((at, limit)) = deadline {
                if Instant::now() >= at {
                    self.state.finish_unplanned();
                    return RunEnd::TimedOut(limit);
                }
            }

            match self.reader.next_line() {
                Ok(LineEvent::Line(line)) => {
                    self.dispatch(&line);
                }
                Ok(LineEvent::Idle) => {}
                Ok(LineEvent::Closed) => {
                    self.state.finish_unplanned();
                    return RunEnd::StreamClosed;
                }
                Err(e) => {
                    self.state.finish_unplanned();
                    return RunEnd::TransportFailed(e);
                }
            }
        }
    }

    fn dispatch(&mut self, line: &str) {
        trace!("line: {}", line);
        let Some((kind, marker)) = self.table.classify(line) else {
            return;
        };
        debug!("{} recognizer matched", kind);
        match self.state.apply(&marker, Timestamp::now()) {
            Applied::Started { name, at } => {
                info!("Progress update - test {}() started on {}.", name, ctime(at));
            }
            Applied::Completed(outcome) => {
                info!(
                    "Progress update - test {}() {} on {} after running for {} second(s).",
                    outcome.name,
                    if outcome.status == TestStatus::Pass {
                        "passed"
                    } else {
                        "FAILED"
                    },
                    ctime(outcome.finished_at),
                    outcome.duration_secs
                );
            }
            Applied::Finished {
                tests,
                failures,
                ignored,
                elapsed,
            } => {
                let took = elapsed.map(hms).unwrap_or_else(|| "an unknown time".to_string());
                info!(
                    "Test run completed on {}, {} test(s) run, {} test(s) failed, {} test(s) ignored, test run took {}.",
                    ctime(Utc::now()),
                    tests,
                    failures,
                    ignored,
                    took
                );
            }
            Applied::Rebooted {
                interrupted,
                ends_run,
            } => {
                let during = interrupted
                    .map(|name| format!(" while {}() was running", name))
                    .unwrap_or_default();
                if ends_run {
                    warn!("Progress update - target has rebooted{}; ending the run.", during);
                } else {
                    warn!("Progress update - target has rebooted{}; still watching.", during);
                }
            }
            Applied::Ignored => debug!("Ignoring marker after the run finished"),
        }
    }
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("transport", &self.reader.transport().name())
            .field("phase", &self.phase)
            .field("settings", &self.settings)
            .finish()
    }
}

fn ctime(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%a %b %e %H:%M:%S %Y").to_string()
}

fn hms(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hms() {
        assert_eq!(hms(Duration::from_secs(0)), "0:00:00");
        assert_eq!(hms(Duration::from_secs(3725)), "1:02:05");
        assert_eq!(hms(Duration::from_secs(59)), "0:00:59");
    }

    #[test]
    fn test_cancel_token_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_early_end_display() {
        assert!(RunEnd::StreamClosed.is_early());
        assert!(!RunEnd::Completed.is_early());
        assert_eq!(
            RunEnd::NotStarted(StartFailure::StreamEnded).to_string(),
            "run did not start: the stream ended before the menu banner"
        );
    }
}
