//! Test-run state.
//!
//! `RunState` is the single mutable aggregate for a run. It changes only by
//! applying [`Marker`]s, which keeps classification (see [`crate::dispatch`])
//! separate from bookkeeping and lets both be tested in isolation.

use crate::dispatch::Marker;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::warn;

/// What to do when the target reboots mid-run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RebootPolicy {
    /// Treat the reboot as the end of the run.
    #[default]
    EndRun,
    /// Count the reboot, forget the interrupted test and keep watching.
    KeepWatching,
}

/// Outcome of one completed test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TestStatus {
    Pass,
    Fail,
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
        })
    }
}

/// One ledger entry. Never modified once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestOutcome {
    pub name: String,
    pub duration_secs: u64,
    pub status: TestStatus,
    pub finished_at: DateTime<Utc>,
}

/// A point in time, both monotonic (for durations) and wall clock (for
/// display and the report).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    pub instant: Instant,
    pub wall: DateTime<Utc>,
}

impl Timestamp {
    pub fn now() -> Self {
        Self {
            instant: Instant::now(),
            wall: Utc::now(),
        }
    }

    /// The same moment shifted forward; used to replay recorded timings.
    pub fn after(&self, delta: Duration) -> Self {
        Self {
            instant: self.instant + delta,
            wall: self.wall + chrono::Duration::from_std(delta).unwrap_or_else(|_| chrono::Duration::zero()),
        }
    }
}

/// Result of applying one marker, for progress reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    Started {
        name: String,
        at: DateTime<Utc>,
    },
    Completed(TestOutcome),
    Finished {
        tests: u32,
        failures: u32,
        ignored: u32,
        /// Time since the run-all command, if it was recorded.
        elapsed: Option<Duration>,
    },
    Rebooted {
        /// The test that was running when the target went down.
        interrupted: Option<String>,
        ends_run: bool,
    },
    /// The run had already finished; the marker changed nothing.
    Ignored,
}

/// Disagreement between the device's summary and what was observed.
///
/// The summary always wins; this only records that the two differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Drift {
    pub reported_tests: u32,
    pub observed_outcomes: u32,
    pub reported_failures: u32,
    pub observed_failures: u32,
}

impl fmt::Display for Drift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "device reported {} test(s) / {} failure(s) but {} outcome(s) / {} failure(s) were observed",
            self.reported_tests, self.reported_failures, self.observed_outcomes, self.observed_failures
        )
    }
}

/// Aggregate state of one test run.
#[derive(Debug, Clone)]
pub struct RunState {
    policy: RebootPolicy,
    reboots: u32,
    tests_started: u32,
    tests_run: u32,
    tests_failed: u32,
    tests_ignored: u32,
    overall_start: Option<Timestamp>,
    last_test_start: Option<Timestamp>,
    in_flight: Option<String>,
    interrupted: Option<String>,
    finished: bool,
    summary_seen: bool,
    ledger: Vec<TestOutcome>,
}

impl RunState {
    pub fn new(policy: RebootPolicy) -> Self {
        Self {
            policy,
            reboots: 0,
            tests_started: 0,
            tests_run: 0,
            tests_failed: 0,
            tests_ignored: 0,
            overall_start: None,
            last_test_start: None,
            in_flight: None,
            interrupted: None,
            finished: false,
            summary_seen: false,
            ledger: Vec::new(),
        }
    }

    /// Record when the run-all command was issued.
    pub fn begin(&mut self, at: Timestamp) {
        self.overall_start = Some(at);
    }

    /// Update the state from one classified line.
    pub fn apply(&mut self, marker: &Marker, at: Timestamp) -> Applied {
        if self.finished && !matches!(marker, Marker::RunFinished { .. }) {
            return Applied::Ignored;
        }

        match marker {
            Marker::Reboot => {
                self.reboots += 1;
                let interrupted = self.in_flight.take();
                self.last_test_start = None;
                let ends_run = self.policy == RebootPolicy::EndRun;
                if ends_run {
                    self.interrupted = interrupted.clone();
                    self.finished = true;
                }
                Applied::Rebooted {
                    interrupted,
                    ends_run,
                }
            }
            Marker::TestStarted { name } => {
                self.last_test_start = Some(at);
                self.in_flight = Some(name.clone());
                self.tests_started += 1;
                self.tests_run += 1;
                Applied::Started {
                    name: name.clone(),
                    at: at.wall,
                }
            }
            Marker::TestPassed { name } => Applied::Completed(self.record(name, TestStatus::Pass, at)),
            Marker::TestFailed { name } => {
                self.tests_failed += 1;
                Applied::Completed(self.record(name, TestStatus::Fail, at))
            }
            Marker::RunFinished {
                tests,
                failures,
                ignored,
            } => {
                if failures > tests {
                    warn!(
                        "Device summary reports {} failure(s) out of {} test(s); capping failures",
                        failures, tests
                    );
                }
                self.tests_run = *tests;
                self.tests_failed = (*failures).min(*tests);
                self.tests_ignored = *ignored;
                self.finished = true;
                self.summary_seen = true;
                self.in_flight = None;
                Applied::Finished {
                    tests: self.tests_run,
                    failures: self.tests_failed,
                    ignored: self.tests_ignored,
                    elapsed: self
                        .overall_start
                        .map(|start| at.instant.saturating_duration_since(start.instant)),
                }
            }
        }
    }

    fn record(&mut self, name: &str, status: TestStatus, at: Timestamp) -> TestOutcome {
        let started = self.last_test_start.or(self.overall_start);
        let duration_secs = started
            .map(|start| ceil_secs(at.instant.saturating_duration_since(start.instant)))
            .unwrap_or(0);
        let outcome = TestOutcome {
            name: name.to_string(),
            duration_secs,
            status,
            finished_at: at.wall,
        };
        self.ledger.push(outcome.clone());
        if self.in_flight.as_deref() == Some(name) {
            self.in_flight = None;
        }
        // An outcome without a start line still counts as a test run.
        let recorded = u32::try_from(self.ledger.len()).unwrap_or(u32::MAX);
        self.tests_run = self.tests_run.max(recorded);
        outcome
    }

    /// Mark the run finished without a device summary (stream ended,
    /// cancelled or timed out). Returns `false` if it was already finished.
    pub fn finish_unplanned(&mut self) -> bool {
        if self.finished {
            return false;
        }
        self.finished = true;
        self.interrupted = self.in_flight.take();
        true
    }

    pub fn reboots(&self) -> u32 {
        self.reboots
    }

    pub fn tests_started(&self) -> u32 {
        self.tests_started
    }

    pub fn tests_run(&self) -> u32 {
        self.tests_run
    }

    pub fn tests_failed(&self) -> u32 {
        self.tests_failed
    }

    pub fn tests_ignored(&self) -> u32 {
        self.tests_ignored
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Whether the device's own summary line was seen.
    pub fn summary_seen(&self) -> bool {
        self.summary_seen
    }

    /// The test running when the run ended early, if any.
    pub fn interrupted_test(&self) -> Option<&str> {
        self.interrupted.as_deref()
    }

    pub fn overall_start(&self) -> Option<Timestamp> {
        self.overall_start
    }

    /// Completed tests in completion order.
    pub fn ledger(&self) -> &[TestOutcome] {
        &self.ledger
    }

    /// Compare the device summary with the ledger.
    pub fn drift(&self) -> Option<Drift> {
        if !self.summary_seen {
            return None;
        }
        let observed_outcomes = u32::try_from(self.ledger.len()).unwrap_or(u32::MAX);
        let observed_failures = u32::try_from(
            self.ledger
                .iter()
                .filter(|o| o.status == TestStatus::Fail)
                .count(),
        )
        .unwrap_or(u32::MAX);
        if observed_outcomes == self.tests_run && observed_failures == self.tests_failed {
            return None;
        }
        Some(Drift {
            reported_tests: self.tests_run,
            observed_outcomes,
            reported_failures: self.tests_failed,
            observed_failures,
        })
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new(RebootPolicy::default())
    }
}

/// Whole seconds, rounded up.
pub fn ceil_secs(elapsed: Duration) -> u64 {
    elapsed.as_secs() + u64::from(elapsed.subsec_nanos() > 0)
}
