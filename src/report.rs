//! Report generation.
//!
//! Builds a [`Report`] from the final [`RunState`] and writes it as
//! JUnit XML (what CI servers ingest) or JSON. Suite totals always
//! come from the run counters, which hold the device's own summary when one
//! was seen; the per-test records are only what was observed.

use crate::run_state::{RunState, TestStatus};
use chrono::{DateTime, Utc};
use newtype_uuid::GenericUuid;
use quick_junit::{NonSuccessKind, ReportUuid, TestCase, TestCaseStatus, TestSuite};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Output format of the report file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Xml,
    Json,
}

/// Errors while writing a report.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Failed to write report: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize report: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to serialize JUnit report: {0}")]
    Junit(#[from] quick_junit::SerializeError),
}

/// One test record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportCase {
    pub name: String,
    /// Duration in whole seconds.
    pub time: u64,
    pub status: TestStatus,
}

/// The structured result of a run.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub run_id: Uuid,
    pub suite: String,
    pub class_name: String,
    pub tests: u32,
    pub failures: u32,
    pub ignored: u32,
    pub reboots: u32,
    /// The run ended without the device's summary line.
    pub ended_early: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interrupted_test: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    pub generated_at: DateTime<Utc>,
    pub testcases: Vec<ReportCase>,
}

impl Report {
    /// Build a report from the final run state.
    pub fn build(state: &RunState, suite: &str, class_name: &str) -> Self {
        Self {
            run_id: ReportUuid::new_v4().into_untyped_uuid(),
            suite: suite.to_string(),
            class_name: class_name.to_string(),
            tests: state.tests_run(),
            failures: state.tests_failed(),
            ignored: state.tests_ignored(),
            reboots: state.reboots(),
            ended_early: !state.summary_seen(),
            end_note: None,
            interrupted_test: state.interrupted_test().map(str::to_string),
            started_at: state.overall_start().map(|t| t.wall),
            generated_at: Utc::now(),
            testcases: state
                .ledger()
                .iter()
                .map(|o| ReportCase {
                    name: o.name.clone(),
                    time: o.duration_secs,
                    status: o.status,
                })
                .collect(),
        }
    }

    /// Attach a note explaining how the run ended.
    #[must_use]
    pub fn with_end_note(mut self, note: impl Into<String>) -> Self {
        self.end_note = Some(note.into());
        self
    }

    /// Write the report in the given format.
    pub fn write<W: Write>(&self, format: ReportFormat, out: &mut W) -> Result<(), ReportError> {
        match format {
            ReportFormat::Xml => self.to_junit().serialize(&mut *out)?,
            ReportFormat::Json => {
                serde_json::to_writer_pretty(&mut *out, self)?;
                writeln!(out)?;
            }
        }
        out.flush()?;
        Ok(())
    }

    /// Create (or overwrite) `path` and write the report to it.
    pub fn write_to_path(&self, format: ReportFormat, path: &Path) -> Result<(), ReportError> {
        let mut out = BufWriter::new(File::create(path)?);
        self.write(format, &mut out)
    }

    /// The JUnit form of the report: one suite whose totals are the run
    /// counters, one case per observed outcome.
    pub fn to_junit(&self) -> quick_junit::Report {
        let mut suite = TestSuite::new(self.suite.as_str());
        for case in &self.testcases {
            let status = match case.status {
                TestStatus::Pass => TestCaseStatus::success(),
                TestStatus::Fail => {
                    let mut status = TestCaseStatus::non_success(NonSuccessKind::Failure);
                    status.set_message("FAIL");
                    status
                }
            };
            let mut test_case = TestCase::new(case.name.as_str(), status);
            test_case
                .set_classname(self.class_name.as_str())
                .set_time(Duration::from_secs(case.time));
            suite.add_test_case(test_case);
        }
        // The device summary outranks what was observed.
        suite.tests = self.tests as usize;
        suite.failures = self.failures as usize;
        suite.disabled = self.ignored as usize;
        if let Some(started_at) = self.started_at {
            suite.set_timestamp(started_at);
        }
        if let Some(note) = self.end_note.as_deref().filter(|_| self.ended_early) {
            suite.set_system_err(note);
        }

        let mut report = quick_junit::Report::new("hil-monitor");
        report
            .set_report_uuid(ReportUuid::from_untyped_uuid(self.run_id))
            .set_timestamp(self.generated_at);
        report.add_test_suite(suite);
        report.tests = self.tests as usize;
        report.failures = self.failures as usize;
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Marker;
    use crate::run_state::Timestamp;
    use pretty_assertions::assert_eq;

    fn finished_state() -> RunState {
        let t0 = Timestamp::now();
        let mut state = RunState::default();
        state.begin(t0);
        for (name, pass) in [("testFoo", true), ("test<Bar>", false)] {
            state.apply(
                &Marker::TestStarted {
                    name: name.to_string(),
                },
                t0,
            );
            let marker = if pass {
                Marker::TestPassed {
                    name: name.to_string(),
                }
            } else {
                Marker::TestFailed {
                    name: name.to_string(),
                }
            };
            state.apply(&marker, t0);
        }
        state.apply(
            &Marker::RunFinished {
                tests: 2,
                failures: 1,
                ignored: 0,
            },
            t0,
        );
        state
    }

    #[test]
    fn test_xml_output() {
        let report = Report::build(&finished_state(), "esp-idf", "cellular_tests");
        let mut out = Vec::new();
        report.write(ReportFormat::Xml, &mut out).unwrap();

        let xml = String::from_utf8(out).unwrap();
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains(r#"<testsuite name="esp-idf""#));
        assert!(xml.contains(r#"tests="2""#));
        assert!(xml.contains(r#"failures="1""#));
        assert!(xml.contains(r#"name="testFoo""#));
        assert!(xml.contains(r#"classname="cellular_tests""#));
        assert!(xml.contains("test&lt;Bar&gt;"));
        assert_eq!(xml.matches("<failure").count(), 1);
        assert!(xml.contains(r#"message="FAIL""#));
        assert!(!xml.contains("<system-err>"));
    }

    #[test]
    fn test_junit_totals_follow_device_summary() {
        let t0 = Timestamp::now();
        let mut state = RunState::default();
        state.apply(
            &Marker::TestPassed {
                name: "only".to_string(),
            },
            t0,
        );
        state.apply(
            &Marker::RunFinished {
                tests: 5,
                failures: 2,
                ignored: 1,
            },
            t0,
        );

        let junit = Report::build(&state, "suite", "class").to_junit();
        let suite = &junit.test_suites[0];
        assert_eq!(suite.test_cases.len(), 1);
        assert_eq!(suite.tests, 5);
        assert_eq!(suite.failures, 2);
        assert_eq!(suite.disabled, 1);
        assert_eq!(junit.tests, 5);
    }

    #[test]
    fn test_control_characters_never_reach_the_xml() {
        let t0 = Timestamp::now();
        let mut state = RunState::default();
        state.apply(
            &Marker::TestFailed {
                name: "color\x1b[31mTest".to_string(),
            },
            t0,
        );
        state.finish_unplanned();
        let report = Report::build(&state, "esp-idf", "cellular_tests")
            .with_end_note("target printed \x1b[0m and \x07 before closing");

        let mut out = Vec::new();
        report.write(ReportFormat::Xml, &mut out).unwrap();

        let xml = String::from_utf8(out).unwrap();
        assert!(!xml.contains('\x1b'));
        assert!(!xml.contains('\x07'));
        assert!(xml.contains("<system-err>"));
    }

    #[test]
    fn test_totals_come_from_device_summary() {
        let t0 = Timestamp::now();
        let mut state = RunState::default();
        state.apply(
            &Marker::TestPassed {
                name: "only".to_string(),
            },
            t0,
        );
        state.apply(
            &Marker::RunFinished {
                tests: 5,
                failures: 2,
                ignored: 1,
            },
            t0,
        );

        let report = Report::build(&state, "suite", "class");
        assert_eq!(report.tests, 5);
        assert_eq!(report.failures, 2);
        assert_eq!(report.ignored, 1);
        assert_eq!(report.testcases.len(), 1);
        assert!(!report.ended_early);
    }

    #[test]
    fn test_early_end_note_only_in_xml_when_ended_early() {
        let mut state = RunState::default();
        state.finish_unplanned();
        let report = Report::build(&state, "s", "c").with_end_note("stream closed");
        let mut out = Vec::new();
        report.write(ReportFormat::Xml, &mut out).unwrap();

        let xml = String::from_utf8(out).unwrap();
        assert!(report.ended_early);
        assert!(xml.contains("<system-err>stream closed</system-err>"));
    }
}
