//! Line classification.
//!
//! An ordered table of recognizers turns console lines into [`Marker`]s.
//! Only the first matching recognizer fires: the reboot marker is checked
//! before everything else so a crash dump that happens to contain other
//! markers is never mistaken for test progress.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;
use std::fmt;

/// Text the fault handler prints when the target aborts.
pub const DEFAULT_REBOOT_MARKER: &str = "abort()";

/// Text the Unity menu prints once it is ready for input.
pub const BANNER: &str = "Press ENTER to see the list of tests.";

const START_PATTERN: &str = r"^.*Running +([^.]+)\.\.\.$";
const PASS_PATTERN: &str = r"^.*?\.c:[0-9]*:(.*?):PASS$";
const FAIL_PATTERN: &str = r"^.*?\.c:[0-9]*:(.*?):FAIL:";
const FINISH_PATTERN: &str = r"^([0-9]+) Tests* ([0-9]+) Failures* ([0-9]+) Ignored";

static STANDARD_TABLE: Lazy<PatternTable> = Lazy::new(|| {
    // The built-in patterns are constants; failing to compile them is a bug.
    PatternTable::with_reboot_marker(DEFAULT_REBOOT_MARKER)
        .expect("built-in recognizer patterns compile")
});

/// Structured data extracted from one console line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "marker", rename_all = "snake_case")]
pub enum Marker {
    /// The target crashed and is restarting.
    Reboot,
    /// A test began.
    TestStarted { name: String },
    /// A test passed.
    TestPassed { name: String },
    /// A test failed. The failure reason is not retained.
    TestFailed { name: String },
    /// The device's own end-of-run summary.
    RunFinished {
        tests: u32,
        failures: u32,
        ignored: u32,
    },
}

/// Identifies a recognizer in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecognizerKind {
    Reboot,
    TestStart,
    TestPass,
    TestFail,
    RunFinish,
}

impl fmt::Display for RecognizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Reboot => "reboot",
            Self::TestStart => "test-start",
            Self::TestPass => "test-pass",
            Self::TestFail => "test-fail",
            Self::RunFinish => "run-finish",
        };
        f.write_str(name)
    }
}

type Extractor = fn(&Captures<'_>) -> Option<Marker>;

/// A pattern plus the function that turns its captures into a marker.
#[derive(Clone)]
pub struct Recognizer {
    kind: RecognizerKind,
    regex: Regex,
    extract: Extractor,
}

impl Recognizer {
    fn new(kind: RecognizerKind, pattern: &str, extract: Extractor) -> Result<Self, regex::Error> {
        Ok(Self {
            kind,
            regex: Regex::new(pattern)?,
            extract,
        })
    }

    pub fn kind(&self) -> RecognizerKind {
        self.kind
    }

    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }

    fn recognize(&self, line: &str) -> Option<Marker> {
        self.regex
            .captures(line)
            .and_then(|caps| (self.extract)(&caps))
    }
}

impl fmt::Debug for Recognizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recognizer")
            .field("kind", &self.kind)
            .field("pattern", &self.pattern())
            .finish()
    }
}

fn name_at(caps: &Captures<'_>, index: usize) -> Option<String> {
    caps.get(index).map(|m| m.as_str().to_string())
}

fn count_at(caps: &Captures<'_>, index: usize) -> Option<u32> {
    caps.get(index)?.as_str().parse().ok()
}

/// Ordered, first-match-wins recognizer table.
#[derive(Debug, Clone)]
pub struct PatternTable {
    recognizers: Vec<Recognizer>,
}

impl PatternTable {
    /// The process-wide table for the standard Unity console.
    pub fn standard() -> &'static PatternTable {
        &STANDARD_TABLE
    }

    /// Build the standard table with a different crash marker. The marker is
    /// matched literally anywhere in the line.
    pub fn with_reboot_marker(marker: &str) -> Result<Self, regex::Error> {
        let recognizers = vec![
            Recognizer::new(RecognizerKind::Reboot, &regex::escape(marker), |_| {
                Some(Marker::Reboot)
            })?,
            Recognizer::new(RecognizerKind::TestStart, START_PATTERN, |caps| {
                Some(Marker::TestStarted {
                    name: name_at(caps, 1)?,
                })
            })?,
            Recognizer::new(RecognizerKind::TestPass, PASS_PATTERN, |caps| {
                Some(Marker::TestPassed {
                    name: name_at(caps, 1)?,
                })
            })?,
            Recognizer::new(RecognizerKind::TestFail, FAIL_PATTERN, |caps| {
                Some(Marker::TestFailed {
                    name: name_at(caps, 1)?,
                })
            })?,
            Recognizer::new(RecognizerKind::RunFinish, FINISH_PATTERN, |caps| {
                Some(Marker::RunFinished {
                    tests: count_at(caps, 1)?,
                    failures: count_at(caps, 2)?,
                    ignored: count_at(caps, 3)?,
                })
            })?,
        ];
        Ok(Self { recognizers })
    }

    /// The recognizers in the order they are tried.
    pub fn recognizers(&self) -> &[Recognizer] {
        &self.recognizers
    }

    /// Classify a line. Returns the first recognizer that matched and the
    /// marker it produced, or `None` for uninteresting lines.
    pub fn classify(&self, line: &str) -> Option<(RecognizerKind, Marker)> {
        self.recognizers
            .iter()
            .find_map(|r| r.recognize(line).map(|marker| (r.kind, marker)))
    }
}

impl Default for PatternTable {
    fn default() -> Self {
        Self::standard().clone()
    }
}

/// Whether `line` is the menu banner that precedes the test list.
pub fn is_banner(line: &str) -> bool {
    line.contains(BANNER)
}
