//! Scripted transport for testing.
//!
//! Provides a `ScriptedTransport` that replays a fixed sequence of reads
//! without requiring a device. Supports interleaved timeouts, injected I/O
//! failures and inspection of everything written.

use super::error::TransportError;
use super::traits::{Framing, ReadOutcome, Transport, TransportKind};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

/// One scripted read result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Bytes handed out by subsequent reads.
    Data(Vec<u8>),
    /// One read that times out.
    Timeout,
    /// One read that fails with an I/O error.
    Fail(std::io::ErrorKind),
}

/// Inner state, shared between clones so a test can keep a handle after
/// giving the transport away.
#[derive(Debug, Default)]
struct ScriptState {
    steps: VecDeque<Step>,
    write_log: Vec<Vec<u8>>,
    fail_writes: bool,
    close_calls: usize,
}

/// Transport that replays a script.
///
/// # Example
/// ```
/// use hil_monitor::transport::{ReadOutcome, ScriptedTransport, Transport};
///
/// let mut transport = ScriptedTransport::new("SCRIPT0");
/// transport.push_text("Hello\n");
/// transport.push_timeout();
///
/// assert_eq!(transport.read_bytes(16).unwrap(), ReadOutcome::Data(b"Hello\n".to_vec()));
/// assert_eq!(transport.read_bytes(16).unwrap(), ReadOutcome::Timeout);
/// assert_eq!(transport.read_bytes(16).unwrap(), ReadOutcome::Eof);
/// ```
#[derive(Debug, Clone)]
pub struct ScriptedTransport {
    name: String,
    state: Arc<Mutex<ScriptState>>,
    bidirectional: bool,
    framing: Framing,
    /// Keep timing out instead of reporting EOF once the script runs dry.
    hold_open: bool,
}

impl ScriptedTransport {
    /// Create an empty bidirectional, byte-framed script.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(ScriptState::default())),
            bidirectional: true,
            framing: Framing::Bytes,
            hold_open: false,
        }
    }

    /// Behave like a process pipe: no writes accepted.
    #[must_use]
    pub fn one_directional(mut self) -> Self {
        self.bidirectional = false;
        self
    }

    /// Behave like a telnet session that hands out whole lines.
    #[must_use]
    pub fn line_framed(mut self) -> Self {
        self.framing = Framing::Lines;
        self
    }

    /// Time out forever once the script is exhausted, like a quiet serial port.
    #[must_use]
    pub fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    fn state(&self) -> MutexGuard<'_, ScriptState> {
        // A panic in another test thread must not hide this test's results.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append raw bytes to the script.
    pub fn push_bytes(&mut self, data: &[u8]) {
        self.state().steps.push_back(Step::Data(data.to_vec()));
    }

    /// Append text to the script.
    pub fn push_text(&mut self, text: &str) {
        self.push_bytes(text.as_bytes());
    }

    /// Append one line terminated by `\r\n`, as the Unity console emits.
    pub fn push_line(&mut self, line: &str) {
        self.push_text(&format!("{line}\r\n"));
    }

    /// Append a read that times out.
    pub fn push_timeout(&mut self) {
        self.state().steps.push_back(Step::Timeout);
    }

    /// Append a read that fails.
    pub fn push_failure(&mut self, kind: std::io::ErrorKind) {
        self.state().steps.push_back(Step::Fail(kind));
    }

    /// Make every subsequent write fail.
    pub fn fail_writes(&mut self) {
        self.state().fail_writes = true;
    }

    /// Get a copy of all data written.
    pub fn write_log(&self) -> Vec<Vec<u8>> {
        self.state().write_log.clone()
    }

    /// Number of times `close()` was called.
    pub fn close_calls(&self) -> usize {
        self.state().close_calls
    }

    /// Number of script steps not yet consumed.
    pub fn remaining_steps(&self) -> usize {
        self.state().steps.len()
    }
}

impl Transport for ScriptedTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Scripted
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn read_bytes(&mut self, max: usize) -> Result<ReadOutcome, TransportError> {
        let hold_open = self.hold_open;
        let mut state = self.state();
        if state.close_calls > 0 {
            return Err(TransportError::Closed);
        }
        match state.steps.pop_front() {
            Some(Step::Data(mut bytes)) => {
                let max = max.max(1);
                if bytes.len() > max {
                    let rest = bytes.split_off(max);
                    state.steps.push_front(Step::Data(rest));
                }
                Ok(ReadOutcome::Data(bytes))
            }
            Some(Step::Timeout) => Ok(ReadOutcome::Timeout),
            Some(Step::Fail(kind)) => Err(TransportError::Io(std::io::Error::new(
                kind,
                "scripted failure",
            ))),
            None if hold_open => Ok(ReadOutcome::Timeout),
            None => Ok(ReadOutcome::Eof),
        }
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        if !self.bidirectional {
            return Err(TransportError::WriteUnsupported(self.kind()));
        }
        let mut state = self.state();
        if state.fail_writes {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "scripted write failure",
            )));
        }
        state.write_log.push(data.to_vec());
        Ok(data.len())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.state().close_calls += 1;
        Ok(())
    }

    fn is_bidirectional(&self) -> bool {
        self.bidirectional
    }

    fn framing(&self) -> Framing {
        self.framing
    }
}
