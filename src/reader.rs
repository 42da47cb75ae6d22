//! Line assembly over any transport.
//!
//! The serial and process transports hand out bytes; the telnet transport
//! hands out whole lines. `LineReader` hides the difference: every call to
//! [`LineReader::next_line`] performs at most one bounded read cycle and
//! returns a line, an idle marker or the end of the stream.

use crate::transport::{Framing, ReadOutcome, Transport, TransportError};
use std::fmt;
use std::io::Write;
use thiserror::Error;
use tracing::warn;

/// Lines longer than this are emitted without waiting for a terminator.
pub const MAX_LINE_LEN: usize = 4096;

const READ_CHUNK: usize = 256;

/// What one call to [`LineReader::next_line`] produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    /// A complete line with its terminator removed.
    Line(String),
    /// Nothing complete arrived within the read bound (or a line was
    /// dropped as undecodable). Try again.
    Idle,
    /// The stream has ended for good.
    Closed,
}

/// A completed line that was not valid text.
#[derive(Debug, Error)]
#[error("dropped undecodable line from {source_name} ({len} bytes): {cause}")]
pub struct DecodeError {
    pub source_name: String,
    pub len: usize,
    #[source]
    pub cause: std::str::Utf8Error,
}

/// Turns a transport's output into logical lines.
pub struct LineReader {
    transport: Box<dyn Transport>,
    /// Accepted in addition to `\n`.
    terminator: Option<u8>,
    /// Bytes of a line not yet terminated.
    pending: Vec<u8>,
    decode_errors: u64,
    closed: bool,
    /// Receives every completed line as raw bytes.
    capture: Option<Box<dyn Write + Send>>,
}

impl LineReader {
    /// Wrap a transport. `terminator` is an extra line terminator accepted
    /// alongside `\n`; the Unity console ends lines with `\r`.
    pub fn new(transport: Box<dyn Transport>, terminator: Option<u8>) -> Self {
        Self {
            transport,
            terminator: terminator.filter(|&t| t != b'\n'),
            pending: Vec::new(),
            decode_errors: 0,
            closed: false,
            capture: None,
        }
    }

    /// Copy every completed line, decodable or not, to `sink`.
    pub fn set_capture(&mut self, sink: Box<dyn Write + Send>) {
        self.capture = Some(sink);
    }

    /// Produce the next line, `Idle` on timeout, or `Closed` at end of
    /// stream. Errors are fatal transport failures only.
    pub fn next_line(&mut self) -> Result<LineEvent, TransportError> {
        if self.closed {
            return Ok(LineEvent::Closed);
        }
        match self.transport.framing() {
            Framing::Bytes => self.next_from_bytes(),
            Framing::Lines => self.next_from_lines(),
        }
    }

    fn next_from_bytes(&mut self) -> Result<LineEvent, TransportError> {
        loop {
            if let Some(pos) = self.find_terminator() {
                let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
                line.pop();
                return Ok(self.decode(line));
            }
            if self.pending.len() >= MAX_LINE_LEN {
                let cut = overflow_cut(&self.pending);
                let line: Vec<u8> = self.pending.drain(..cut).collect();
                return Ok(self.decode(line));
            }
            match self.transport.read_bytes(READ_CHUNK)? {
                ReadOutcome::Data(bytes) => self.pending.extend_from_slice(&bytes),
                // Partial data stays buffered until the rest arrives.
                ReadOutcome::Timeout => return Ok(LineEvent::Idle),
                ReadOutcome::Eof => {
                    self.closed = true;
                    if self.pending.is_empty() {
                        return Ok(LineEvent::Closed);
                    }
                    let line = std::mem::take(&mut self.pending);
                    return Ok(self.decode(line));
                }
            }
        }
    }

    fn next_from_lines(&mut self) -> Result<LineEvent, TransportError> {
        let terminator = self.terminator.unwrap_or(b'\n');
        match self.transport.read_until(terminator)? {
            ReadOutcome::Data(mut line) => {
                while line.last() == Some(&terminator) {
                    line.pop();
                }
                // Mixed `\r\n` endings leave the `\n` at the front of the next line.
                let start = line.iter().take_while(|&&b| b == b'\n').count();
                line.drain(..start);
                Ok(self.decode(line))
            }
            ReadOutcome::Timeout => Ok(LineEvent::Idle),
            ReadOutcome::Eof => {
                self.closed = true;
                Ok(LineEvent::Closed)
            }
        }
    }

    fn find_terminator(&self) -> Option<usize> {
        match self.terminator {
            Some(t) => memchr::memchr2(b'\n', t, &self.pending),
            None => memchr::memchr(b'\n', &self.pending),
        }
    }

    fn decode(&mut self, mut line: Vec<u8>) -> LineEvent {
        if self.terminator.is_none() && line.last() == Some(&b'\r') {
            line.pop();
        }
        self.capture(&line);
        match String::from_utf8(line) {
            Ok(text) => LineEvent::Line(text),
            Err(e) => {
                let err = DecodeError {
                    source_name: self.transport.name().to_string(),
                    len: e.as_bytes().len(),
                    cause: e.utf8_error(),
                };
                self.decode_errors += 1;
                warn!("{} (the device may have crashed)", err);
                LineEvent::Idle
            }
        }
    }

    fn capture(&mut self, line: &[u8]) {
        let Some(sink) = self.capture.as_mut() else {
            return;
        };
        let result = sink
            .write_all(line)
            .and_then(|_| sink.write_all(b"\n"))
            .and_then(|_| sink.flush());
        if let Err(e) = result {
            warn!("Stopping console capture after write failure: {}", e);
            self.capture = None;
        }
    }

    /// Number of lines dropped because they were not valid UTF-8.
    pub fn decode_errors(&self) -> u64 {
        self.decode_errors
    }

    /// Whether the stream has reported its end.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// The transport being read.
    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Mutable access to the transport, for writing commands.
    pub fn transport_mut(&mut self) -> &mut dyn Transport {
        self.transport.as_mut()
    }

    /// Give the transport back.
    pub fn into_inner(self) -> Box<dyn Transport> {
        self.transport
    }
}

impl fmt::Debug for LineReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LineReader")
            .field("transport", &self.transport)
            .field("terminator", &self.terminator)
            .field("pending", &self.pending.len())
            .field("decode_errors", &self.decode_errors)
            .field("closed", &self.closed)
            .field("capturing", &self.capture.is_some())
            .finish()
    }
}

/// Where to split an over-long line: at `MAX_LINE_LEN`, or earlier if that
/// would cut a UTF-8 sequence in half.
fn overflow_cut(pending: &[u8]) -> usize {
    let cut = MAX_LINE_LEN.min(pending.len());
    match std::str::from_utf8(&pending[..cut]) {
        Err(e) if e.error_len().is_none() && e.valid_up_to() > 0 => e.valid_up_to(),
        _ => cut,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ScriptedTransport;
    use pretty_assertions::assert_eq;

    fn line(text: &str) -> LineEvent {
        LineEvent::Line(text.to_string())
    }

    fn reader(transport: ScriptedTransport) -> LineReader {
        LineReader::new(Box::new(transport), Some(b'\r'))
    }

    #[test]
    fn test_splits_on_newline_and_alternate_terminator() {
        let mut transport = ScriptedTransport::new("SCRIPT0");
        transport.push_text("alpha\rbeta\ngamma\r");
        let mut reader = reader(transport);

        assert_eq!(reader.next_line().unwrap(), line("alpha"));
        assert_eq!(reader.next_line().unwrap(), line("beta"));
        assert_eq!(reader.next_line().unwrap(), line("gamma"));
        assert_eq!(reader.next_line().unwrap(), LineEvent::Closed);
        assert_eq!(reader.next_line().unwrap(), LineEvent::Closed);
    }

    #[test]
    fn test_crlf_yields_empty_line_between() {
        let mut transport = ScriptedTransport::new("SCRIPT0");
        transport.push_text("one\r\ntwo\r\n");
        let mut reader = reader(transport);

        assert_eq!(reader.next_line().unwrap(), line("one"));
        assert_eq!(reader.next_line().unwrap(), line(""));
        assert_eq!(reader.next_line().unwrap(), line("two"));
    }

    #[test]
    fn test_partial_line_survives_timeout() {
        let mut transport = ScriptedTransport::new("SCRIPT0");
        transport.push_text("Running conn");
        transport.push_timeout();
        transport.push_text("ect...\r");
        let mut reader = reader(transport);

        assert_eq!(reader.next_line().unwrap(), LineEvent::Idle);
        assert_eq!(reader.next_line().unwrap(), line("Running connect..."));
    }

    #[test]
    fn test_eof_flushes_unterminated_line() {
        let mut transport = ScriptedTransport::new("SCRIPT0");
        transport.push_text("1 Tests 0 Failures 0 Ignored");
        let mut reader = reader(transport);

        assert_eq!(reader.next_line().unwrap(), line("1 Tests 0 Failures 0 Ignored"));
        assert_eq!(reader.next_line().unwrap(), LineEvent::Closed);
        assert!(reader.is_closed());
    }

    #[test]
    fn test_undecodable_line_is_dropped_not_fatal() {
        let mut transport = ScriptedTransport::new("SCRIPT0");
        transport.push_bytes(b"gar\xffbage\rnext\r");
        let mut reader = reader(transport);

        assert_eq!(reader.next_line().unwrap(), LineEvent::Idle);
        assert_eq!(reader.decode_errors(), 1);
        assert_eq!(reader.next_line().unwrap(), line("next"));
    }

    #[test]
    fn test_line_framing_strips_terminator_and_stray_newline() {
        let mut transport = ScriptedTransport::new("TELNET").line_framed();
        transport.push_text("banner\r\nx.c:10:testFoo:PASS\r");
        let mut reader = reader(transport);

        assert_eq!(reader.next_line().unwrap(), line("banner"));
        assert_eq!(reader.next_line().unwrap(), line("x.c:10:testFoo:PASS"));
        assert_eq!(reader.next_line().unwrap(), LineEvent::Closed);
    }

    #[test]
    fn test_overlong_line_is_emitted() {
        let mut transport = ScriptedTransport::new("SCRIPT0");
        transport.push_bytes(&vec![b'a'; MAX_LINE_LEN + 10]);
        transport.push_timeout();
        let mut reader = reader(transport);

        match reader.next_line().unwrap() {
            LineEvent::Line(text) => assert!(text.len() >= MAX_LINE_LEN),
            other => panic!("expected a line, got {:?}", other),
        }
    }

    #[test]
    fn test_overlong_line_is_split_on_char_boundary() {
        let mut bytes = vec![b'a'; MAX_LINE_LEN - 1];
        bytes.extend_from_slice("\u{e9}tail\r".as_bytes());
        let mut transport = ScriptedTransport::new("SCRIPT0");
        transport.push_bytes(&bytes);
        let mut reader = reader(transport);

        assert_eq!(
            reader.next_line().unwrap(),
            LineEvent::Line("a".repeat(MAX_LINE_LEN - 1))
        );
        assert_eq!(reader.next_line().unwrap(), line("\u{e9}tail"));
        assert_eq!(reader.decode_errors(), 0);
    }

    #[test]
    fn test_capture_keeps_undecodable_lines() {
        #[derive(Clone, Default)]
        struct Sink(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

        impl Write for Sink {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }

            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let mut transport = ScriptedTransport::new("SCRIPT0");
        transport.push_bytes(b"gar\xffbage\rnext\r");
        let sink = Sink::default();
        let mut reader = reader(transport);
        reader.set_capture(Box::new(sink.clone()));

        assert_eq!(reader.next_line().unwrap(), LineEvent::Idle);
        assert_eq!(reader.next_line().unwrap(), line("next"));
        assert_eq!(sink.0.lock().unwrap().as_slice(), b"gar\xffbage\nnext\n");
    }

    #[test]
    fn test_transport_errors_propagate() {
        let mut transport = ScriptedTransport::new("SCRIPT0");
        transport.push_failure(std::io::ErrorKind::ConnectionReset);
        let mut reader = reader(transport);

        assert!(matches!(reader.next_line(), Err(TransportError::Io(_))));
    }

    #[test]
    fn test_without_alternate_terminator_trailing_cr_is_trimmed() {
        let mut transport = ScriptedTransport::new("SCRIPT0");
        transport.push_text("x.c:1:t:PASS\r\n");
        let mut reader = LineReader::new(Box::new(transport), None);

        assert_eq!(reader.next_line().unwrap(), line("x.c:1:t:PASS"));
    }
}
