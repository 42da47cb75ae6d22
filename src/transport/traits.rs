//! Core trait for device transports.
//!
//! Defines the `Transport` trait that lets the serial, telnet and process
//! sources (and the scripted test transport) be driven interchangeably.

use super::error::TransportError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of source a transport reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Serial,
    Telnet,
    Process,
    Scripted,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Serial => "serial",
            Self::Telnet => "telnet",
            Self::Process => "process",
            Self::Scripted => "scripted",
        };
        f.write_str(name)
    }
}

/// How a transport delivers its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Bytes arrive individually and must be assembled into lines.
    Bytes,
    /// The transport buffers whole lines and hands them out via `read_until`.
    Lines,
}

/// Result of a single bounded read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Some bytes arrived.
    Data(Vec<u8>),
    /// Nothing arrived within the read timeout; try again.
    Timeout,
    /// The source has no more data and never will.
    Eof,
}

/// Trait for device transport I/O.
///
/// Every read returns within the transport's configured timeout. A timeout
/// is ordinary flow and is reported as `ReadOutcome::Timeout`, never as an
/// error.
pub trait Transport: Send + fmt::Debug {
    /// The kind of source behind this transport.
    fn kind(&self) -> TransportKind;

    /// Identifier of the source (port path, address or command line).
    fn name(&self) -> &str;

    /// Read up to `max` bytes, waiting at most the configured read timeout.
    fn read_bytes(&mut self, max: usize) -> Result<ReadOutcome, TransportError>;

    /// Read until `terminator` is seen, waiting at most the configured read
    /// timeout. The returned data includes the terminator.
    ///
    /// The default implementation assembles the line from `read_bytes` and
    /// gives up (discarding nothing) on the first timeout; line-oriented
    /// transports override it.
    fn read_until(&mut self, terminator: u8) -> Result<ReadOutcome, TransportError> {
        let mut line = Vec::new();
        loop {
            match self.read_bytes(1)? {
                ReadOutcome::Data(bytes) => {
                    line.extend_from_slice(&bytes);
                    if bytes.contains(&terminator) {
                        return Ok(ReadOutcome::Data(line));
                    }
                }
                ReadOutcome::Timeout if line.is_empty() => return Ok(ReadOutcome::Timeout),
                ReadOutcome::Eof if line.is_empty() => return Ok(ReadOutcome::Eof),
                ReadOutcome::Timeout | ReadOutcome::Eof => return Ok(ReadOutcome::Data(line)),
            }
        }
    }

    /// Write bytes to the device.
    ///
    /// Returns the number of bytes actually written.
    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, TransportError>;

    /// Release the underlying OS resources. Calling it again is a no-op.
    fn close(&mut self) -> Result<(), TransportError>;

    /// Whether commands can be sent to the device over this transport.
    fn is_bidirectional(&self) -> bool {
        true
    }

    /// How this transport delivers data to the line reader.
    fn framing(&self) -> Framing {
        Framing::Bytes
    }
}
