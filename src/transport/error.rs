//! Transport-specific error types.
//!
//! Opening a transport and using one fail in different ways: an open failure
//! only means "try the next kind of source", while an I/O failure during a
//! run is fatal to that run.

use std::time::Duration;
use thiserror::Error;

use super::traits::TransportKind;

/// Errors raised while a transport is in use.
#[derive(Debug, Error)]
pub enum TransportError {
    /// An I/O error occurred while reading or writing.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A serialport-specific error occurred.
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The remote end closed the connection mid-run.
    #[error("Connection closed by {0}")]
    Disconnected(String),

    /// A write did not complete within the configured timeout.
    #[error("Write timed out after {0:?}")]
    WriteTimeout(Duration),

    /// The transport only carries data from the device.
    #[error("{0} transport does not accept writes")]
    WriteUnsupported(TransportKind),

    /// Attempted to use a transport after `close()`.
    #[error("Transport is closed")]
    Closed,
}

impl TransportError {
    /// Create a Disconnected error naming the peer.
    pub fn disconnected(peer: impl Into<String>) -> Self {
        Self::Disconnected(peer.into())
    }
}

/// Errors raised while establishing a transport.
#[derive(Debug, Error)]
pub enum TransportOpenError {
    /// The identifier does not name a source of this kind.
    #[error("'{source_id}' is not a valid {kind} source: {reason}")]
    NotApplicable {
        kind: TransportKind,
        source_id: String,
        reason: String,
    },

    /// The serial device could not be opened.
    #[error("Failed to open serial port '{port}': {source}")]
    Serial {
        port: String,
        #[source]
        source: serialport::Error,
    },

    /// The telnet session could not be connected.
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The child process could not be launched.
    #[error("Failed to launch '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The child process exited before it produced any output.
    #[error("'{command}' exited during start-up with {status}")]
    ExitedEarly { command: String, status: String },
}

impl TransportOpenError {
    /// Create a NotApplicable error.
    pub fn not_applicable(
        kind: TransportKind,
        source_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::NotApplicable {
            kind,
            source_id: source_id.into(),
            reason: reason.into(),
        }
    }
}
