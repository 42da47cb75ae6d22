//! Transport abstraction layer.
//!
//! Provides one trait over the three ways a device console can be reached
//! (serial port, telnet session, child process stdout) plus a scripted
//! implementation for tests.

pub mod error;
pub mod mock;
pub mod process;
pub mod select;
pub mod serial;
pub mod telnet;
pub mod traits;

pub use error::{TransportError, TransportOpenError};
pub use mock::{ScriptedTransport, Step};
pub use process::{ProcessSettings, ProcessTransport};
pub use select::{open_kind, open_transport, TransportChoice, TransportSettings};
pub use serial::{SerialSettings, SerialTransport};
pub use telnet::{TelnetSettings, TelnetTransport};
pub use traits::{Framing, ReadOutcome, Transport, TransportKind};
