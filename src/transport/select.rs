//! Transport selection.
//!
//! A source identifier is ambiguous: `COM3` is a serial port, `19021` is a
//! telnet port on the configured host, anything else is a command to run.
//! In auto mode each kind is tried once, in that order, and an open failure
//! simply moves on to the next kind.

use super::error::TransportOpenError;
use super::process::{ProcessSettings, ProcessTransport};
use super::serial::{SerialSettings, SerialTransport};
use super::telnet::{TelnetSettings, TelnetTransport};
use super::traits::{Transport, TransportKind};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Which kind of transport to open for a source identifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportChoice {
    /// Try serial, then telnet, then process.
    #[default]
    Auto,
    Serial,
    Telnet,
    Process,
}

/// Settings for every transport kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportSettings {
    pub serial: SerialSettings,
    pub telnet: TelnetSettings,
    pub process: ProcessSettings,
}

/// Open one transport of the given kind, making exactly one attempt.
pub fn open_kind(
    kind: TransportKind,
    source: &str,
    settings: &TransportSettings,
) -> Result<Box<dyn Transport>, TransportOpenError> {
    match kind {
        TransportKind::Serial => {
            let transport = SerialTransport::open(source, settings.serial)?;
            Ok(Box::new(transport))
        }
        TransportKind::Telnet => {
            let port: u16 = source.trim().parse().map_err(|_| {
                TransportOpenError::not_applicable(kind, source, "not a TCP port number")
            })?;
            let transport = TelnetTransport::open(port, settings.telnet.clone())?;
            Ok(Box::new(transport))
        }
        TransportKind::Process => {
            let transport = ProcessTransport::spawn(source, settings.process)?;
            Ok(Box::new(transport))
        }
        TransportKind::Scripted => Err(TransportOpenError::not_applicable(
            kind,
            source,
            "scripted transports are constructed directly",
        )),
    }
}

/// Open a transport for `source`, returning `None` if every candidate kind
/// failed.
pub fn open_transport(
    source: &str,
    choice: TransportChoice,
    settings: &TransportSettings,
) -> Option<Box<dyn Transport>> {
    for &kind in candidates(choice) {
        info!("Trying to open \"{}\" as a {} source...", source, kind);
        match open_kind(kind, source, settings) {
            Ok(transport) => {
                info!("Opened \"{}\" as a {} source.", source, kind);
                return Some(transport);
            }
            Err(e) => {
                debug!("{} open failed: {}", kind, e);
                info!("\"{}\" is not usable as a {} source.", source, kind);
            }
        }
    }
    None
}

fn candidates(choice: TransportChoice) -> &'static [TransportKind] {
    match choice {
        TransportChoice::Auto => &[
            TransportKind::Serial,
            TransportKind::Telnet,
            TransportKind::Process,
        ],
        TransportChoice::Serial => &[TransportKind::Serial],
        TransportChoice::Telnet => &[TransportKind::Telnet],
        TransportChoice::Process => &[TransportKind::Process],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_auto_tries_serial_then_telnet_then_process() {
        assert_eq!(
            candidates(TransportChoice::Auto),
            &[
                TransportKind::Serial,
                TransportKind::Telnet,
                TransportKind::Process
            ]
        );
        assert_eq!(candidates(TransportChoice::Telnet), &[TransportKind::Telnet]);
    }

    #[test]
    fn test_telnet_rejects_non_numeric_source() {
        let result = open_kind(TransportKind::Telnet, "COM3", &TransportSettings::default());
        assert!(matches!(
            result,
            Err(TransportOpenError::NotApplicable {
                kind: TransportKind::Telnet,
                ..
            })
        ));
    }

    #[test]
    fn test_explicit_choice_that_fails_yields_none() {
        let settings = TransportSettings {
            serial: SerialSettings {
                read_timeout: Duration::from_millis(10),
                ..SerialSettings::default()
            },
            ..TransportSettings::default()
        };
        assert!(open_transport("/dev/nonexistent_port_12345", TransportChoice::Serial, &settings).is_none());
    }
}
