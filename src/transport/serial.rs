//! Serial device transport.
//!
//! Wraps the `serialport` crate's `SerialPort` trait with our `Transport`
//! trait. The device is opened at a fixed baud rate, 8N1, with a short read
//! timeout so the line reader can poll cooperatively.

use super::error::{TransportError, TransportOpenError};
use super::traits::{ReadOutcome, Transport, TransportKind};
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

/// Parameters for opening a serial device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialSettings {
    /// Baud rate (bits per second).
    pub baud_rate: u32,
    /// Bound on a single read.
    pub read_timeout: Duration,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            read_timeout: Duration::from_millis(50),
        }
    }
}

/// Serial transport wrapping `serialport::SerialPort`.
pub struct SerialTransport {
    /// The underlying port; `None` once closed.
    port: Option<Box<dyn serialport::SerialPort>>,
    /// The port name/path for identification.
    name: String,
    settings: SerialSettings,
}

impl SerialTransport {
    /// Open a serial device.
    ///
    /// # Arguments
    /// * `port_name` - The system path to the serial port (e.g., "/dev/ttyUSB0" or "COM3")
    /// * `settings` - Baud rate and read timeout
    ///
    /// # Example
    /// ```no_run
    /// use hil_monitor::transport::{SerialSettings, SerialTransport};
    ///
    /// let port = SerialTransport::open("/dev/ttyUSB0", SerialSettings::default())?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn open(port_name: &str, settings: SerialSettings) -> Result<Self, TransportOpenError> {
        let port = serialport::new(port_name, settings.baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .flow_control(serialport::FlowControl::None)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .timeout(settings.read_timeout)
            .open()
            .map_err(|source| TransportOpenError::Serial {
                port: port_name.to_string(),
                source,
            })?;

        Ok(Self {
            port: Some(port),
            name: port_name.to_string(),
            settings,
        })
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn serialport::SerialPort>, TransportError> {
        self.port.as_mut().ok_or(TransportError::Closed)
    }
}

impl Transport for SerialTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Serial
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn read_bytes(&mut self, max: usize) -> Result<ReadOutcome, TransportError> {
        let mut buffer = vec![0u8; max.max(1)];
        match self.port_mut()?.read(&mut buffer) {
            Ok(0) => Ok(ReadOutcome::Timeout),
            Ok(n) => {
                buffer.truncate(n);
                Ok(ReadOutcome::Data(buffer))
            }
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                Ok(ReadOutcome::Timeout)
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => Ok(ReadOutcome::Timeout),
            Err(e) => Err(TransportError::Io(e)),
        }
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let timeout = self.settings.read_timeout;
        let port = self.port_mut()?;
        port.write_all(data).map_err(|e| match e.kind() {
            ErrorKind::TimedOut => TransportError::WriteTimeout(timeout),
            _ => TransportError::Io(e),
        })?;
        port.flush()?;
        Ok(data.len())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        // Dropping the handle closes the device.
        self.port.take();
        Ok(())
    }
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("name", &self.name)
            .field("baud_rate", &self.settings.baud_rate)
            .field("open", &self.port.is_some())
            .finish()
    }
}
