//! Telnet session transport.
//!
//! Used for targets whose console is exposed through a debug-probe server
//! (e.g. a J-Link RTT telnet port on localhost). The session is line oriented:
//! data is buffered until a terminator arrives, with a coarse read timeout.
//! Option negotiation is refused, as a plain telnet client would.

use super::error::{TransportError, TransportOpenError};
use super::traits::{Framing, ReadOutcome, Transport, TransportKind};
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};
use tracing::debug;

// Telnet protocol constants
const IAC: u8 = 255;
const DONT: u8 = 254;
const DO: u8 = 253;
const WONT: u8 = 252;
const WILL: u8 = 251;
const SB: u8 = 250;
const SE: u8 = 240;

/// Parameters for opening a telnet session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelnetSettings {
    /// Host to connect to.
    pub host: String,
    /// Bound on establishing the TCP connection.
    pub connect_timeout: Duration,
    /// Bound on a single `read_until`.
    pub read_timeout: Duration,
}

impl Default for TelnetSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            connect_timeout: Duration::from_secs(1),
            read_timeout: Duration::from_secs(1),
        }
    }
}

/// Telnet transport over a blocking TCP stream.
pub struct TelnetTransport {
    stream: Option<TcpStream>,
    name: String,
    settings: TelnetSettings,
    /// Decoded payload not yet handed out.
    pending: Vec<u8>,
    /// Raw bytes ending in an incomplete command sequence.
    carry: Vec<u8>,
    /// The peer closed the connection; reported once `pending` drains.
    remote_closed: bool,
}

impl TelnetTransport {
    /// Connect to `settings.host` on the given TCP port.
    pub fn open(port: u16, settings: TelnetSettings) -> Result<Self, TransportOpenError> {
        let name = format!("{}:{}", settings.host, port);
        let connect_err = |source| TransportOpenError::Connect {
            addr: name.clone(),
            source,
        };

        let addrs = (settings.host.as_str(), port)
            .to_socket_addrs()
            .map_err(connect_err)?;

        let mut last_error =
            std::io::Error::new(ErrorKind::AddrNotAvailable, "host resolved to no addresses");
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, settings.connect_timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true).map_err(connect_err)?;
                    stream
                        .set_read_timeout(Some(settings.read_timeout))
                        .map_err(connect_err)?;
                    debug!("Telnet session established with {}", addr);
                    return Ok(Self {
                        stream: Some(stream),
                        name: name.clone(),
                        settings,
                        pending: Vec::new(),
                        carry: Vec::new(),
                        remote_closed: false,
                    });
                }
                Err(e) => last_error = e,
            }
        }

        Err(connect_err(last_error))
    }

    /// Pull one chunk from the socket into `pending`, waiting at most `wait`.
    ///
    /// Returns `false` if nothing arrived in time.
    fn fill(&mut self, wait: Duration) -> Result<bool, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
        stream.set_read_timeout(Some(wait.max(Duration::from_millis(1))))?;

        let mut chunk = [0u8; 512];
        match stream.read(&mut chunk) {
            Ok(0) => {
                self.remote_closed = true;
                Ok(false)
            }
            Ok(n) => {
                let mut raw = std::mem::take(&mut self.carry);
                raw.extend_from_slice(&chunk[..n]);
                let replies = self.decode(&raw);
                if !replies.is_empty() {
                    if let Some(stream) = self.stream.as_mut() {
                        stream.write_all(&replies)?;
                    }
                }
                Ok(true)
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => Ok(false),
            Err(e) if e.kind() == ErrorKind::Interrupted => Ok(false),
            Err(e) => Err(TransportError::Io(e)),
        }
    }

    /// Strip command sequences from `raw` into `pending`, returning the
    /// refusals to send back for any option requests.
    fn decode(&mut self, raw: &[u8]) -> Vec<u8> {
        let mut replies = Vec::new();
        let mut i = 0;
        while i < raw.len() {
            if raw[i] != IAC {
                let end = memchr::memchr(IAC, &raw[i..]).map_or(raw.len(), |p| i + p);
                self.pending.extend_from_slice(&raw[i..end]);
                i = end;
                continue;
            }
            let Some(&command) = raw.get(i + 1) else {
                self.carry.extend_from_slice(&raw[i..]);
                break;
            };
            match command {
                IAC => {
                    self.pending.push(IAC);
                    i += 2;
                }
                DO | DONT | WILL | WONT => {
                    let Some(&option) = raw.get(i + 2) else {
                        self.carry.extend_from_slice(&raw[i..]);
                        break;
                    };
                    match command {
                        DO => replies.extend_from_slice(&[IAC, WONT, option]),
                        WILL => replies.extend_from_slice(&[IAC, DONT, option]),
                        _ => {}
                    }
                    i += 3;
                }
                SB => {
                    let end = raw[i + 2..]
                        .windows(2)
                        .position(|w| w == [IAC, SE])
                        .map(|p| i + 2 + p + 2);
                    match end {
                        Some(end) => i = end,
                        None => {
                            self.carry.extend_from_slice(&raw[i..]);
                            break;
                        }
                    }
                }
                _ => i += 2,
            }
        }
        replies
    }

    fn take_pending(&mut self, len: usize) -> Vec<u8> {
        let rest = self.pending.split_off(len);
        std::mem::replace(&mut self.pending, rest)
    }

    fn closed_error(&self) -> TransportError {
        TransportError::disconnected(self.name.clone())
    }
}

impl Transport for TelnetTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Telnet
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn read_bytes(&mut self, max: usize) -> Result<ReadOutcome, TransportError> {
        if self.pending.is_empty() {
            if self.remote_closed {
                return Err(self.closed_error());
            }
            self.fill(self.settings.read_timeout)?;
            if self.pending.is_empty() {
                return Ok(ReadOutcome::Timeout);
            }
        }
        let len = self.pending.len().min(max.max(1));
        Ok(ReadOutcome::Data(self.take_pending(len)))
    }

    fn read_until(&mut self, terminator: u8) -> Result<ReadOutcome, TransportError> {
        let deadline = Instant::now() + self.settings.read_timeout;
        loop {
            if let Some(pos) = memchr::memchr(terminator, &self.pending) {
                return Ok(ReadOutcome::Data(self.take_pending(pos + 1)));
            }
            if self.remote_closed {
                // Hand out what is left before reporting the close.
                if self.pending.is_empty() {
                    return Err(self.closed_error());
                }
                let len = self.pending.len();
                return Ok(ReadOutcome::Data(self.take_pending(len)));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                // Partial lines stay buffered for the next call.
                return Ok(ReadOutcome::Timeout);
            }
            self.fill(remaining)?;
        }
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
        let mut escaped = Vec::with_capacity(data.len());
        for &byte in data {
            if byte == IAC {
                escaped.push(IAC);
            }
            escaped.push(byte);
        }
        stream.write_all(&escaped)?;
        stream.flush()?;
        Ok(data.len())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if let Some(stream) = self.stream.take() {
            match stream.shutdown(Shutdown::Both) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotConnected => {}
                Err(e) => return Err(TransportError::Io(e)),
            }
        }
        Ok(())
    }

    fn framing(&self) -> Framing {
        Framing::Lines
    }
}

impl std::fmt::Debug for TelnetTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelnetTransport")
            .field("name", &self.name)
            .field("pending", &self.pending.len())
            .field("open", &self.stream.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    fn quick_settings() -> TelnetSettings {
        TelnetSettings {
            read_timeout: Duration::from_millis(200),
            ..TelnetSettings::default()
        }
    }

    fn serve(payload: &'static [u8]) -> (u16, thread::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            socket.write_all(payload).unwrap();
            socket
                .set_read_timeout(Some(Duration::from_millis(300)))
                .unwrap();
            let mut received = Vec::new();
            let mut buf = [0u8; 64];
            while let Ok(n) = socket.read(&mut buf) {
                if n == 0 {
                    break;
                }
                received.extend_from_slice(&buf[..n]);
            }
            received
        });
        (port, handle)
    }

    #[test]
    fn test_read_until_splits_lines() {
        let (port, server) = serve(b"first\rsecond\r");
        let settings = TelnetSettings {
            host: "127.0.0.1".to_string(),
            ..quick_settings()
        };
        let mut transport = TelnetTransport::open(port, settings).unwrap();

        assert_eq!(
            transport.read_until(b'\r').unwrap(),
            ReadOutcome::Data(b"first\r".to_vec())
        );
        assert_eq!(
            transport.read_until(b'\r').unwrap(),
            ReadOutcome::Data(b"second\r".to_vec())
        );
        transport.close().unwrap();
        server.join().unwrap();
    }

    #[test]
    fn test_option_requests_are_refused_and_stripped() {
        let (port, server) = serve(&[IAC, DO, 1, b'o', b'k', b'\n']);
        let settings = TelnetSettings {
            host: "127.0.0.1".to_string(),
            ..quick_settings()
        };
        let mut transport = TelnetTransport::open(port, settings).unwrap();

        assert_eq!(
            transport.read_until(b'\n').unwrap(),
            ReadOutcome::Data(b"ok\n".to_vec())
        );
        transport.close().unwrap();
        assert_eq!(server.join().unwrap(), vec![IAC, WONT, 1]);
    }

    #[test]
    fn test_remote_close_is_fatal() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (socket, _) = listener.accept().unwrap();
            drop(socket);
        });
        let settings = TelnetSettings {
            host: "127.0.0.1".to_string(),
            ..quick_settings()
        };
        let mut transport = TelnetTransport::open(port, settings).unwrap();
        server.join().unwrap();

        let result = transport.read_until(b'\r');
        assert!(matches!(result, Err(TransportError::Disconnected(_))));
    }

    #[test]
    fn test_close_is_idempotent() {
        let (port, server) = serve(b"");
        let settings = TelnetSettings {
            host: "127.0.0.1".to_string(),
            ..quick_settings()
        };
        let mut transport = TelnetTransport::open(port, settings).unwrap();
        transport.close().unwrap();
        transport.close().unwrap();
        assert!(matches!(
            transport.write_bytes(b"*\r\n"),
            Err(TransportError::Closed)
        ));
        server.join().unwrap();
    }
}
