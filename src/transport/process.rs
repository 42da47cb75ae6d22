//! Child-process transport.
//!
//! Launches a command (typically a simulator or a flashing tool that streams
//! the target's console) and reads its standard output. Pipe reads cannot be
//! bounded directly, so a pump thread forwards stdout chunks over a channel
//! and reads wait on `recv_timeout`. Standard error is drained into the debug
//! log so the child never stalls on a full pipe.

use super::error::{TransportError, TransportOpenError};
use super::traits::{ReadOutcome, Transport, TransportKind};
use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Parameters for launching a child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessSettings {
    /// How long to let the child run before checking it has not already exited.
    pub settle_time: Duration,
    /// Bound on a single read.
    pub read_timeout: Duration,
}

impl Default for ProcessSettings {
    fn default() -> Self {
        Self {
            settle_time: Duration::from_secs(5),
            read_timeout: Duration::from_millis(50),
        }
    }
}

/// Transport over the standard output of a spawned command.
pub struct ProcessTransport {
    child: Option<Child>,
    command: String,
    output: Receiver<Vec<u8>>,
    /// Bytes received but not yet handed out.
    pending: Vec<u8>,
    settings: ProcessSettings,
}

impl ProcessTransport {
    /// Launch `command_line` through the platform shell.
    pub fn spawn(command_line: &str, settings: ProcessSettings) -> Result<Self, TransportOpenError> {
        let mut command = shell_command(command_line);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let spawn_err = |source| TransportOpenError::Spawn {
            command: command_line.to_string(),
            source,
        };
        let mut child = command.spawn().map_err(spawn_err)?;

        let stdout = child.stdout.take().ok_or_else(|| {
            spawn_err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "standard output was not captured",
            ))
        })?;
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("process-stdout".to_string())
            .spawn(move || pump(stdout, tx))
            .map_err(spawn_err)?;

        if let Some(stderr) = child.stderr.take() {
            let label = command_line.to_string();
            thread::Builder::new()
                .name("process-stderr".to_string())
                .spawn(move || drain_stderr(stderr, &label))
                .map_err(spawn_err)?;
        }

        let mut pending = Vec::new();
        thread::sleep(settings.settle_time);
        match child.try_wait() {
            // A short test program may finish before the settle time is up;
            // it is only unusable if it printed nothing.
            Ok(Some(status)) => match rx.recv_timeout(settings.read_timeout) {
                Ok(chunk) => {
                    debug!("'{}' already exited with {}", command_line, status);
                    pending = chunk;
                }
                Err(_) => {
                    return Err(TransportOpenError::ExitedEarly {
                        command: command_line.to_string(),
                        status: status.to_string(),
                    });
                }
            },
            Ok(None) => {}
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(spawn_err(e));
            }
        }

        Ok(Self {
            child: Some(child),
            command: command_line.to_string(),
            output: rx,
            pending,
            settings,
        })
    }

    /// Kill the child and reap it. Safe to call more than once.
    pub fn terminate(&mut self) -> Result<(), TransportError> {
        if let Some(mut child) = self.child.take() {
            match child.kill() {
                Ok(()) => {}
                // Already exited on its own.
                Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => {}
                Err(e) => return Err(TransportError::Io(e)),
            }
            let status = child.wait()?;
            debug!("'{}' terminated with {}", self.command, status);
        }
        Ok(())
    }
}

fn shell_command(command_line: &str) -> Command {
    #[cfg(windows)]
    {
        let mut command = Command::new("cmd");
        command.args(["/C", command_line]);
        command
    }

    #[cfg(not(windows))]
    {
        let mut command = Command::new("sh");
        command.args(["-c", command_line]);
        command
    }
}

/// Log stderr line by line until EOF. Undecodable bytes are logged lossily
/// so the pipe stays drained.
fn drain_stderr(stderr: impl Read, label: &str) {
    let mut reader = BufReader::new(stderr);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&line);
                debug!("[{} stderr] {}", label, text.trim_end());
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!("Reading child stderr failed: {}", e);
                break;
            }
        }
    }
}

/// Forward stdout chunks until EOF. Dropping the sender signals EOF.
fn pump(mut stdout: impl Read, tx: mpsc::Sender<Vec<u8>>) {
    let mut chunk = [0u8; 1024];
    loop {
        match stdout.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(chunk[..n].to_vec()).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!("Reading child output failed: {}", e);
                break;
            }
        }
    }
}

impl Transport for ProcessTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Process
    }

    fn name(&self) -> &str {
        &self.command
    }

    fn read_bytes(&mut self, max: usize) -> Result<ReadOutcome, TransportError> {
        if self.pending.is_empty() {
            match self.output.recv_timeout(self.settings.read_timeout) {
                Ok(chunk) => self.pending = chunk,
                Err(RecvTimeoutError::Timeout) => return Ok(ReadOutcome::Timeout),
                Err(RecvTimeoutError::Disconnected) => return Ok(ReadOutcome::Eof),
            }
        }
        let len = self.pending.len().min(max.max(1));
        let rest = self.pending.split_off(len);
        Ok(ReadOutcome::Data(std::mem::replace(&mut self.pending, rest)))
    }

    fn write_bytes(&mut self, _data: &[u8]) -> Result<usize, TransportError> {
        Err(TransportError::WriteUnsupported(TransportKind::Process))
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.terminate()
    }

    fn is_bidirectional(&self) -> bool {
        false
    }
}

impl Drop for ProcessTransport {
    fn drop(&mut self) {
        if let Err(e) = self.terminate() {
            warn!("Failed to terminate '{}': {}", self.command, e);
        }
    }
}

impl std::fmt::Debug for ProcessTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessTransport")
            .field("command", &self.command)
            .field("running", &self.child.is_some())
            .finish()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn quick_settings() -> ProcessSettings {
        ProcessSettings {
            settle_time: Duration::from_millis(50),
            read_timeout: Duration::from_millis(200),
        }
    }

    fn drain(transport: &mut ProcessTransport) -> Vec<u8> {
        let mut collected = Vec::new();
        for _ in 0..100 {
            match transport.read_bytes(64).unwrap() {
                ReadOutcome::Data(bytes) => collected.extend(bytes),
                ReadOutcome::Timeout => continue,
                ReadOutcome::Eof => break,
            }
        }
        collected
    }

    #[test]
    fn test_reads_child_stdout_until_eof() {
        let mut transport =
            ProcessTransport::spawn("sleep 0.3; printf 'one\\ntwo\\n'", quick_settings()).unwrap();

        assert_eq!(drain(&mut transport), b"one\ntwo\n");
        assert_eq!(transport.read_bytes(1).unwrap(), ReadOutcome::Eof);
    }

    #[test]
    fn test_child_that_exits_silently_is_rejected() {
        let settings = ProcessSettings {
            settle_time: Duration::from_millis(300),
            ..quick_settings()
        };
        let result = ProcessTransport::spawn("exit 3", settings);
        assert!(matches!(result, Err(TransportOpenError::ExitedEarly { .. })));
    }

    #[test]
    fn test_fast_child_output_is_kept() {
        let settings = ProcessSettings {
            settle_time: Duration::from_millis(500),
            ..quick_settings()
        };
        let mut transport = ProcessTransport::spawn(
            "printf 'Running testFoo...\\nx.c:10:testFoo:PASS\\n1 Tests 0 Failures 0 Ignored\\n'",
            settings,
        )
        .unwrap();

        assert_eq!(
            drain(&mut transport),
            b"Running testFoo...\nx.c:10:testFoo:PASS\n1 Tests 0 Failures 0 Ignored\n"
        );
    }

    #[test]
    fn test_undecodable_stderr_does_not_stop_the_child() {
        let mut transport = ProcessTransport::spawn(
            "printf '\\377\\n' >&2; sleep 0.3; echo more >&2; echo done",
            quick_settings(),
        )
        .unwrap();

        assert_eq!(drain(&mut transport), b"done\n");
    }

    #[test]
    fn test_writes_are_unsupported_and_terminate_is_idempotent() {
        let mut transport = ProcessTransport::spawn("sleep 5", quick_settings()).unwrap();
        assert!(!transport.is_bidirectional());
        assert!(matches!(
            transport.write_bytes(b"*\r\n"),
            Err(TransportError::WriteUnsupported(TransportKind::Process))
        ));

        transport.close().unwrap();
        transport.close().unwrap();
    }
}
