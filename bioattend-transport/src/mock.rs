//! Scripted sensor board for testing without hardware
//!
//! [`MockDevice`] plays the firmware side of the link: it decodes the frames
//! the host writes, answers them from a script and can inject I/O failures.
//! [`MockTransport`] is the host side and implements [`Transport`].
//!
//! ```
//! use std::time::Duration;
//! use bioattend_core::CommandCode;
//! use bioattend_transport::{mock::MockDevice, Transport};
//!
//! #[tokio::main]
//! async fn main() -> bioattend_transport::Result<()> {
//!     let device = MockDevice::new();
//!     device.respond_always(CommandCode::Scan, ["ID:4"]);
//!
//!     let mut transport = device.transport();
//!     transport.open(None).await?;
//!     transport.write(b"S0\n").await?;
//!
//!     let line = transport.read_line(Duration::from_millis(50)).await?;
//!     assert_eq!(line.as_deref(), Some("ID:4"));
//!     Ok(())
//! }
//! ```

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bioattend_core::{Command, CommandCode};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, trace, warn};

use crate::{error::*, LineBuffer, Transport};

#[derive(Debug, Default)]
struct MockState {
    open: bool,
    opens: usize,
    inbound: LineBuffer,
    written: Vec<Command>,
    scripted: HashMap<CommandCode, VecDeque<Vec<String>>>,
    defaults: HashMap<CommandCode, Vec<String>>,
    open_failures: usize,
    read_failures: usize,
    write_failures: usize,
}

impl MockState {
    fn reply_for(&mut self, code: CommandCode) -> Vec<String> {
        if let Some(reply) = self.scripted.get_mut(&code).and_then(VecDeque::pop_front) {
            return reply;
        }
        self.defaults.get(&code).cloned().unwrap_or_default()
    }
}

/// Firmware side of a simulated link
///
/// Cloning yields another handle to the same board.
#[derive(Debug, Clone, Default)]
pub struct MockDevice {
    state: Arc<Mutex<MockState>>,
    notify: Arc<Notify>,
}

impl MockDevice {
    /// Create a board with an empty script
    pub fn new() -> Self {
        Self::default()
    }

    /// Host-side transport connected to this board
    pub fn transport(&self) -> MockTransport {
        MockTransport {
            device: self.clone(),
            settle_delay: Duration::ZERO,
        }
    }

    /// Answer the next `code` command with these lines
    ///
    /// One-shot replies are consumed in the order they were queued and take
    /// precedence over [`respond_always`](Self::respond_always).
    pub fn respond_once<I, S>(&self, code: CommandCode, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let reply = lines.into_iter().map(Into::into).collect();
        self.state
            .lock()
            .scripted
            .entry(code)
            .or_default()
            .push_back(reply);
    }

    /// Queue one single-line reply per future `code` command
    pub fn respond_in_sequence<I, S>(&self, code: CommandCode, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for line in lines {
            self.respond_once(code, [line]);
        }
    }

    /// Answer every `code` command with these lines
    pub fn respond_always<I, S>(&self, code: CommandCode, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let reply = lines.into_iter().map(Into::into).collect();
        self.state.lock().defaults.insert(code, reply);
    }

    /// Emit an unsolicited line
    pub fn push_line(&self, line: impl AsRef<str>) {
        let mut frame = line.as_ref().as_bytes().to_vec();
        frame.push(b'\n');
        self.push_bytes(&frame);
    }

    /// Emit raw bytes, possibly a partial line
    pub fn push_bytes(&self, bytes: &[u8]) {
        self.state.lock().inbound.extend(bytes);
        self.notify.notify_one();
    }

    /// Fail the next `count` reads with a broken link
    pub fn fail_reads(&self, count: usize) {
        self.state.lock().read_failures += count;
        self.notify.notify_one();
    }

    /// Fail the next `count` writes with a broken link
    pub fn fail_writes(&self, count: usize) {
        self.state.lock().write_failures += count;
    }

    /// Fail the next `count` open attempts
    pub fn fail_opens(&self, count: usize) {
        self.state.lock().open_failures += count;
    }

    /// Commands received so far
    pub fn written(&self) -> Vec<Command> {
        self.state.lock().written.clone()
    }

    /// Number of received commands with this code
    pub fn count(&self, code: CommandCode) -> usize {
        self.state
            .lock()
            .written
            .iter()
            .filter(|command| command.code == code)
            .count()
    }

    /// Forget received commands
    pub fn clear_written(&self) {
        self.state.lock().written.clear();
    }

    /// Number of successful opens
    pub fn open_count(&self) -> usize {
        self.state.lock().opens
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }
}

/// Host side of a simulated link
#[derive(Debug)]
pub struct MockTransport {
    device: MockDevice,
    settle_delay: Duration,
}

impl MockTransport {
    /// Set delay between opening and first use
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&mut self, port_hint: Option<&str>) -> Result<()> {
        {
            let mut state = self.device.state.lock();

            if state.open {
                return Err(Error::AlreadyOpen);
            }

            if state.open_failures > 0 {
                state.open_failures -= 1;
                warn!("Mock open failure injected");
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    "mock port unavailable",
                )));
            }

            state.open = true;
            state.opens += 1;
            state.inbound.clear();
        }

        debug!("Mock port opened (hint={:?})", port_hint);
        sleep(self.settle_delay).await;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.device.state.lock().open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.device.is_open()
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let text = String::from_utf8_lossy(data);

        let mut state = self.device.state.lock();

        if !state.open {
            return Err(Error::NotOpen);
        }

        if state.write_failures > 0 {
            state.write_failures -= 1;
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "mock write failure",
            )));
        }

        for frame in text.split_terminator('\n') {
            let command = match Command::decode(frame) {
                Ok(command) => command,
                Err(e) => {
                    warn!("Mock device ignoring frame {:?}: {}", frame, e);
                    continue;
                }
            };

            trace!("Mock device received {}", command);
            state.written.push(command);

            for line in state.reply_for(command.code) {
                state.inbound.extend(line.as_bytes());
                state.inbound.extend(b"\n");
            }
        }

        drop(state);
        self.device.notify.notify_one();
        Ok(())
    }

    async fn read_line(&mut self, wait: Duration) -> Result<Option<String>> {
        let deadline = Instant::now() + wait;

        loop {
            {
                let mut state = self.device.state.lock();

                if !state.open {
                    return Err(Error::NotOpen);
                }

                if state.read_failures > 0 {
                    state.read_failures -= 1;
                    state.open = false;
                    return Err(Error::Io(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        "mock device unplugged",
                    )));
                }

                if let Some(line) = state.inbound.next_line() {
                    return line.map(Some);
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }

            let _ = timeout(remaining, self.device.notify.notified()).await;
        }
    }

    fn port_name(&self) -> String {
        "mock".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const WAIT: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn test_scripted_replies() {
        let device = MockDevice::new();
        device.respond_in_sequence(CommandCode::Scan, ["ID:5", "ID:3"]);
        device.respond_always(CommandCode::Scan, ["ID:-1"]);

        let mut transport = device.transport();
        transport.open(None).await.unwrap();

        for expected in ["ID:5", "ID:3", "ID:-1", "ID:-1"] {
            transport.write(b"S0\n").await.unwrap();
            let line = transport.read_line(WAIT).await.unwrap();
            assert_eq!(line.as_deref(), Some(expected));
        }

        assert_eq!(device.count(CommandCode::Scan), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_timeout_returns_none() {
        let device = MockDevice::new();
        let mut transport = device.transport();
        transport.open(None).await.unwrap();

        let started = Instant::now();
        let line = transport.read_line(Duration::from_secs(1)).await.unwrap();
        assert_eq!(line, None);
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_partial_bytes_and_decode_error() {
        let device = MockDevice::new();
        let mut transport = device.transport();
        transport.open(None).await.unwrap();

        device.push_bytes(b"F:Pla");
        assert_eq!(transport.read_line(WAIT).await.unwrap(), None);

        device.push_bytes(b"ce finger\n");
        device.push_bytes(&[0xC3, 0x28, b'\n']);
        assert_eq!(
            transport.read_line(WAIT).await.unwrap().as_deref(),
            Some("F:Place finger")
        );
        let err = transport.read_line(WAIT).await.unwrap_err();
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let device = MockDevice::new();
        let mut transport = device.transport();

        device.fail_opens(1);
        assert!(transport.open(None).await.is_err());
        transport.open(None).await.unwrap();
        assert_eq!(device.open_count(), 1);

        device.fail_writes(1);
        assert!(matches!(transport.write(b"V0\n").await, Err(Error::Io(_))));
        transport.write(b"V0\n").await.unwrap();

        device.fail_reads(1);
        let err = transport.read_line(WAIT).await.unwrap_err();
        assert!(err.is_fatal());
        assert!(!transport.is_open());

        transport.close().await.unwrap();
        transport.open(None).await.unwrap();
        assert_eq!(device.open_count(), 2);
    }

    #[tokio::test]
    async fn test_not_open() {
        let device = MockDevice::new();
        let mut transport = device.transport();

        assert!(matches!(transport.write(b"V0\n").await, Err(Error::NotOpen)));
        assert!(matches!(transport.read_line(WAIT).await, Err(Error::NotOpen)));
    }
}
