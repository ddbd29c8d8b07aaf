//! Serial transport for Arduino-hosted sensors
//!
//! The board resets when the port is opened, so the link only becomes usable
//! after a settle delay. Blocking port I/O runs on tokio's blocking pool and
//! the port itself stays in shared state, so dropping a pending read or write
//! never loses the handle.

use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bioattend_core::constants::{CONTROLLER_SIGNATURES, SETTLE_DELAY};
use bioattend_core::DEFAULT_BAUD_RATE;
use parking_lot::Mutex;
use serialport::{SerialPort, SerialPortType};
use tokio::time::sleep;
use tracing::{debug, info, trace, warn};

use crate::{error::*, LineBuffer, Transport};

/// Port found during discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortCandidate {
    /// OS device name (`/dev/ttyUSB0`, `COM3`)
    pub name: String,

    /// Manufacturer and product strings, empty for non-USB ports
    pub description: String,
}

impl PortCandidate {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// List serial ports known to the OS
pub fn available_ports() -> Result<Vec<PortCandidate>> {
    let ports = serialport::available_ports()?;

    Ok(ports
        .into_iter()
        .map(|port| {
            let description = match port.port_type {
                SerialPortType::UsbPort(usb) => [usb.manufacturer, usb.product]
                    .into_iter()
                    .flatten()
                    .collect::<Vec<_>>()
                    .join(" "),
                _ => String::new(),
            };
            PortCandidate::new(port.port_name, description)
        })
        .collect())
}

/// Pick the controller port from a list of candidates
///
/// The first port whose description contains one of `signatures` wins;
/// otherwise the first port is used.
pub fn select_port<'a>(
    candidates: &'a [PortCandidate],
    signatures: &[&str],
) -> Option<&'a PortCandidate> {
    candidates
        .iter()
        .find(|port| {
            signatures
                .iter()
                .any(|signature| port.description.contains(signature))
        })
        .or_else(|| candidates.first())
}

/// Longest single blocking read
///
/// The port lock is released between reads, so `write` and `close` wait at
/// most this long behind a read that is still running.
const READ_SLICE: Duration = Duration::from_millis(50);

/// Port handle and unread bytes, shared with blocking I/O tasks
///
/// A read or write whose future is dropped keeps running on the blocking
/// pool. It finds the port here, and so do the calls after it.
struct PortState {
    port: Option<Box<dyn SerialPort>>,
    buffer: LineBuffer,
}

/// Serial transport for the sensor board
pub struct SerialTransport {
    baud_rate: u32,
    state: Arc<Mutex<PortState>>,
    open: bool,
    port_name: Option<String>,
    settle_delay: Duration,
}

impl SerialTransport {
    /// Create new serial transport
    pub fn new(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            state: Arc::new(Mutex::new(PortState {
                port: None,
                buffer: LineBuffer::new(),
            })),
            open: false,
            port_name: None,
            settle_delay: SETTLE_DELAY,
        }
    }

    /// Set delay between opening the port and first use
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Resolve port name from hint or discovery
    fn resolve_port(port_hint: Option<&str>) -> Result<String> {
        if let Some(name) = port_hint {
            return Ok(name.to_string());
        }

        let candidates = available_ports()?;
        debug!("Discovered {} serial port(s)", candidates.len());

        select_port(&candidates, CONTROLLER_SIGNATURES)
            .map(|port| port.name.clone())
            .ok_or(Error::NoPortAvailable)
    }

    /// Run blocking port I/O off the async runtime
    async fn blocking<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Mutex<PortState>) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let state = Arc::clone(&self.state);

        tokio::task::spawn_blocking(move || f(&state))
            .await
            .map_err(|e| Error::Io(io::Error::other(e)))?
    }
}

impl Default for SerialTransport {
    fn default() -> Self {
        Self::new(DEFAULT_BAUD_RATE)
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn open(&mut self, port_hint: Option<&str>) -> Result<()> {
        if self.is_open() {
            return Err(Error::AlreadyOpen);
        }

        let name = Self::resolve_port(port_hint)?;

        debug!("Opening {} at {} baud...", name, self.baud_rate);

        let port = serialport::new(name.as_str(), self.baud_rate)
            .timeout(READ_SLICE)
            .open()?;

        self.blocking(move |state| {
            let mut state = state.lock();
            state.port = Some(port);
            state.buffer.clear();
            Ok(())
        })
        .await?;

        self.open = true;
        self.port_name = Some(name);

        // Board resets on open
        sleep(self.settle_delay).await;

        info!("Opened {}", self.port_name());
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.open = false;

        // Taking the port drops the OS handle even if a cancelled read
        // still holds a reference to the shared state
        let closed = self
            .blocking(|state| {
                let mut state = state.lock();
                state.buffer.clear();
                Ok(state.port.take().is_some())
            })
            .await?;

        if closed {
            debug!("Closed {}", self.port_name());
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        if !self.is_open() {
            return Err(Error::NotOpen);
        }

        trace!("Sending {} bytes: {:?}", data.len(), String::from_utf8_lossy(data));

        let data = data.to_vec();
        self.blocking(move |state| {
            let mut state = state.lock();
            let port = state.port.as_mut().ok_or(Error::NotOpen)?;
            port.write_all(&data)?;
            port.flush()?;
            Ok(())
        })
        .await
    }

    async fn read_line(&mut self, timeout: Duration) -> Result<Option<String>> {
        if !self.is_open() {
            return Err(Error::NotOpen);
        }

        let deadline = std::time::Instant::now() + timeout;

        self.blocking(move |state| loop {
            let mut guard = state.lock();
            let PortState { port, buffer } = &mut *guard;

            if let Some(line) = buffer.next_line() {
                return line.map(Some);
            }

            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }

            let port = port.as_mut().ok_or(Error::NotOpen)?;
            port.set_timeout(remaining.min(READ_SLICE))?;

            let mut chunk = [0u8; 256];
            match port.read(&mut chunk) {
                Ok(n) if n > 0 => {
                    trace!("Received {} bytes", n);
                    buffer.extend(&chunk[..n]);
                }
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {}
                Err(e) => return Err(Error::Io(e)),
            }
        })
        .await
    }

    fn port_name(&self) -> String {
        self.port_name
            .clone()
            .unwrap_or_else(|| "<unresolved>".to_string())
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        if self.is_open() {
            warn!("Serial transport dropped while still open");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn candidates() -> Vec<PortCandidate> {
        vec![
            PortCandidate::new("/dev/ttyS0", ""),
            PortCandidate::new("/dev/ttyUSB0", "QinHeng Electronics USB-Serial CH340"),
            PortCandidate::new("/dev/ttyACM0", "Arduino (www.arduino.cc) Arduino Uno"),
        ]
    }

    #[test]
    fn test_select_port_by_signature() {
        let ports = candidates();
        let selected = select_port(&ports, CONTROLLER_SIGNATURES).unwrap();
        assert_eq!(selected.name, "/dev/ttyUSB0");

        let selected = select_port(&ports, &["Arduino"]).unwrap();
        assert_eq!(selected.name, "/dev/ttyACM0");
    }

    #[test]
    fn test_select_port_falls_back_to_first() {
        let ports = vec![
            PortCandidate::new("COM1", "Communications Port"),
            PortCandidate::new("COM4", "Prolific USB-to-Serial"),
        ];
        let selected = select_port(&ports, CONTROLLER_SIGNATURES).unwrap();
        assert_eq!(selected.name, "COM1");
    }

    #[test]
    fn test_select_port_none_available() {
        assert!(select_port(&[], CONTROLLER_SIGNATURES).is_none());
    }

    #[tokio::test]
    async fn test_serial_transport_create() {
        let transport = SerialTransport::new(9600);
        assert!(!transport.is_open());
        assert_eq!(transport.port_name(), "<unresolved>");
    }

    #[tokio::test]
    async fn test_serial_transport_not_open() {
        let mut transport = SerialTransport::default();

        assert!(matches!(transport.write(b"V0\n").await, Err(Error::NotOpen)));
        assert!(matches!(
            transport.read_line(Duration::from_millis(10)).await,
            Err(Error::NotOpen)
        ));
        // Closing twice is fine
        transport.close().await.unwrap();
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_serial_transport_invalid_port() {
        let mut transport = SerialTransport::new(9600).with_settle_delay(Duration::ZERO);

        let result = transport.open(Some("/dev/does-not-exist-bioattend")).await;
        assert!(result.is_err());
        assert!(!transport.is_open());
    }

    #[test]
    fn test_serial_transport_is_a_transport() {
        fn assert_transport<T: Transport + 'static>() {}
        assert_transport::<SerialTransport>();

        let boxed: Box<dyn Transport> = Box::new(SerialTransport::default());
        assert!(!boxed.is_open());
    }
}

/// Tests against a pseudo-terminal pair standing in for the board
#[cfg(all(test, unix))]
mod pty_tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serialport::TTYPort;
    use tokio::time::timeout;

    /// Open a transport on the slave end and return the master end
    async fn open_pair() -> (TTYPort, SerialTransport, String) {
        let (mut master, slave) = TTYPort::pair().expect("pty pair");
        let name = slave.name().expect("pty slave name");
        // The pair holds the slave exclusively
        drop(slave);
        master.set_timeout(Duration::from_secs(2)).unwrap();

        let mut transport = SerialTransport::new(9600).with_settle_delay(Duration::ZERO);
        transport.open(Some(name.as_str())).await.unwrap();
        (master, transport, name)
    }

    fn read_master_line(master: &mut TTYPort) -> String {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        while byte[0] != b'\n' {
            master.read_exact(&mut byte).unwrap();
            line.push(byte[0]);
        }
        String::from_utf8(line).unwrap().trim().to_string()
    }

    #[tokio::test]
    async fn test_frame_reaches_device() {
        let (mut master, mut transport, name) = open_pair().await;
        assert!(transport.is_open());
        assert_eq!(transport.port_name(), name);

        transport.write(b"V0\n").await.unwrap();
        assert_eq!(read_master_line(&mut master), "V0");

        transport.close().await.unwrap();
        assert!(!transport.is_open());
    }

    #[tokio::test]
    async fn test_partial_line_across_writes() {
        let (mut master, mut transport, _) = open_pair().await;

        master.write_all(b"F:Pla").unwrap();
        master.flush().unwrap();
        assert_eq!(transport.read_line(Duration::from_millis(200)).await.unwrap(), None);

        master.write_all(b"ce finger\r\nID:-1\n").unwrap();
        master.flush().unwrap();
        assert_eq!(
            transport.read_line(Duration::from_secs(1)).await.unwrap(),
            Some("F:Place finger".to_string())
        );
        assert_eq!(
            transport.read_line(Duration::from_secs(1)).await.unwrap(),
            Some("ID:-1".to_string())
        );

        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_read_keeps_port() {
        let (mut master, mut transport, name) = open_pair().await;

        let pending = timeout(
            Duration::from_millis(50),
            transport.read_line(Duration::from_secs(2)),
        )
        .await;
        assert!(pending.is_err());
        assert!(transport.is_open());

        transport.write(b"S0\n").await.unwrap();
        assert_eq!(read_master_line(&mut master), "S0");

        // Bytes picked up by the abandoned read are not lost
        master.write_all(b"ID:4\n").unwrap();
        master.flush().unwrap();
        assert_eq!(
            transport.read_line(Duration::from_secs(1)).await.unwrap(),
            Some("ID:4".to_string())
        );

        // Close releases the handle, so the port opens again right away
        let pending = timeout(
            Duration::from_millis(50),
            transport.read_line(Duration::from_secs(2)),
        )
        .await;
        assert!(pending.is_err());
        transport.close().await.unwrap();
        transport.open(Some(name.as_str())).await.unwrap();

        transport.write(b"C0\n").await.unwrap();
        assert_eq!(read_master_line(&mut master), "C0");

        transport.close().await.unwrap();
    }
}
