//! Transport layer for the sensor protocol
//!
//! Provides line-oriented serial communication with the controller board.

pub mod error;
pub mod line;
pub mod mock;
pub mod serial;

pub use error::{Error, Result};
pub use line::LineBuffer;
pub use serial::{PortCandidate, SerialTransport};

use std::time::Duration;

use async_trait::async_trait;

/// Transport trait for line-oriented links
#[async_trait]
pub trait Transport: Send {
    /// Open the link
    ///
    /// Without a port hint the transport picks the port itself.
    async fn open(&mut self, port_hint: Option<&str>) -> Result<()>;
    
    /// Close the link (idempotent)
    async fn close(&mut self) -> Result<()>;
    
    /// Check if open
    fn is_open(&self) -> bool;
    
    /// Write raw bytes
    async fn write(&mut self, data: &[u8]) -> Result<()>;
    
    /// Read one line (with timeout)
    ///
    /// Returns `Ok(None)` when no complete line arrived in time.
    async fn read_line(&mut self, timeout: Duration) -> Result<Option<String>>;
    
    /// Get port name
    fn port_name(&self) -> String;
}
