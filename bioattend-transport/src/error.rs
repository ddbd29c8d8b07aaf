//! Transport errors

use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("No serial port available")]
    NoPortAvailable,
    
    #[error("Port not open")]
    NotOpen,
    
    #[error("Port already open")]
    AlreadyOpen,
    
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),
    
    #[error("Line is not valid UTF-8 ({len} bytes)")]
    Decode {
        len: usize,
    },
}

impl Error {
    /// Check if the link must be considered lost
    ///
    /// Decode failures only cost one line; the port is still usable.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Decode { .. } | Self::AlreadyOpen)
    }
}
