//! High-level error types

use bioattend_types::FaceId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Core protocol error: {0}")]
    Core(#[from] bioattend_core::Error),
    
    #[error("Protocol error: {0}")]
    Protocol(#[from] bioattend_protocol::Error),
    
    #[error("Transport error: {0}")]
    Transport(#[from] bioattend_transport::Error),
    
    #[error("Type error: {0}")]
    Types(#[from] bioattend_types::Error),
    
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
    
    #[error("Failed to connect: {0}")]
    ConnectFailed(#[source] bioattend_transport::Error),
    
    #[error("Device already connected")]
    AlreadyConnected,
    
    #[error("Device not connected")]
    NotConnected,
    
    #[error("Reconnection failed after {attempts} attempt(s)")]
    ReconnectFailed {
        attempts: u32,
    },
    
    #[error("Attendance mode already active")]
    AttendanceModeActive,
    
    #[error("No face recognized")]
    NoFaceRecognized,
    
    #[error("Fingerprint {got} does not belong to {expected}")]
    Mismatch {
        expected: FaceId,
        got: u32,
    },
    
    #[error("No matching fingerprint after all attempts")]
    Exhausted,
    
    #[error("Storage rejected operation: {0}")]
    Storage(String),
    
    #[error("Logging setup failed: {0}")]
    Logging(String),
}

impl Error {
    /// Check if error is a response timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Protocol(e) if e.is_timeout())
    }
    
    /// Check if error requires reconnection
    pub fn requires_reconnect(&self) -> bool {
        match self {
            Self::Protocol(e) => e.requires_reconnect(),
            Self::Transport(e) => e.is_fatal(),
            Self::NotConnected => true,
            _ => false,
        }
    }
}
