//! Protocol engine errors

use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No open link to write to
    #[error("Device not connected")]
    NotConnected,
    
    /// No matching response arrived in time
    #[error("Timeout waiting for response after {after:?}")]
    Timeout {
        after: Duration,
    },
    
    /// Wait was abandoned because the session stopped or faulted
    #[error("Wait cancelled")]
    Cancelled,
    
    #[error("Core protocol error: {0}")]
    Core(#[from] bioattend_core::Error),
    
    #[error("Transport error: {0}")]
    Transport(#[from] bioattend_transport::Error),
}

impl Error {
    /// Check if error is a plain timeout (retry might succeed)
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
    
    /// Check if error means the link is gone
    pub fn requires_reconnect(&self) -> bool {
        match self {
            Self::NotConnected | Self::Cancelled => true,
            Self::Transport(e) => e.is_fatal(),
            _ => false,
        }
    }
}
