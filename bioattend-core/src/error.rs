//! Error types for bioattend-core



/// Result type alias for bioattend-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core protocol errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Command code is not part of the wire protocol
    #[error("Unknown command code: {0:?}")]
    UnknownCommand(char),
    
    /// Frame could not be read as a command
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),
    
    /// Command parameter is not a non-negative integer
    #[error("Invalid parameter for {code}: {raw:?}")]
    InvalidParameter {
        code: crate::command::CommandCode,
        raw: String,
    },
    
    /// Command is not supported by the configured firmware variant
    #[error("Command {0} is not supported by the configured command set")]
    Unsupported(crate::command::CommandCode),
}

impl Error {
    /// Check if error was caused by malformed input from the wire
    pub fn is_malformed_input(&self) -> bool {
        matches!(
            self,
            Self::UnknownCommand(_)
                | Self::InvalidFrame(_)
                | Self::InvalidParameter { .. }
        )
    }
}
