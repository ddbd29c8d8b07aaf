//! Notifications pushed to the orchestration layer

use std::time::Duration;

/// Event published by a device session
///
/// These are the only data the session pushes outward; presentation layers
/// subscribe through [`DeviceSession::subscribe`](crate::DeviceSession::subscribe).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceNotification {
    /// Session moved into (`true`) or out of (`false`) the connected state
    ConnectionStatus(bool),
    
    /// Status text reported by the sensor
    StatusMessage(String),
    
    /// Sensor matched a finger to a stored template
    MatchFound(u32),
    
    /// Sensor finished an enrollment
    EnrollmentCompleted,
    
    /// Reconnection attempt scheduled after `delay`
    ReconnectAttempt {
        attempt: u32,
        delay: Duration,
    },
    
    /// Reconnection attempt failed
    ReconnectFailed {
        attempt: u32,
        reason: String,
    },
    
    /// Reconnection abandoned; the session is disconnected
    ConnectionLost {
        attempts: u32,
    },
}
