//! # bioattend
//!
//! Fingerprint attendance over a serial-attached sensor board.
//!
//! ## Features
//!
//! - Line-based sensor protocol with character and scan-query firmware
//! - Async/await API using Tokio
//! - Automatic reconnection with bounded backoff
//! - Continuous attendance mode and face/fingerprint two-factor marking
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use bioattend::{AttendanceSystem, Config, MemoryStorage};
//! use bioattend_transport::SerialTransport;
//!
//! #[tokio::main]
//! async fn main() -> bioattend::Result<()> {
//!     let config = Config::default();
//!     let transport = SerialTransport::new(config.device.baud_rate);
//!
//!     let system = AttendanceSystem::new(&config, Box::new(transport), Arc::new(MemoryStorage::new()));
//!     system.connect().await?;
//!
//!     // Register a user and enroll their finger into slot 1
//!     system.enroll_new_user(1, "Ada Lovelace").await?;
//!
//!     system.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod attendance;
pub mod config;
pub mod correlator;
pub mod error;
pub mod logging;
pub mod notification;
pub mod recognizer;
pub mod session;
pub mod storage;
pub mod system;

// Re-exports
pub use attendance::{AttendanceEvent, AttendanceMode, AttendanceModeState, AttendanceOptions};
pub use config::Config;
pub use correlator::{AttendanceOutcome, MatchAttempt, MatchCorrelator};
pub use error::{Error, Result};
pub use notification::DeviceNotification;
pub use recognizer::FaceRecognizer;
pub use session::{DeviceHandle, DeviceSession, ReconnectPolicy, SessionOptions, SessionState};
pub use storage::{MemoryStorage, Storage};
pub use system::{AttendanceSystem, MatchResolution};

// Re-export types
pub use bioattend_core::{Command, CommandCode, CommandSet, ResponseEvent};
pub use bioattend_types::{AttendanceRecord, FaceId, User};
