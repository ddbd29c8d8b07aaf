//! # bioattend-core
//!
//! Wire protocol primitives for Arduino-hosted fingerprint sensors.
//!
//! This crate provides the low-level protocol pieces:
//! - Command codes and frame encoding
//! - Response line parsing into typed events
//! - Command set selection for the two firmware variants
//! - Protocol constants

pub mod command;
pub mod constants;
pub mod error;
pub mod response;

pub use command::{Command, CommandCode, CommandSet};
pub use error::{Error, Result};
pub use response::{parse_line, ResponseEvent};

/// Default serial baud rate of the sensor sketch
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Frame terminator in both directions
pub const FRAME_TERMINATOR: u8 = b'\n';
