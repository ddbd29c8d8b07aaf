//! # bioattend-protocol
//!
//! Request/response layer on top of the line transport.
//!
//! - [`ProtocolEngine`] writes command frames and turns incoming lines into
//!   [`ResponseEvent`]s for subscribers and waiters
//! - [`Registry`] keeps pending waiters in FIFO order so a response is
//!   delivered to exactly one of them

pub mod engine;
pub mod error;
pub mod registry;

pub use engine::{ProtocolEngine, SharedTransport};
pub use error::{Error, Result};
pub use registry::{Registry, Waiter};

pub use bioattend_core::{Command, CommandCode, CommandSet, ResponseEvent};
