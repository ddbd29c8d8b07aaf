//! Type definitions for bioattend

pub mod attendance;
pub mod error;
pub mod face;
pub mod user;

pub use attendance::AttendanceRecord;
pub use error::{Error, Result};
pub use face::FaceId;
pub use user::User;
