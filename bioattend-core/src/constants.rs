//! Protocol constants

use std::time::Duration;

/// Substrings identifying a microcontroller in a port description
pub const CONTROLLER_SIGNATURES: &[&str] = &["Arduino", "CH340"];

/// Time for the board to reset after the port is opened
pub const SETTLE_DELAY: Duration = Duration::from_secs(2);

/// Listener polling interval
pub const LISTENER_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Interval between verify requests in attendance mode
pub const ATTENDANCE_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// How long a single attendance verify waits for an answer
pub const VERIFY_TIMEOUT: Duration = Duration::from_millis(2500);

/// How long a correlator scan waits for an `ID:` answer
pub const SCAN_TIMEOUT: Duration = Duration::from_secs(12);

/// How long a request keeps listening for its answer after timing out
///
/// An answer caught in this window is discarded instead of reaching the
/// next request.
pub const LATE_REPLY_GRACE: Duration = Duration::from_millis(250);

/// Maximum scan attempts when correlating face and fingerprint
pub const MAX_MATCH_ATTEMPTS: u32 = 3;

/// Lines longer than this without a terminator are discarded
pub const MAX_LINE_LENGTH: usize = 512;

/// Response line prefixes sent by the sensor firmware
pub mod prefixes {
    /// Fingerprint matched a stored template: `F:MATCH:<id>`
    pub const MATCH: &str = "F:MATCH:";
    
    /// Enrollment finished: `F:ENROLLED:`
    pub const ENROLLED: &str = "F:ENROLLED:";
    
    /// Free-form status text: `F:<text>`
    pub const STATUS: &str = "F:";
    
    /// Scan result of the query firmware: `ID:<id>` or `ID:-1`
    pub const ID: &str = "ID:";
}

/// Value of an `ID:` answer when no finger matched
pub const NO_MATCH_ID: i64 = -1;
