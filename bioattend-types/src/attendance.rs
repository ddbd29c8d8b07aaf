//! Attendance records

use std::fmt;

use chrono::{DateTime, Local, NaiveDate};

/// One attendance mark joined with the user's name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceRecord {
    pub user_id: u32,
    
    pub name: String,
    
    /// Time of the mark (local time)
    pub timestamp: DateTime<Local>,
}

impl AttendanceRecord {
    pub fn new(user_id: u32, name: impl Into<String>, timestamp: DateTime<Local>) -> Self {
        Self {
            user_id,
            name: name.into(),
            timestamp,
        }
    }
    
    /// Calendar day of the mark
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }
    
    /// Check if the mark falls within `start..=end`
    pub fn within(&self, start: NaiveDate, end: NaiveDate) -> bool {
        let date = self.date();
        start <= date && date <= end
    }
}

impl fmt::Display for AttendanceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.user_id,
            self.name,
            self.timestamp.format("%Y-%m-%d %H:%M:%S")
        )
    }
}
