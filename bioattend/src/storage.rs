//! Attendance persistence

use std::collections::BTreeMap;

use bioattend_types::{AttendanceRecord, User};
use chrono::{DateTime, Local, NaiveDate};
use parking_lot::RwLock;
use tracing::{debug, warn};

/// User and attendance store
///
/// User IDs double as fingerprint template slots.
#[cfg_attr(test, mockall::automock)]
pub trait Storage: Send + Sync {
    /// Add a user; `false` if the ID is taken or the name is invalid
    fn add_user(&self, id: u32, name: &str) -> bool;

    /// Remove a user and their marks; `false` if unknown
    fn delete_user(&self, id: u32) -> bool;

    fn get_user(&self, id: u32) -> Option<User>;

    /// All users ordered by ID
    fn get_all_users(&self) -> Vec<User>;

    /// Mark a user present now
    ///
    /// Returns `true` only when a new mark was recorded. Unknown users and
    /// users already marked today yield `false`.
    fn mark_attendance(&self, id: u32) -> bool;

    /// Today's marks, newest first
    fn get_today_attendance(&self) -> Vec<AttendanceRecord>;

    /// Marks between `start` and `end` inclusive, oldest first
    fn get_attendance_range(&self, start: NaiveDate, end: NaiveDate) -> Vec<AttendanceRecord>;
}

#[derive(Debug, Default)]
struct StorageState {
    users: BTreeMap<u32, User>,
    marks: Vec<AttendanceRecord>,
}

/// In-memory store
///
/// A user is marked at most once per calendar day.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    state: RwLock<StorageState>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a user present at `timestamp`
    pub fn mark_attendance_at(&self, id: u32, timestamp: DateTime<Local>) -> bool {
        let mut state = self.state.write();

        let Some(user) = state.users.get(&id) else {
            warn!("Cannot mark unknown user {}", id);
            return false;
        };
        let record = AttendanceRecord::new(id, user.name.clone(), timestamp);

        let day = record.date();
        if state
            .marks
            .iter()
            .any(|mark| mark.user_id == id && mark.date() == day)
        {
            debug!("User {} already marked on {}", id, day);
            return false;
        }

        debug!("Marked {}", record);
        state.marks.push(record);
        true
    }
}

impl Storage for MemoryStorage {
    fn add_user(&self, id: u32, name: &str) -> bool {
        let user = match User::new(id, name) {
            Ok(user) => user,
            Err(e) => {
                warn!("Rejected user {}: {}", id, e);
                return false;
            }
        };

        let mut state = self.state.write();
        if state.users.contains_key(&id) {
            return false;
        }

        debug!("Added {}", user);
        state.users.insert(id, user);
        true
    }

    fn delete_user(&self, id: u32) -> bool {
        let mut state = self.state.write();

        if state.users.remove(&id).is_none() {
            return false;
        }
        state.marks.retain(|mark| mark.user_id != id);
        true
    }

    fn get_user(&self, id: u32) -> Option<User> {
        self.state.read().users.get(&id).cloned()
    }

    fn get_all_users(&self) -> Vec<User> {
        self.state.read().users.values().cloned().collect()
    }

    fn mark_attendance(&self, id: u32) -> bool {
        self.mark_attendance_at(id, Local::now())
    }

    fn get_today_attendance(&self) -> Vec<AttendanceRecord> {
        let today = Local::now().date_naive();

        let mut records: Vec<_> = self
            .state
            .read()
            .marks
            .iter()
            .filter(|mark| mark.date() == today)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        records
    }

    fn get_attendance_range(&self, start: NaiveDate, end: NaiveDate) -> Vec<AttendanceRecord> {
        let mut records: Vec<_> = self
            .state
            .read()
            .marks
            .iter()
            .filter(|mark| mark.within(start, end))
            .cloned()
            .collect();
        records.sort_by_key(|mark| mark.timestamp);
        records
    }
}
