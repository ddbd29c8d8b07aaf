//! Attendance orchestration
//!
//! Ties the device session, attendance mode, correlator and storage together:
//! sensor matches become attendance marks, enrollment keeps the user store and
//! the sensor's template slots in step.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bioattend_core::CommandCode;
use bioattend_transport::Transport;
use bioattend_types::{AttendanceRecord, User};
use chrono::NaiveDate;
use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::attendance::{AttendanceEvent, AttendanceMode};
use crate::config::Config;
use crate::correlator::{AttendanceOutcome, MatchCorrelator};
use crate::error::Result;
use crate::notification::DeviceNotification;
use crate::recognizer::FaceRecognizer;
use crate::session::{DeviceHandle, DeviceSession};
use crate::storage::Storage;

const RESOLUTION_CHANNEL_CAPACITY: usize = 32;

/// What a fingerprint match turned into
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchResolution {
    /// Attendance recorded
    Marked(User),

    /// Known user, already marked today
    AlreadyMarked(User),

    /// Repeat match within the cooldown window
    Duplicate(u32),

    /// No user enrolled under this ID
    Unregistered(u32),
}

/// Attendance system
pub struct AttendanceSystem {
    session: Arc<DeviceSession>,
    storage: Arc<dyn Storage>,
    attendance: AttendanceMode,
    correlator: MatchCorrelator,
    port: Option<String>,
    cooldown: Duration,
    last_marks: Mutex<HashMap<u32, Instant>>,
    resolutions: broadcast::Sender<MatchResolution>,
}

impl AttendanceSystem {
    /// Build the system from config over an unopened transport
    pub fn new(config: &Config, transport: Box<dyn Transport>, storage: Arc<dyn Storage>) -> Self {
        let session = Arc::new(DeviceSession::new(transport, config.session_options()));
        let handle = session.handle();

        let attendance = AttendanceMode::new(handle.clone(), config.attendance_options());
        let correlator = MatchCorrelator::new(handle)
            .with_max_attempts(config.correlator.max_attempts)
            .with_scan_timeout(config.correlator.scan_timeout());

        let (resolutions, _) = broadcast::channel(RESOLUTION_CHANNEL_CAPACITY);

        Self {
            session,
            storage,
            attendance,
            correlator,
            port: config.device.port.clone(),
            cooldown: config.attendance.cooldown(),
            last_marks: Mutex::new(HashMap::new()),
            resolutions,
        }
    }

    pub fn session(&self) -> &Arc<DeviceSession> {
        &self.session
    }

    pub fn handle(&self) -> DeviceHandle {
        self.session.handle()
    }

    pub fn attendance_mode(&self) -> &AttendanceMode {
        &self.attendance
    }

    /// Subscribe to match resolutions
    pub fn subscribe(&self) -> broadcast::Receiver<MatchResolution> {
        self.resolutions.subscribe()
    }

    /// Connect to the configured (or discovered) port
    pub async fn connect(&self) -> Result<()> {
        self.session.connect(self.port.as_deref()).await
    }

    /// Stop attendance mode and disconnect
    pub async fn shutdown(&self) {
        self.attendance.stop().await;
        self.session.disconnect().await;
    }

    /// Register a user and start enrolling their fingerprint
    ///
    /// Returns `false` if the ID is already taken. If the enroll command
    /// cannot be sent the user is removed again.
    pub async fn enroll_new_user(&self, id: u32, name: &str) -> Result<bool> {
        if !self.storage.add_user(id, name) {
            warn!("User {} already exists", id);
            return Ok(false);
        }

        if let Err(e) = self.handle().enroll(id).await {
            warn!("Enrollment of user {} failed, rolling back: {}", id, e);
            self.storage.delete_user(id);
            return Err(e);
        }

        info!("Enrolling user {} ({})", id, name);
        Ok(true)
    }

    /// Remove a user and their fingerprint template
    pub async fn delete_user(&self, id: u32) -> Result<bool> {
        if !self.storage.delete_user(id) {
            return Ok(false);
        }

        self.last_marks.lock().remove(&id);
        self.handle().delete(id).await?;

        info!("Deleted user {}", id);
        Ok(true)
    }

    /// All enrolled users
    pub fn users(&self) -> Vec<User> {
        self.storage.get_all_users()
    }

    pub fn start_attendance_mode(&self) -> Result<()> {
        self.attendance.start()
    }

    pub async fn stop_attendance_mode(&self) {
        self.attendance.stop().await
    }

    /// Turn a sensor match into an attendance mark
    pub fn resolve_match(&self, fingerprint_id: u32) -> MatchResolution {
        let resolution = self.resolve(fingerprint_id);
        debug!("Match {} resolved to {:?}", fingerprint_id, resolution);

        let _ = self.resolutions.send(resolution.clone());
        resolution
    }

    fn resolve(&self, id: u32) -> MatchResolution {
        let Some(user) = self.storage.get_user(id) else {
            warn!("Fingerprint {} is not registered", id);
            return MatchResolution::Unregistered(id);
        };

        let now = Instant::now();
        {
            let mut last_marks = self.last_marks.lock();
            if last_marks
                .get(&id)
                .is_some_and(|last| now.duration_since(*last) < self.cooldown)
            {
                return MatchResolution::Duplicate(id);
            }
            last_marks.insert(id, now);
        }

        if self.storage.mark_attendance(id) {
            info!("Attendance marked for {}", user);
            MatchResolution::Marked(user)
        } else {
            info!("{} already marked today", user);
            MatchResolution::AlreadyMarked(user)
        }
    }

    /// Two-factor attendance: recognize a face, confirm by fingerprint
    ///
    /// Attendance is recorded only when the fingerprint matches the face.
    pub async fn mark_attendance_two_factor(
        &self,
        recognizer: &dyn FaceRecognizer,
    ) -> Result<AttendanceOutcome> {
        let (face_id, outcome) = self.correlator.mark_with_recognizer(recognizer).await?;

        match outcome {
            AttendanceOutcome::Matched(id) => {
                self.resolve_match(id);
            }
            _ => info!("Two-factor check for {} failed: {:?}", face_id, outcome),
        }

        Ok(outcome)
    }

    /// Today's marks, newest first
    pub fn today_attendance(&self) -> Vec<AttendanceRecord> {
        self.storage.get_today_attendance()
    }

    /// Marks between `start` and `end` inclusive
    pub fn attendance_report(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<AttendanceRecord>> {
        if start > end {
            return Err(bioattend_types::Error::InvalidRange { start, end }.into());
        }
        Ok(self.storage.get_attendance_range(start, end))
    }

    /// Record attendance for matches until `shutdown` fires
    ///
    /// Character firmware announces matches as `F:MATCH:`; scan-only
    /// firmware only answers the attendance mode's scan queries.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut notifications = self.session.subscribe();
        let mut cycles = self.attendance.subscribe();
        let scan_only = !self.handle().command_set().supports(CommandCode::Verify);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                notification = notifications.recv() => match notification {
                    Ok(DeviceNotification::MatchFound(id)) => {
                        self.resolve_match(id);
                    }
                    Ok(DeviceNotification::ConnectionLost { attempts }) => {
                        warn!("Sensor lost after {} reconnect attempt(s)", attempts);
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(n)) => warn!("Missed {} device notification(s)", n),
                    Err(RecvError::Closed) => break,
                },
                cycle = cycles.recv() => match cycle {
                    Ok(AttendanceEvent::Identified(id)) if scan_only => {
                        self.resolve_match(id);
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(n)) => warn!("Missed {} attendance cycle(s)", n),
                    Err(RecvError::Closed) => break,
                },
            }
        }

        debug!("Attendance loop stopped");
    }
}
