//! Face and fingerprint correlation
//!
//! Two-factor attendance: a recognized face names the expected user, then the
//! sensor is scanned until it reports the same ID or the attempts run out.

use std::time::Duration;

use bioattend_core::constants::{MAX_MATCH_ATTEMPTS, SCAN_TIMEOUT};
use bioattend_types::FaceId;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::recognizer::FaceRecognizer;
use crate::session::DeviceHandle;

/// Progress of one correlation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchAttempt {
    pub face_id: FaceId,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub last_fingerprint_id: Option<u32>,
}

impl MatchAttempt {
    pub fn begin(face_id: FaceId, max_attempts: u32) -> Self {
        Self {
            face_id,
            attempt_count: 0,
            max_attempts,
            last_fingerprint_id: None,
        }
    }

    /// Count an attempt and what the sensor reported for it
    pub fn record(&mut self, fingerprint_id: Option<u32>) {
        self.attempt_count += 1;
        if fingerprint_id.is_some() {
            self.last_fingerprint_id = fingerprint_id;
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt_count >= self.max_attempts
    }
}

/// Outcome of a correlation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendanceOutcome {
    /// Fingerprint matched the face
    Matched(u32),

    /// Sensor reported a different user
    Mismatch { expected: FaceId, got: u32 },

    /// No match within the allowed attempts
    Exhausted,
}

impl AttendanceOutcome {
    pub fn is_matched(&self) -> bool {
        matches!(self, Self::Matched(_))
    }

    /// Turn a failed outcome into an error
    pub fn into_result(self) -> Result<u32> {
        match self {
            Self::Matched(id) => Ok(id),
            Self::Mismatch { expected, got } => Err(Error::Mismatch { expected, got }),
            Self::Exhausted => Err(Error::Exhausted),
        }
    }
}

/// Match correlator
pub struct MatchCorrelator {
    handle: DeviceHandle,
    max_attempts: u32,
    scan_timeout: Duration,
}

impl MatchCorrelator {
    pub fn new(handle: DeviceHandle) -> Self {
        Self {
            handle,
            max_attempts: MAX_MATCH_ATTEMPTS,
            scan_timeout: SCAN_TIMEOUT,
        }
    }

    /// Set number of scans per correlation
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set per-scan timeout
    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Scan once and compare against `face_id`
    pub async fn check_once(&self, face_id: FaceId) -> Result<AttendanceOutcome> {
        match self.handle.scan_once(self.scan_timeout).await {
            Ok(Some(id)) if face_id.matches(id) => Ok(AttendanceOutcome::Matched(id)),
            Ok(Some(got)) => Ok(AttendanceOutcome::Mismatch {
                expected: face_id,
                got,
            }),
            Ok(None) => Ok(AttendanceOutcome::Exhausted),
            Err(e) if e.is_timeout() => Ok(AttendanceOutcome::Exhausted),
            Err(e) => Err(e),
        }
    }

    /// Scan until the sensor confirms `face_id`
    ///
    /// Every scan consumes an attempt, whether it reported another user,
    /// timed out or hit a link failure. Link failures trigger a reconnect
    /// before the next scan. Attendance is not recorded here.
    ///
    /// # Errors
    ///
    /// Fails only on errors a retry cannot fix, such as an unsupported
    /// scan command or a closed session.
    pub async fn mark_attendance(&self, face_id: FaceId) -> Result<AttendanceOutcome> {
        let mut attempt = MatchAttempt::begin(face_id, self.max_attempts);

        info!("Confirming {} by fingerprint", face_id);

        while !attempt.is_exhausted() {
            let scanned = self.handle.scan_once(self.scan_timeout).await;

            match scanned {
                Ok(Some(id)) if face_id.matches(id) => {
                    attempt.record(Some(id));
                    info!("{} confirmed after {} scan(s)", face_id, attempt.attempt_count);
                    return Ok(AttendanceOutcome::Matched(id));
                }
                Ok(found) => {
                    attempt.record(found);
                    debug!(
                        "Scan {}/{}: got {:?}, expected {}",
                        attempt.attempt_count, attempt.max_attempts, found, face_id
                    );
                }
                Err(e) if e.is_timeout() => {
                    attempt.record(None);
                    debug!("Scan {}/{} timed out", attempt.attempt_count, attempt.max_attempts);
                }
                Err(e) if e.requires_reconnect() => {
                    attempt.record(None);
                    warn!("Scan {}/{} failed: {}", attempt.attempt_count, attempt.max_attempts, e);

                    if let Err(e) = self.handle.reconnect().await {
                        warn!("Reconnect during correlation failed: {}", e);
                        return Err(e);
                    }
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            "{} not confirmed after {} scan(s) (last: {:?})",
            face_id, attempt.attempt_count, attempt.last_fingerprint_id
        );
        Ok(AttendanceOutcome::Exhausted)
    }

    /// Recognize a face, then confirm it by fingerprint
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoFaceRecognized`] if the recognizer found nobody.
    pub async fn mark_with_recognizer(
        &self,
        recognizer: &dyn FaceRecognizer,
    ) -> Result<(FaceId, AttendanceOutcome)> {
        let face_id = recognizer.recognize().await.ok_or(Error::NoFaceRecognized)?;
        let outcome = self.mark_attendance(face_id).await?;
        Ok((face_id, outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognizer::MockFaceRecognizer;
    use crate::session::{DeviceSession, ReconnectPolicy, SessionOptions};
    use bioattend_core::{CommandCode, CommandSet};
    use bioattend_transport::mock::MockDevice;
    use pretty_assertions::assert_eq;

    async fn connected(device: &MockDevice) -> DeviceSession {
        let options = SessionOptions {
            command_set: CommandSet::all(),
            reconnect: ReconnectPolicy {
                initial_delay: Duration::from_millis(200),
                max_delay: Duration::from_secs(1),
                max_attempts: Some(3),
            },
            ..SessionOptions::default()
        };
        let session = DeviceSession::new(Box::new(device.transport()), options);
        session.connect(None).await.unwrap();
        session
    }

    #[test]
    fn test_match_attempt() {
        let mut attempt = MatchAttempt::begin(FaceId(3), 2);
        assert!(!attempt.is_exhausted());

        attempt.record(Some(5));
        attempt.record(None);

        assert!(attempt.is_exhausted());
        assert_eq!(attempt.last_fingerprint_id, Some(5));
    }

    #[test]
    fn test_outcome_into_result() {
        assert_eq!(AttendanceOutcome::Matched(3).into_result().unwrap(), 3);
        assert!(matches!(
            AttendanceOutcome::Exhausted.into_result(),
            Err(Error::Exhausted)
        ));
        assert!(matches!(
            AttendanceOutcome::Mismatch { expected: FaceId(3), got: 5 }.into_result(),
            Err(Error::Mismatch { got: 5, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_matched_on_third_scan() {
        let device = MockDevice::new();
        device.respond_in_sequence(CommandCode::Scan, ["ID:5", "ID:5", "ID:3"]);
        let session = connected(&device).await;
        let correlator = MatchCorrelator::new(session.handle());

        let outcome = correlator.mark_attendance(FaceId(3)).await.unwrap();

        assert_eq!(outcome, AttendanceOutcome::Matched(3));
        assert_eq!(device.count(CommandCode::Scan), 3);

        session.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_on_other_user() {
        let device = MockDevice::new();
        device.respond_always(CommandCode::Scan, ["ID:9"]);
        let session = connected(&device).await;
        let correlator = MatchCorrelator::new(session.handle());

        let outcome = correlator.mark_attendance(FaceId(3)).await.unwrap();

        assert_eq!(outcome, AttendanceOutcome::Exhausted);
        assert_eq!(device.count(CommandCode::Scan), 3);

        session.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_consume_attempts() {
        let device = MockDevice::new();
        let session = connected(&device).await;
        let correlator = MatchCorrelator::new(session.handle())
            .with_max_attempts(2)
            .with_scan_timeout(Duration::from_secs(12));

        let started = tokio::time::Instant::now();
        let outcome = correlator.mark_attendance(FaceId(1)).await.unwrap();

        assert_eq!(outcome, AttendanceOutcome::Exhausted);
        assert_eq!(device.count(CommandCode::Scan), 2);
        assert!(started.elapsed() >= Duration::from_secs(24));

        session.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_failure_reconnects() {
        let device = MockDevice::new();
        device.respond_always(CommandCode::Scan, ["ID:4"]);
        let session = connected(&device).await;
        let correlator = MatchCorrelator::new(session.handle());

        device.fail_writes(1);
        let outcome = correlator.mark_attendance(FaceId(4)).await.unwrap();

        assert_eq!(outcome, AttendanceOutcome::Matched(4));
        assert_eq!(device.open_count(), 2);
        assert!(session.is_connected());

        session.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_once() {
        let device = MockDevice::new();
        device.respond_in_sequence(CommandCode::Scan, ["ID:2", "ID:-1"]);
        let session = connected(&device).await;
        let correlator = MatchCorrelator::new(session.handle());

        assert_eq!(
            correlator.check_once(FaceId(6)).await.unwrap(),
            AttendanceOutcome::Mismatch { expected: FaceId(6), got: 2 }
        );
        assert_eq!(
            correlator.check_once(FaceId(6)).await.unwrap(),
            AttendanceOutcome::Exhausted
        );

        session.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_mark_with_recognizer() {
        let device = MockDevice::new();
        device.respond_always(CommandCode::Scan, ["ID:8"]);
        let session = connected(&device).await;
        let correlator = MatchCorrelator::new(session.handle());

        let mut recognizer = MockFaceRecognizer::new();
        recognizer.expect_recognize().times(1).returning(|| Some(FaceId(8)));

        let (face_id, outcome) = correlator.mark_with_recognizer(&recognizer).await.unwrap();
        assert_eq!(face_id, FaceId(8));
        assert_eq!(outcome, AttendanceOutcome::Matched(8));

        let mut nobody = MockFaceRecognizer::new();
        nobody.expect_recognize().returning(|| None);
        assert!(matches!(
            correlator.mark_with_recognizer(&nobody).await,
            Err(Error::NoFaceRecognized)
        ));

        session.disconnect().await;
    }
}
