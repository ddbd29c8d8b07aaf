//! Continuous attendance mode
//!
//! While active, the controller asks the sensor for a verification right
//! away and then once per interval. Every cycle waits for its answer (or its
//! timeout) before the next one can start.

use std::sync::Arc;
use std::time::Duration;

use bioattend_core::constants::{ATTENDANCE_POLL_INTERVAL, VERIFY_TIMEOUT};
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::session::DeviceHandle;

const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Attendance mode state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendanceModeState {
    Inactive,

    /// Waiting for the next tick
    ActivePolling,

    /// Verification sent, waiting for the sensor
    AwaitingResponse,
}

/// Attendance mode timing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceOptions {
    /// Time between verification requests
    pub interval: Duration,

    /// How long one request waits for an answer
    pub verify_timeout: Duration,
}

impl Default for AttendanceOptions {
    fn default() -> Self {
        Self {
            interval: ATTENDANCE_POLL_INTERVAL,
            verify_timeout: VERIFY_TIMEOUT,
        }
    }
}

/// Result of one verification cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttendanceEvent {
    /// Sensor identified a stored fingerprint
    Identified(u32),

    /// Sensor answered without a match
    NoMatch,

    /// No answer within the verify timeout
    TimedOut,

    /// Cycle failed for another reason
    Failed(String),
}

struct Poller {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Attendance mode controller
pub struct AttendanceMode {
    handle: DeviceHandle,
    options: AttendanceOptions,
    state: Arc<RwLock<AttendanceModeState>>,
    events: broadcast::Sender<AttendanceEvent>,
    poller: Mutex<Option<Poller>>,
}

impl AttendanceMode {
    pub fn new(handle: DeviceHandle, options: AttendanceOptions) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            handle,
            options,
            state: Arc::new(RwLock::new(AttendanceModeState::Inactive)),
            events,
            poller: Mutex::new(None),
        }
    }

    /// Get current state
    pub fn state(&self) -> AttendanceModeState {
        *self.state.read()
    }

    pub fn is_active(&self) -> bool {
        self.state() != AttendanceModeState::Inactive
    }

    /// Subscribe to cycle results
    pub fn subscribe(&self) -> broadcast::Receiver<AttendanceEvent> {
        self.events.subscribe()
    }

    /// Start polling
    ///
    /// # Errors
    ///
    /// Returns [`Error::AttendanceModeActive`] if already running.
    pub fn start(&self) -> Result<()> {
        let mut poller = self.poller.lock();

        if poller.as_ref().is_some_and(|p| !p.task.is_finished()) {
            return Err(Error::AttendanceModeActive);
        }

        *self.state.write() = AttendanceModeState::ActivePolling;

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_poller(
            self.handle.clone(),
            self.options.clone(),
            Arc::clone(&self.state),
            self.events.clone(),
            cancel.clone(),
        ));
        *poller = Some(Poller { cancel, task });

        info!("Attendance mode started (every {:?})", self.options.interval);
        Ok(())
    }

    /// Stop polling
    ///
    /// Cancels the cycle in flight. No request is sent after this returns.
    pub async fn stop(&self) {
        let poller = self.poller.lock().take();

        if let Some(poller) = poller {
            poller.cancel.cancel();
            if let Err(e) = poller.task.await {
                error!("Attendance poller failed: {}", e);
            }
            info!("Attendance mode stopped");
        }

        *self.state.write() = AttendanceModeState::Inactive;
    }

    /// Run a single verification outside the polling loop
    pub async fn verify_once(&self) -> Result<Option<u32>> {
        self.handle.verify_once(self.options.verify_timeout).await
    }
}

impl Drop for AttendanceMode {
    fn drop(&mut self) {
        if let Some(poller) = self.poller.get_mut().take() {
            poller.cancel.cancel();
        }
    }
}

async fn run_poller(
    handle: DeviceHandle,
    options: AttendanceOptions,
    state: Arc<RwLock<AttendanceModeState>>,
    events: broadcast::Sender<AttendanceEvent>,
    cancel: CancellationToken,
) {
    let mut ticker = interval(options.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if !handle.is_connected() {
            debug!("Skipping verification, device not connected");
            continue;
        }

        *state.write() = AttendanceModeState::AwaitingResponse;

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = handle.verify_once(options.verify_timeout) => result,
        };

        *state.write() = AttendanceModeState::ActivePolling;

        let event = match result {
            Ok(Some(id)) => {
                debug!("Verification matched fingerprint {}", id);
                AttendanceEvent::Identified(id)
            }
            Ok(None) => AttendanceEvent::NoMatch,
            Err(e) if e.is_timeout() => {
                debug!("No verification answer within {:?}", options.verify_timeout);
                AttendanceEvent::TimedOut
            }
            Err(e) => {
                warn!("Verification failed: {}", e);
                AttendanceEvent::Failed(e.to_string())
            }
        };

        let _ = events.send(event);
    }

    *state.write() = AttendanceModeState::Inactive;
}
