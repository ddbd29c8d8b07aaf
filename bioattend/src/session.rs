//! Device session management
//!
//! A session owns the transport and the background listener that drains it.
//! It tracks the connection state machine:
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──open ok──▶ Connected
//!       ▲                        ▲                      │ I/O failure
//!       │ give up / disconnect   └──── reconnect ◀── Faulted
//! ```
//!
//! Other components reach the device through a [`DeviceHandle`], which does
//! not keep the session alive and cannot change its lifecycle.

use std::sync::{Arc, Weak};
use std::time::Duration;

use bioattend_core::constants::LISTENER_POLL_INTERVAL;
use bioattend_core::{Command, CommandCode, CommandSet, ResponseEvent};
use bioattend_protocol::{ProtocolEngine, SharedTransport};
use bioattend_transport::Transport;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::notification::DeviceNotification;

/// Capacity of the notification channel
const NOTIFICATION_CHANNEL_CAPACITY: usize = 64;

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No link
    Disconnected,

    /// Opening or reopening the port
    Connecting,

    /// Link up, listener draining it
    Connected,

    /// Link failed, reconnection pending
    Faulted,
}

/// Backoff policy for reconnection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first reopen
    pub initial_delay: Duration,

    /// Upper bound for the doubled delay
    pub max_delay: Duration,

    /// Consecutive failures before giving up (`None` retries forever)
    pub max_attempts: Option<u32>,
}

impl ReconnectPolicy {
    /// Delay before attempt number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_delay
            .saturating_mul(1 << exponent)
            .min(self.max_delay)
    }

    fn gives_up_after(&self, attempt: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempt >= max)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: Some(5),
        }
    }
}

/// Session settings
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Commands the firmware accepts
    pub command_set: CommandSet,

    /// Listener read window
    pub poll_interval: Duration,

    pub reconnect: ReconnectPolicy,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            command_set: CommandSet::default(),
            poll_interval: LISTENER_POLL_INTERVAL,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// State shared by the session, its listener and device handles
struct SessionShared {
    transport: SharedTransport,
    engine: ProtocolEngine,
    state: RwLock<SessionState>,
    port_hint: RwLock<Option<String>>,
    notifications: broadcast::Sender<DeviceNotification>,
    recovery: tokio::sync::Mutex<()>,
    options: SessionOptions,
}

impl SessionShared {
    fn state(&self) -> SessionState {
        *self.state.read()
    }

    fn notify(&self, notification: DeviceNotification) {
        // No subscribers is fine
        let _ = self.notifications.send(notification);
    }

    /// Move to `next` if the current state satisfies `allowed`
    ///
    /// Publishes a connection status on entering or leaving `Connected`.
    fn transition_if(&self, allowed: impl Fn(SessionState) -> bool, next: SessionState) -> bool {
        let previous = {
            let mut state = self.state.write();
            if !allowed(*state) {
                return false;
            }
            std::mem::replace(&mut *state, next)
        };

        if previous != next {
            debug!("Session {:?} -> {:?}", previous, next);

            let was_connected = previous == SessionState::Connected;
            let is_connected = next == SessionState::Connected;
            if was_connected != is_connected {
                self.notify(DeviceNotification::ConnectionStatus(is_connected));
            }
        }
        true
    }

    fn set_state(&self, next: SessionState) {
        self.transition_if(|_| true, next);
    }

    /// Record a link failure seen while connected
    fn mark_faulted(&self, reason: &dyn std::fmt::Display) -> bool {
        if !self.transition_if(|s| s == SessionState::Connected, SessionState::Faulted) {
            return false;
        }

        warn!("Link failure: {}", reason);
        self.engine.cancel_pending();
        true
    }

    /// Convert engine results, faulting the session on link errors
    fn observe<T>(&self, result: bioattend_protocol::Result<T>) -> Result<T> {
        if let Err(bioattend_protocol::Error::Transport(e)) = &result {
            if e.is_fatal() {
                self.mark_faulted(e);
            }
        }
        result.map_err(Error::from)
    }

    async fn send(&self, command: Command) -> Result<()> {
        let result = self.engine.send(command).await;
        self.observe(result)
    }

    async fn request<P>(&self, command: Command, predicate: P, timeout: Duration) -> Result<ResponseEvent>
    where
        P: Fn(&ResponseEvent) -> bool + Clone + Send + 'static,
    {
        let result = self.engine.request(command, predicate, timeout).await;
        self.observe(result)
    }

    /// Ask the sensor to report in
    async fn ping(&self) {
        if !self.options.command_set.supports(CommandCode::CheckSensor) {
            return;
        }

        if let Err(e) = self.send(Command::check_sensor()).await {
            warn!("Sensor check failed: {}", e);
        }
    }

    async fn read_line(&self) -> bioattend_transport::Result<Option<String>> {
        let mut transport = self.transport.lock().await;
        transport.read_line(self.options.poll_interval).await
    }

    /// Parse a line and publish what it means to subscribers
    fn dispatch(&self, line: &str) {
        let notification = match self.engine.handle_line(line) {
            ResponseEvent::Match(id) => DeviceNotification::MatchFound(id),
            ResponseEvent::Enrolled => DeviceNotification::EnrollmentCompleted,
            ResponseEvent::StatusText(text) => DeviceNotification::StatusMessage(text),
            // Scan answers belong to whoever asked
            ResponseEvent::IdResult(_) | ResponseEvent::Unrecognized(_) => return,
        };
        self.notify(notification);
    }

    /// Bring a faulted session back to `Connected`
    ///
    /// Runs close / backoff / reopen cycles until one succeeds or the policy
    /// gives up. Concurrent callers wait for the cycle in progress.
    async fn recover(&self) -> Result<()> {
        let _guard = self.recovery.lock().await;

        match self.state() {
            SessionState::Connected => return Ok(()),
            SessionState::Disconnected => return Err(Error::NotConnected),
            SessionState::Faulted | SessionState::Connecting => {}
        }

        let policy = &self.options.reconnect;
        let mut attempt = 0;

        loop {
            attempt += 1;

            if !self.transition_if(
                |s| matches!(s, SessionState::Faulted | SessionState::Connecting),
                SessionState::Connecting,
            ) {
                return Err(Error::NotConnected);
            }

            let delay = policy.delay_for(attempt);
            info!("Reconnecting in {:?} (attempt {})", delay, attempt);
            self.notify(DeviceNotification::ReconnectAttempt { attempt, delay });

            if let Err(e) = self.transport.lock().await.close().await {
                debug!("Close before reconnect failed: {}", e);
            }
            sleep(delay).await;

            let hint = self.port_hint.read().clone();
            let opened = self.transport.lock().await.open(hint.as_deref()).await;

            match opened {
                Ok(()) => {
                    if !self.transition_if(|s| s == SessionState::Connecting, SessionState::Connected) {
                        // Disconnected while reopening
                        let _ = self.transport.lock().await.close().await;
                        return Err(Error::NotConnected);
                    }

                    info!("Reconnected after {} attempt(s)", attempt);
                    self.ping().await;
                    return Ok(());
                }
                Err(e) => {
                    warn!("Reconnect attempt {} failed: {}", attempt, e);
                    self.notify(DeviceNotification::ReconnectFailed {
                        attempt,
                        reason: e.to_string(),
                    });

                    if policy.gives_up_after(attempt) {
                        error!("Giving up after {} reconnect attempt(s)", attempt);
                        self.set_state(SessionState::Disconnected);
                        self.notify(DeviceNotification::ConnectionLost { attempts: attempt });
                        return Err(Error::ReconnectFailed { attempts: attempt });
                    }
                }
            }
        }
    }
}

/// Background task draining the transport
async fn run_listener(shared: Arc<SessionShared>, cancel: CancellationToken) {
    debug!("Listener started");

    loop {
        match shared.state() {
            SessionState::Connected => {
                let read = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    read = shared.read_line() => read,
                };

                match read {
                    Ok(Some(line)) => shared.dispatch(&line),
                    Ok(None) => {}
                    Err(e) if !e.is_fatal() => debug!("Dropped line: {}", e),
                    Err(e) => {
                        shared.mark_faulted(&e);
                    }
                }
            }
            SessionState::Faulted => {
                let recovered = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    recovered = shared.recover() => recovered,
                };

                if let Err(e) = recovered {
                    warn!("Listener stopping: {}", e);
                    break;
                }
            }
            SessionState::Connecting => {
                // Someone else is reconnecting
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = sleep(shared.options.poll_interval) => {}
                }
            }
            SessionState::Disconnected => break,
        }
    }

    debug!("Listener stopped");
}

struct Listener {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Connection to one sensor board
///
/// # Examples
///
/// ```no_run
/// use bioattend::{DeviceSession, SessionOptions};
/// use bioattend_transport::SerialTransport;
///
/// #[tokio::main]
/// async fn main() -> bioattend::Result<()> {
///     let session = DeviceSession::new(Box::new(SerialTransport::default()), SessionOptions::default());
///
///     session.connect(None).await?;
///     session.handle().enroll(3).await?;
///
///     session.disconnect().await;
///     Ok(())
/// }
/// ```
pub struct DeviceSession {
    shared: Arc<SessionShared>,
    listener: Mutex<Option<Listener>>,
}

impl DeviceSession {
    /// Create a disconnected session over `transport`
    pub fn new(transport: Box<dyn Transport>, options: SessionOptions) -> Self {
        let transport: SharedTransport = Arc::new(tokio::sync::Mutex::new(transport));
        let engine = ProtocolEngine::new(Arc::downgrade(&transport), options.command_set);
        let (notifications, _) = broadcast::channel(NOTIFICATION_CHANNEL_CAPACITY);

        Self {
            shared: Arc::new(SessionShared {
                transport,
                engine,
                state: RwLock::new(SessionState::Disconnected),
                port_hint: RwLock::new(None),
                notifications,
                recovery: tokio::sync::Mutex::new(()),
                options,
            }),
            listener: Mutex::new(None),
        }
    }

    /// Get current state
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Subscribe to session notifications
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceNotification> {
        self.shared.notifications.subscribe()
    }

    /// Subscribe to every parsed response event
    pub fn subscribe_events(&self) -> broadcast::Receiver<ResponseEvent> {
        self.shared.engine.subscribe()
    }

    /// Capability handle for device operations
    pub fn handle(&self) -> DeviceHandle {
        DeviceHandle {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Connect to the sensor
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The session is not disconnected
    /// - No port is available or it cannot be opened
    pub async fn connect(&self, port_hint: Option<&str>) -> Result<()> {
        if !self
            .shared
            .transition_if(|s| s == SessionState::Disconnected, SessionState::Connecting)
        {
            return Err(Error::AlreadyConnected);
        }

        // A listener that gave up on reconnecting has already exited
        self.join_listener().await;

        *self.shared.port_hint.write() = port_hint.map(str::to_string);
        info!("Connecting to {}...", port_hint.unwrap_or("<auto>"));

        let opened = self.shared.transport.lock().await.open(port_hint).await;
        if let Err(e) = opened {
            warn!("Connect failed: {}", e);
            self.shared.set_state(SessionState::Disconnected);
            return Err(Error::ConnectFailed(e));
        }

        if !self
            .shared
            .transition_if(|s| s == SessionState::Connecting, SessionState::Connected)
        {
            let _ = self.shared.transport.lock().await.close().await;
            return Err(Error::NotConnected);
        }

        info!(
            "Connected to {}",
            self.shared.transport.lock().await.port_name()
        );

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_listener(Arc::clone(&self.shared), cancel.clone()));
        *self.listener.lock() = Some(Listener { cancel, task });

        self.shared.ping().await;
        Ok(())
    }

    /// Disconnect from the sensor
    ///
    /// Stops and joins the listener and cancels pending waits before
    /// returning. Safe to call in any state, any number of times.
    pub async fn disconnect(&self) {
        let previous = self.state();
        self.shared.set_state(SessionState::Disconnected);

        self.join_listener().await;

        if let Err(e) = self.shared.transport.lock().await.close().await {
            warn!("Close failed: {}", e);
        }
        self.shared.engine.cancel_pending();

        if previous != SessionState::Disconnected {
            info!("Disconnected");
        }
    }

    async fn join_listener(&self) {
        let listener = self.listener.lock().take();

        if let Some(listener) = listener {
            listener.cancel.cancel();
            if let Err(e) = listener.task.await {
                error!("Listener task failed: {}", e);
            }
        }
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.get_mut().take() {
            listener.cancel.cancel();
            if self.shared.state() != SessionState::Disconnected {
                warn!("Device session dropped while still connected");
            }
        }
    }
}

/// Non-owning handle to a device session
///
/// Handles issue commands but never open or close the link. Once the
/// session is dropped every call fails with [`Error::NotConnected`].
#[derive(Clone)]
pub struct DeviceHandle {
    shared: Weak<SessionShared>,
}

impl DeviceHandle {
    fn shared(&self) -> Result<Arc<SessionShared>> {
        self.shared.upgrade().ok_or(Error::NotConnected)
    }

    /// Get session state
    pub fn state(&self) -> SessionState {
        self.shared
            .upgrade()
            .map(|shared| shared.state())
            .unwrap_or(SessionState::Disconnected)
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Commands accepted by the firmware
    pub fn command_set(&self) -> CommandSet {
        self.shared
            .upgrade()
            .map(|shared| shared.options.command_set)
            .unwrap_or_else(CommandSet::empty)
    }

    /// Subscribe to session notifications
    pub fn subscribe(&self) -> Result<broadcast::Receiver<DeviceNotification>> {
        Ok(self.shared()?.notifications.subscribe())
    }

    /// Send a command without waiting for an answer
    pub async fn send(&self, command: Command) -> Result<()> {
        self.shared()?.send(command).await
    }

    /// Send a command and wait for the first event accepted by `predicate`
    pub async fn request<P>(&self, command: Command, predicate: P, timeout: Duration) -> Result<ResponseEvent>
    where
        P: Fn(&ResponseEvent) -> bool + Clone + Send + 'static,
    {
        self.shared()?.request(command, predicate, timeout).await
    }

    /// Start fingerprint enrollment into slot `user_id`
    pub async fn enroll(&self, user_id: u32) -> Result<()> {
        self.send(Command::enroll(user_id)).await
    }

    /// Start fingerprint verification
    pub async fn verify(&self) -> Result<()> {
        self.send(Command::verify()).await
    }

    /// Delete the template in slot `user_id`
    pub async fn delete(&self, user_id: u32) -> Result<()> {
        self.send(Command::delete(user_id)).await
    }

    /// Ask for the number of stored templates
    pub async fn count(&self) -> Result<()> {
        self.send(Command::count()).await
    }

    /// Erase every stored template
    pub async fn empty_database(&self) -> Result<()> {
        warn!("Emptying sensor database...");
        self.send(Command::empty_database()).await
    }

    /// Check that the sensor responds
    pub async fn check_sensor(&self) -> Result<()> {
        self.send(Command::check_sensor()).await
    }

    /// Start a scan query
    pub async fn scan(&self) -> Result<()> {
        self.send(Command::scan()).await
    }

    /// Run one verification and return the matched fingerprint ID
    ///
    /// Uses `V` when the firmware has it and `S` otherwise; accepts either a
    /// `F:MATCH:` or an `ID:` answer.
    pub async fn verify_once(&self, timeout: Duration) -> Result<Option<u32>> {
        let code = self
            .command_set()
            .verification_code()
            .ok_or(bioattend_core::Error::Unsupported(CommandCode::Verify))?;

        let event = self
            .request(Command::new(code), ResponseEvent::is_verification_result, timeout)
            .await?;
        Ok(event.fingerprint_id())
    }

    /// Run one scan query and return the reported fingerprint ID
    pub async fn scan_once(&self, timeout: Duration) -> Result<Option<u32>> {
        let event = self
            .request(Command::scan(), ResponseEvent::is_id_result, timeout)
            .await?;
        Ok(event.fingerprint_id())
    }

    /// Enroll slot `user_id` and wait for the sensor to confirm
    pub async fn enroll_and_wait(&self, user_id: u32, timeout: Duration) -> Result<()> {
        self.request(
            Command::enroll(user_id),
            |event| matches!(event, ResponseEvent::Enrolled),
            timeout,
        )
        .await?;
        Ok(())
    }

    /// Reconnect after a link failure
    ///
    /// Returns immediately if the session is already connected again.
    pub async fn reconnect(&self) -> Result<()> {
        let shared = self.shared()?;

        if shared.state() == SessionState::Connected {
            return Ok(());
        }
        shared.recover().await
    }
}
