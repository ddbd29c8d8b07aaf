//! Protocol engine
//!
//! Turns typed commands into frames and incoming lines into events. The
//! engine does not own the link: it holds a weak reference for writes, and
//! the session's listener feeds it lines through [`ProtocolEngine::handle_line`].

use std::sync::{Arc, Weak};
use std::time::Duration;

use bioattend_core::constants::LATE_REPLY_GRACE;
use bioattend_core::{parse_line, Command, CommandSet, ResponseEvent};
use bioattend_transport::Transport;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::registry::{Registry, Waiter};

/// Transport shared between the session (owner) and the engine (writer)
pub type SharedTransport = Arc<Mutex<Box<dyn Transport>>>;

/// Capacity of the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Protocol engine
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use bioattend_core::{Command, CommandCode, CommandSet, ResponseEvent};
/// use bioattend_protocol::{ProtocolEngine, SharedTransport};
/// use bioattend_transport::{mock::MockDevice, Transport};
/// use tokio::sync::Mutex;
///
/// #[tokio::main]
/// async fn main() -> bioattend_protocol::Result<()> {
///     let device = MockDevice::new();
///     let transport: SharedTransport = Arc::new(Mutex::new(Box::new(device.transport())));
///     transport.lock().await.open(None).await?;
///
///     let engine = ProtocolEngine::new(Arc::downgrade(&transport), CommandSet::CHARACTER);
///     engine.send(Command::enroll(5)).await?;
///     assert_eq!(device.count(CommandCode::Enroll), 1);
///
///     assert_eq!(engine.handle_line("F:MATCH:5"), ResponseEvent::Match(5));
///     Ok(())
/// }
/// ```
pub struct ProtocolEngine {
    transport: Weak<Mutex<Box<dyn Transport>>>,
    command_set: CommandSet,
    registry: Arc<Registry>,
    events: broadcast::Sender<ResponseEvent>,
    request_lock: Mutex<()>,
}

impl ProtocolEngine {
    /// Create engine writing through `transport`
    pub fn new(transport: Weak<Mutex<Box<dyn Transport>>>, command_set: CommandSet) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            transport,
            command_set,
            registry: Registry::new(),
            events,
            request_lock: Mutex::new(()),
        }
    }

    /// Commands accepted by the attached firmware
    pub fn command_set(&self) -> CommandSet {
        self.command_set
    }

    /// Subscribe to every recognized event
    pub fn subscribe(&self) -> broadcast::Receiver<ResponseEvent> {
        self.events.subscribe()
    }

    /// Send a command frame
    ///
    /// # Errors
    ///
    /// - [`Error::Core`] if the command set does not include the command
    /// - [`Error::NotConnected`] if the link is closed
    /// - [`Error::Transport`] if the write fails
    pub async fn send(&self, command: Command) -> Result<()> {
        self.command_set.check(command.code)?;

        let transport = self.transport.upgrade().ok_or(Error::NotConnected)?;
        let mut transport = transport.lock().await;

        if !transport.is_open() {
            return Err(Error::NotConnected);
        }

        debug!("Sending {}", command);
        transport.write(&command.encode()).await?;

        Ok(())
    }

    /// Parse one line and deliver the event
    ///
    /// The event goes to the oldest matching waiter and to all subscribers.
    /// Unrecognized lines are logged and dropped.
    pub fn handle_line(&self, raw: &str) -> ResponseEvent {
        let event = parse_line(raw);

        if let ResponseEvent::Unrecognized(line) = &event {
            warn!("Dropping unrecognized line: {:?}", line);
            return event;
        }

        trace!("Received {}", event);

        self.registry.dispatch(&event);
        // No subscribers is fine
        let _ = self.events.send(event.clone());

        event
    }

    /// Register interest in the next event accepted by `predicate`
    ///
    /// Registering before sending the request guarantees a fast answer is
    /// not missed.
    pub fn register<P>(&self, predicate: P) -> Waiter
    where
        P: Fn(&ResponseEvent) -> bool + Send + 'static,
    {
        self.registry.register(predicate)
    }

    /// Wait for the next event accepted by `predicate`
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if nothing matched within `timeout`
    /// - [`Error::Cancelled`] if pending waits were cancelled
    pub async fn await_event<P>(&self, predicate: P, timeout: Duration) -> Result<ResponseEvent>
    where
        P: Fn(&ResponseEvent) -> bool + Send + 'static,
    {
        self.register(predicate).wait(timeout).await
    }

    /// Send a command and wait for its response
    ///
    /// Only one request is in flight at a time; later callers queue behind
    /// the current one. After a timeout the request keeps the lock for
    /// [`LATE_REPLY_GRACE`] and swallows its own answer if it shows up, so
    /// a slow answer is not taken for the next request's.
    pub async fn request<P>(
        &self,
        command: Command,
        predicate: P,
        timeout: Duration,
    ) -> Result<ResponseEvent>
    where
        P: Fn(&ResponseEvent) -> bool + Clone + Send + 'static,
    {
        let _guard = self.request_lock.lock().await;

        let waiter = self.register(predicate.clone());
        self.send(command).await?;

        match waiter.wait(timeout).await {
            Err(e) if e.is_timeout() => {
                self.discard_late_reply(predicate).await;
                Err(e)
            }
            result => result,
        }
    }

    async fn discard_late_reply<P>(&self, predicate: P)
    where
        P: Fn(&ResponseEvent) -> bool + Send + 'static,
    {
        if let Ok(event) = self.register(predicate).wait(LATE_REPLY_GRACE).await {
            debug!("Discarded late answer {}", event);
        }
    }

    /// Fail all pending waits with [`Error::Cancelled`]
    pub fn cancel_pending(&self) -> usize {
        let count = self.registry.cancel_all();
        if count > 0 {
            debug!("Cancelled {} pending wait(s)", count);
        }
        count
    }

    /// Number of pending waits
    pub fn pending(&self) -> usize {
        self.registry.len()
    }
}
