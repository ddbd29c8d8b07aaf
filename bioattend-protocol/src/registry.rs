//! Pending response waiters
//!
//! The listener is the only reader of the transport. Callers that expect a
//! response register a predicate here and are woken through a oneshot
//! channel; they never touch the transport themselves.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bioattend_core::ResponseEvent;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::trace;

use crate::error::{Error, Result};

type Predicate = Box<dyn Fn(&ResponseEvent) -> bool + Send>;

struct Pending {
    id: u64,
    predicate: Predicate,
    tx: oneshot::Sender<Result<ResponseEvent>>,
}

#[derive(Default)]
struct RegistryState {
    pending: VecDeque<Pending>,
    next_id: u64,
}

/// FIFO list of pending waiters
///
/// An event is handed to the oldest waiter whose predicate accepts it, and
/// to no other waiter.
#[derive(Default)]
pub struct Registry {
    state: Mutex<RegistryState>,
}

impl Registry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a waiter for the first event accepted by `predicate`
    pub fn register<P>(self: &Arc<Self>, predicate: P) -> Waiter
    where
        P: Fn(&ResponseEvent) -> bool + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();

        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id = state.next_id.wrapping_add(1);
        state.pending.push_back(Pending {
            id,
            predicate: Box::new(predicate),
            tx,
        });

        trace!("Registered waiter {} ({} pending)", id, state.pending.len());

        Waiter {
            id,
            rx,
            registry: Arc::clone(self),
        }
    }

    /// Deliver an event to the oldest matching waiter
    ///
    /// Returns `true` if a waiter took the event.
    pub fn dispatch(&self, event: &ResponseEvent) -> bool {
        let mut state = self.state.lock();

        let Some(pos) = state.pending.iter().position(|p| (p.predicate)(event)) else {
            return false;
        };

        if let Some(pending) = state.pending.remove(pos) {
            trace!("Waiter {} matched {}", pending.id, event);
            let _ = pending.tx.send(Ok(event.clone()));
        }
        true
    }

    /// Fail every pending waiter with [`Error::Cancelled`]
    ///
    /// Returns the number of waiters cancelled.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<Pending> = self.state.lock().pending.drain(..).collect();
        let count = drained.len();

        for pending in drained {
            let _ = pending.tx.send(Err(Error::Cancelled));
        }

        count
    }

    /// Number of pending waiters
    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(&self, id: u64) {
        self.state.lock().pending.retain(|p| p.id != id);
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("pending", &self.len())
            .finish()
    }
}

/// Handle to a registered waiter
///
/// Dropping it withdraws the registration.
#[derive(Debug)]
pub struct Waiter {
    id: u64,
    rx: oneshot::Receiver<Result<ResponseEvent>>,
    registry: Arc<Registry>,
}

impl Waiter {
    /// Wait for the matching event
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if nothing matched within `timeout`
    /// - [`Error::Cancelled`] if the registry was cancelled
    pub async fn wait(mut self, timeout: Duration) -> Result<ResponseEvent> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::Cancelled),
            Err(_) => {
                self.registry.remove(self.id);

                // Delivered between the deadline and the removal
                match self.rx.try_recv() {
                    Ok(result) => result,
                    Err(_) => Err(Error::Timeout { after: timeout }),
                }
            }
        }
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const WAIT: Duration = Duration::from_millis(100);

    #[tokio::test]
    async fn test_fifo_delivery() {
        let registry = Registry::new();

        let first = registry.register(ResponseEvent::is_id_result);
        let second = registry.register(ResponseEvent::is_id_result);
        assert_eq!(registry.len(), 2);

        assert!(registry.dispatch(&ResponseEvent::IdResult(Some(1))));
        assert!(registry.dispatch(&ResponseEvent::IdResult(Some(2))));

        assert_eq!(first.wait(WAIT).await.unwrap(), ResponseEvent::IdResult(Some(1)));
        assert_eq!(second.wait(WAIT).await.unwrap(), ResponseEvent::IdResult(Some(2)));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_event_goes_to_one_waiter_only() {
        let registry = Registry::new();

        let first = registry.register(|_| true);
        let second = registry.register(|_| true);

        assert!(registry.dispatch(&ResponseEvent::Enrolled));
        assert_eq!(first.wait(WAIT).await.unwrap(), ResponseEvent::Enrolled);
        assert!(second.wait(WAIT).await.unwrap_err().is_timeout());
    }

    #[tokio::test]
    async fn test_predicate_skips_non_matching() {
        let registry = Registry::new();
        let waiter = registry.register(|e| matches!(e, ResponseEvent::Match(_)));

        assert!(!registry.dispatch(&ResponseEvent::StatusText("Place finger".into())));
        assert!(registry.dispatch(&ResponseEvent::Match(4)));
        assert_eq!(waiter.wait(WAIT).await.unwrap(), ResponseEvent::Match(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_removes_waiter() {
        let registry = Registry::new();
        let waiter = registry.register(|_| true);

        let started = tokio::time::Instant::now();
        let err = waiter.wait(Duration::from_secs(2)).await.unwrap_err();

        assert!(matches!(err, Error::Timeout { after } if after == Duration::from_secs(2)));
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_all() {
        let registry = Registry::new();
        let waiter = registry.register(|_| true);

        assert_eq!(registry.cancel_all(), 1);
        assert!(matches!(waiter.wait(WAIT).await, Err(Error::Cancelled)));
    }

    #[test]
    fn test_drop_withdraws_registration() {
        let registry = Registry::new();
        let waiter = registry.register(|_| true);
        drop(waiter);

        assert!(registry.is_empty());
        assert!(!registry.dispatch(&ResponseEvent::Enrolled));
    }
}
