use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::events::EngineEvent;

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Opaque handle identifying a registered observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Box<dyn Fn(&EngineEvent) + Send + Sync>;

struct BusInner {
    handlers: Vec<(SubscriptionId, Handler)>,
    channels: Vec<flume::Sender<EngineEvent>>,
    next_id: u64,
}

/// Single-producer, multi-consumer fan-out of engine events.
///
/// Observers register a handler with [`subscribe`]; delivery is synchronous
/// in the producer's execution context and in registration order -- an event
/// published after another is observed after it by every observer. A
/// panicking observer is isolated and logged; it never affects other
/// observers or the engine. Handlers must be non-blocking; observers that
/// need their own thread or task should use [`subscribe_channel`] instead,
/// which hands them a receiving end to drain at their own pace.
///
/// The bus is thread-safe and can be cloned cheaply (it wraps its internals
/// in an `Arc`).
///
/// [`subscribe`]: EventBus::subscribe
/// [`subscribe_channel`]: EventBus::subscribe_channel
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
}

impl EventBus {
    /// Create a new, empty event bus with no subscribers.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(BusInner {
                handlers: Vec::new(),
                channels: Vec::new(),
                next_id: 0,
            })),
        }
    }

    /// Register an observer handler. Returns an id for [`unsubscribe`].
    ///
    /// [`unsubscribe`]: EventBus::unsubscribe
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&EngineEvent) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock().expect("EventBus lock poisoned");
        let id = SubscriptionId(inner.next_id);
        inner.next_id += 1;
        inner.handlers.push((id, Box::new(handler)));
        id
    }

    /// Remove an observer. Unknown or already-removed ids are a no-op.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut inner = self.inner.lock().expect("EventBus lock poisoned");
        inner.handlers.retain(|(handler_id, _)| *handler_id != id);
    }

    /// Register a channel-backed subscriber for observers that need an
    /// async boundary (e.g. a UI renderer on its own task).
    ///
    /// The returned receiver sees every event published from this point
    /// forward. Disconnected receivers are pruned on publish.
    pub fn subscribe_channel(&self) -> flume::Receiver<EngineEvent> {
        let (tx, rx) = flume::unbounded();
        let mut inner = self.inner.lock().expect("EventBus lock poisoned");
        inner.channels.push(tx);
        rx
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: EngineEvent) {
        let mut inner = self.inner.lock().expect("EventBus lock poisoned");
        for (id, handler) in &inner.handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                warn!(subscription = id.0, kind = event.kind(), "event observer panicked");
            }
        }
        inner.channels.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Return the number of currently active subscribers.
    pub fn subscriber_count(&self) -> usize {
        let inner = self.inner.lock().expect("EventBus lock poisoned");
        inner.handlers.len() + inner.channels.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
