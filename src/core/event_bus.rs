//! In-process publish/subscribe bus.
//!
//! Dispatch is synchronous and in registration order, per event kind. There
//! is no buffering and no replay: a handler only sees events emitted while
//! it is registered.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::domain::{EngineEvent, EventKind, LogEvent};

type Handler = Arc<dyn Fn(&EngineEvent) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    handlers: Mutex<HashMap<EventKind, Vec<(u64, Handler)>>>,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, HashMap<EventKind, Vec<(u64, Handler)>>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Process-wide event bus; clones share the same registry
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Registry>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatch an event to every handler currently registered for its kind.
    ///
    /// Handlers run on the caller's thread. The handler list is snapshotted
    /// first, so handlers may emit or (un)subscribe re-entrantly.
    pub fn emit(&self, event: EngineEvent) {
        let handlers: Vec<Handler> = {
            let map = self.registry.lock();
            match map.get(&event.kind()) {
                Some(list) => list.iter().map(|(_, h)| Arc::clone(h)).collect(),
                None => return,
            }
        };

        for handler in handlers {
            handler(&event);
        }
    }

    /// Register a handler for one event kind
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&EngineEvent) + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry
            .lock()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));

        Subscription {
            registry: Arc::downgrade(&self.registry),
            kind,
            id,
        }
    }

    /// Mirror a log line to `tracing`, then emit it
    pub fn log(&self, event: LogEvent) {
        event.trace();
        self.emit(EngineEvent::Log(event));
    }

    /// Number of handlers registered for a kind
    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.registry.lock().get(&kind).map_or(0, Vec::len)
    }
}

/// Token returned by [`EventBus::subscribe`].
///
/// Dropping it leaves the handler registered; call [`Subscription::unsubscribe`]
/// to remove exactly that handler.
pub struct Subscription {
    registry: Weak<Registry>,
    kind: EventKind,
    id: u64,
}

impl Subscription {
    /// Remove the handler this token was issued for
    pub fn unsubscribe(self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut map = registry.lock();
        if let Some(list) = map.get_mut(&self.kind) {
            list.retain(|(id, _)| *id != self.id);
        }
    }
}
