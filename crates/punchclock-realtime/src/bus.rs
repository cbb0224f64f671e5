use std::cell::Cell;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{error, warn};

use punchclock_types::events::{DomainEvent, EventKind};

/// Nesting allowed for `publish`: a top-level publish plus one re-entrant
/// publish from inside a listener.
const MAX_DISPATCH_DEPTH: usize = 2;

thread_local! {
    static DISPATCH_DEPTH: Cell<usize> = const { Cell::new(0) };
}

type Listener = Arc<dyn Fn(&DomainEvent) + Send + Sync>;

/// Identifies one registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerToken {
    kind: EventKind,
    id: u64,
}

impl ListenerToken {
    pub fn kind(&self) -> EventKind {
        self.kind
    }
}

struct Entry {
    id: u64,
    /// Cleared on unsubscribe so an in-flight publish skips the listener.
    active: Arc<AtomicBool>,
    listener: Listener,
}

/// Synchronous publish/subscribe registry keyed by event kind.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    listeners: RwLock<HashMap<EventKind, Vec<Entry>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                listeners: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register a listener for one kind. Listeners run in registration order.
    pub fn subscribe<F>(&self, kind: EventKind, listener: F) -> ListenerToken
    where
        F: Fn(&DomainEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push(Entry {
                id,
                active: Arc::new(AtomicBool::new(true)),
                listener: Arc::new(listener),
            });
        ListenerToken { kind, id }
    }

    /// Like `subscribe`, but the listener is removed when the guard drops.
    pub fn subscription<F>(&self, kind: EventKind, listener: F) -> Subscription
    where
        F: Fn(&DomainEvent) + Send + Sync + 'static,
    {
        Subscription {
            bus: self.clone(),
            token: Some(self.subscribe(kind, listener)),
        }
    }

    /// Remove a listener. Returns false if it was already gone.
    ///
    /// Once this returns the listener is never invoked again, including by a
    /// publish that is already iterating over its snapshot.
    pub fn unsubscribe(&self, token: ListenerToken) -> bool {
        let mut listeners = self
            .inner
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(entries) = listeners.get_mut(&token.kind) else {
            return false;
        };
        let Some(pos) = entries.iter().position(|e| e.id == token.id) else {
            return false;
        };
        let entry = entries.remove(pos);
        entry.active.store(false, Ordering::Release);
        if entries.is_empty() {
            listeners.remove(&token.kind);
        }
        true
    }

    /// Deliver an event to every listener registered for its kind.
    ///
    /// Returns the number of listeners that ran to completion. A panicking
    /// listener is logged and skipped.
    pub fn publish(&self, event: &DomainEvent) -> usize {
        let depth = DISPATCH_DEPTH.with(Cell::get);
        if depth >= MAX_DISPATCH_DEPTH {
            warn!("Dropping nested {} publish at depth {}", event.kind, depth);
            return 0;
        }

        let snapshot: Vec<(Arc<AtomicBool>, Listener)> = {
            let listeners = self
                .inner
                .listeners
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            match listeners.get(&event.kind) {
                Some(entries) => entries
                    .iter()
                    .map(|e| (e.active.clone(), e.listener.clone()))
                    .collect(),
                None => return 0,
            }
        };

        DISPATCH_DEPTH.with(|d| d.set(depth + 1));
        let _restore = DepthRestore(depth);

        let mut delivered = 0;
        for (active, listener) in snapshot {
            if !active.load(Ordering::Acquire) {
                continue;
            }
            match panic::catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(()) => delivered += 1,
                Err(payload) => {
                    let reason = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".into());
                    error!("Listener for {} panicked: {}", event.kind, reason);
                }
            }
        }
        delivered
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.inner
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .map_or(0, Vec::len)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

struct DepthRestore(usize);

impl Drop for DepthRestore {
    fn drop(&mut self) {
        DISPATCH_DEPTH.with(|d| d.set(self.0));
    }
}

/// Listener registration tied to a scope.
pub struct Subscription {
    bus: EventBus,
    token: Option<ListenerToken>,
}

impl Subscription {
    pub fn token(&self) -> Option<ListenerToken> {
        self.token
    }

    pub fn cancel(&mut self) {
        if let Some(token) = self.token.take() {
            self.bus.unsubscribe(token);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}
