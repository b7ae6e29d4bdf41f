//! Typed publish/subscribe for engine events
//!
//! Listeners are registered per [`SyncEventKind`] and called synchronously in
//! registration order. A panicking listener is logged and skipped; it never
//! reaches the publisher or prevents delivery to the remaining listeners.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::{error, trace};

use verdant_core::domain::{SyncEvent, SyncEventKind};

// ============================================================================
// Subscription
// ============================================================================

/// Handle returned by listener registration
///
/// Dropping the handle keeps the listener registered; call
/// [`Subscription::unsubscribe`] to remove it.
#[must_use = "keep the subscription to be able to unsubscribe"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Removes the listener
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

// ============================================================================
// Listeners
// ============================================================================

type Callback<T> = dyn Fn(&T) + Send + Sync;

/// Ordered listener list shared by the event bus and the state store
pub(crate) struct Listeners<T> {
    entries: Mutex<Vec<(u64, Arc<Callback<T>>)>>,
    next_id: AtomicU64,
}

impl<T: 'static> Listeners<T> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        })
    }

    pub(crate) fn add(self: &Arc<Self>, callback: Arc<Callback<T>>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().unwrap().push((id, callback));

        let weak: Weak<Self> = Arc::downgrade(self);
        Subscription::new(move || {
            if let Some(listeners) = weak.upgrade() {
                listeners.entries.lock().unwrap().retain(|(i, _)| *i != id);
            }
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Calls every listener with `value`, isolating panics
    pub(crate) fn notify(&self, value: &T, label: &str) {
        // Snapshot so listeners may (un)subscribe while being called
        let callbacks: Vec<Arc<Callback<T>>> = self
            .entries
            .lock()
            .unwrap()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            Self::notify_one(&*callback, value, label);
        }
    }

    /// Calls a single listener, logging a panic instead of unwinding
    pub(crate) fn notify_one(callback: &Callback<T>, value: &T, label: &str) {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(value))) {
            error!(
                event = label,
                panic = %panic_message(panic.as_ref()),
                "Listener panicked"
            );
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ============================================================================
// EventBus
// ============================================================================

/// Publish/subscribe over the closed set of engine events
pub struct EventBus {
    listeners: HashMap<SyncEventKind, Arc<Listeners<SyncEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        let listeners = SyncEventKind::ALL
            .iter()
            .map(|kind| (*kind, Listeners::new()))
            .collect();
        Self { listeners }
    }

    /// Registers `listener` for events of `kind`
    pub fn add_event_listener<F>(&self, kind: SyncEventKind, listener: F) -> Subscription
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.listeners[&kind].add(Arc::new(listener))
    }

    /// Number of listeners registered for `kind`
    pub fn listener_count(&self, kind: SyncEventKind) -> usize {
        self.listeners[&kind].len()
    }

    /// Delivers `event` to every listener of its kind
    pub fn emit(&self, event: &SyncEvent) {
        let kind = event.kind();
        trace!(event = %kind, "Emitting event");
        self.listeners[&kind].notify(event, &kind.to_string());
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: HashMap<String, usize> = self
            .listeners
            .iter()
            .map(|(k, l)| (k.to_string(), l.len()))
            .collect();
        f.debug_struct("EventBus").field("listeners", &counts).finish()
    }
}
