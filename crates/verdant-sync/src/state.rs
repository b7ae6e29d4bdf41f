//! Observable sync state
//!
//! The engine is the only writer. Observers either register a callback with
//! [`SyncStateStore::subscribe`] (called immediately with the current
//! snapshot, then after every change) or hold a `watch::Receiver` from
//! [`SyncStateStore::watch`].

use std::sync::Arc;

use tokio::sync::watch;

use verdant_core::domain::{SyncState, SyncStatus};

use crate::events::{Listeners, Subscription};

/// Single current [`SyncState`] with change notification
pub struct SyncStateStore {
    tx: watch::Sender<SyncState>,
    listeners: Arc<Listeners<SyncState>>,
}

impl SyncStateStore {
    pub fn new(initial: SyncState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self {
            tx,
            listeners: Listeners::new(),
        }
    }

    /// Current snapshot
    pub fn get(&self) -> SyncState {
        self.tx.borrow().clone()
    }

    pub fn status(&self) -> SyncStatus {
        self.tx.borrow().status
    }

    /// Applies `f`, notifying observers if the state changed
    ///
    /// Returns the status before the change and the new snapshot.
    pub fn update(&self, f: impl FnOnce(&mut SyncState)) -> (SyncStatus, SyncState) {
        let mut previous = SyncStatus::default();
        let changed = self.tx.send_if_modified(|state| {
            let before = state.clone();
            previous = before.status;
            f(state);
            *state != before
        });
        let current = self.get();
        if changed {
            self.listeners.notify(&current, "sync_state");
        }
        (previous, current)
    }

    /// Calls `f` with the current snapshot now and after every change
    pub fn subscribe<F>(&self, f: F) -> Subscription
    where
        F: Fn(&SyncState) + Send + Sync + 'static,
    {
        let callback: Arc<dyn Fn(&SyncState) + Send + Sync> = Arc::new(f);
        let current = self.get();
        let subscription = self.listeners.add(Arc::clone(&callback));
        Listeners::notify_one(callback.as_ref(), &current, "sync_state");
        subscription
    }

    /// Receiver for async observers
    pub fn watch(&self) -> watch::Receiver<SyncState> {
        self.tx.subscribe()
    }
}

impl std::fmt::Debug for SyncStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncStateStore")
            .field("state", &*self.tx.borrow())
            .field("subscribers", &self.listeners.len())
            .finish()
    }
}
