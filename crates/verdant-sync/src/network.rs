//! Manually driven network observer
//!
//! Hosts that learn about connectivity from elsewhere (a platform API, a
//! health check, a test) push transitions in with
//! [`ManualNetworkObserver::set_state`].

use tokio::sync::watch;
use tracing::info;

use verdant_core::ports::{INetworkObserver, NetworkState};

/// Network observer backed by a watch channel
#[derive(Debug)]
pub struct ManualNetworkObserver {
    tx: watch::Sender<NetworkState>,
}

impl ManualNetworkObserver {
    pub fn new(initial: NetworkState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn online() -> Self {
        Self::new(NetworkState::Online)
    }

    pub fn offline() -> Self {
        Self::new(NetworkState::Offline)
    }

    /// Publishes a transition; repeating the current state is ignored
    pub fn set_state(&self, state: NetworkState) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            info!(state = %state, "Network state changed");
        }
    }
}

impl INetworkObserver for ManualNetworkObserver {
    fn current_state(&self) -> NetworkState {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<NetworkState> {
        self.tx.subscribe()
    }
}
