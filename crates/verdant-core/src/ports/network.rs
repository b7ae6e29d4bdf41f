//! Network observer port
//!
//! Abstracts ambient online/offline notifications so the engine can be
//! driven deterministically in tests.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Connectivity as seen by the host platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkState {
    Online,
    Offline,
}

impl NetworkState {
    pub fn is_online(self) -> bool {
        matches!(self, NetworkState::Online)
    }
}

impl std::fmt::Display for NetworkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkState::Online => write!(f, "online"),
            NetworkState::Offline => write!(f, "offline"),
        }
    }
}

/// Source of online/offline transitions
pub trait INetworkObserver: Send + Sync {
    /// Returns the connectivity right now
    fn current_state(&self) -> NetworkState;

    /// Subscribes to connectivity changes
    ///
    /// The receiver holds the latest state; `changed()` resolves on every
    /// subsequent transition.
    fn subscribe(&self) -> watch::Receiver<NetworkState>;
}
