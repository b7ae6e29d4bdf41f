//! Observable sync state snapshot
//!
//! [`SyncState`] is the single current view of the engine's progress. Only
//! the sync engine mutates it; everyone else observes it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Overall status of the sync engine
///
/// ```text
/// idle ──add/online──→ syncing ──all ok──────────→ synced
///                        │ ├────retriable left──→ idle
///                        │ └────retries spent───→ error
/// any ──offline──→ offline ──online──→ idle
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    Idle,
    Syncing,
    Error,
    Synced,
    Offline,
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Error => "error",
            SyncStatus::Synced => "synced",
            SyncStatus::Offline => "offline",
        };
        write!(f, "{}", s)
    }
}

/// Progress of the current sync cycle
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SyncProgress {
    pub current: usize,
    pub total: usize,
    /// Rounded percentage in `0..=100`
    pub percentage: u8,
}

impl SyncProgress {
    /// Builds a progress value, computing the percentage
    ///
    /// An empty cycle (`total == 0`) reports 100%.
    pub fn new(current: usize, total: usize) -> Self {
        let percentage = if total == 0 {
            100
        } else {
            ((current.min(total) as f64 / total as f64) * 100.0).round() as u8
        };
        Self {
            current,
            total,
            percentage,
        }
    }
}

/// Snapshot of the engine's sync status
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub status: SyncStatus,
    pub progress: SyncProgress,
    /// Number of mutations waiting in the queue
    pub pending: usize,
    /// Most recent failure message
    pub error: Option<String>,
    /// Completion time of the last fully successful cycle
    pub last_sync: Option<DateTime<Utc>>,
    /// Highest retry count among queued mutations
    pub retry_count: u32,
}

impl SyncState {
    /// Initial state for an engine that starts offline or online
    pub fn initial(online: bool) -> Self {
        Self {
            status: if online {
                SyncStatus::Idle
            } else {
                SyncStatus::Offline
            },
            ..Self::default()
        }
    }
}
