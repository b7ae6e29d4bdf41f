//! Typed engine events
//!
//! The sync engine publishes a closed set of events. Each kind has a fixed
//! payload shape so subscribers can match exhaustively instead of poking at
//! untyped maps.

use serde::Serialize;
use serde_json::Value;

use super::mutation::Mutation;
use super::newtypes::MutationId;
use super::sync_state::{SyncProgress, SyncStatus};

/// Discriminant used to register listeners for one kind of event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncEventKind {
    StatusChange,
    ProgressUpdate,
    MutationSynced,
    SyncError,
    QueueUpdated,
}

impl SyncEventKind {
    pub const ALL: [SyncEventKind; 5] = [
        SyncEventKind::StatusChange,
        SyncEventKind::ProgressUpdate,
        SyncEventKind::MutationSynced,
        SyncEventKind::SyncError,
        SyncEventKind::QueueUpdated,
    ];
}

impl std::fmt::Display for SyncEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SyncEventKind::StatusChange => "STATUS_CHANGE",
            SyncEventKind::ProgressUpdate => "PROGRESS_UPDATE",
            SyncEventKind::MutationSynced => "MUTATION_SYNCED",
            SyncEventKind::SyncError => "SYNC_ERROR",
            SyncEventKind::QueueUpdated => "QUEUE_UPDATED",
        };
        write!(f, "{}", s)
    }
}

/// What changed in the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueAction {
    Added,
    Removed,
    Synced,
    Failed,
    Cleared,
}

/// An event published by the sync engine
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncEvent {
    StatusChange {
        previous: SyncStatus,
        current: SyncStatus,
    },
    ProgressUpdate(SyncProgress),
    MutationSynced {
        mutation: Mutation,
        /// Transport response, or `null` when a conflict policy skipped it
        data: Value,
    },
    SyncError {
        mutation_id: MutationId,
        error: String,
        retry_count: u32,
        can_retry: bool,
    },
    QueueUpdated {
        action: QueueAction,
        pending: usize,
    },
}

impl SyncEvent {
    pub fn kind(&self) -> SyncEventKind {
        match self {
            SyncEvent::StatusChange { .. } => SyncEventKind::StatusChange,
            SyncEvent::ProgressUpdate(_) => SyncEventKind::ProgressUpdate,
            SyncEvent::MutationSynced { .. } => SyncEventKind::MutationSynced,
            SyncEvent::SyncError { .. } => SyncEventKind::SyncError,
            SyncEvent::QueueUpdated { .. } => SyncEventKind::QueueUpdated,
        }
    }
}
