//! Verdant Sync - Offline mutation queue and synchronization engine
//!
//! Provides:
//! - A durable, ordered mutation queue with an explicit load lifecycle
//! - At-least-once delivery with bounded retries and exponential backoff
//! - Pluggable conflict resolution before each delivery
//! - An observable sync state and typed engine events
//! - Optional delegation of queue draining to the carbon-aware scheduler
//!
//! ## Modules
//!
//! - [`engine`] - The [`SyncEngine`] orchestrating sync cycles
//! - [`queue`] - [`MutationQueue`] over a durable store
//! - [`state`] - Observable [`SyncStateStore`]
//! - [`events`] - Typed publish/subscribe [`EventBus`]
//! - [`store`] - In-memory and JSON file store adapters
//! - [`transport`] - HTTP transport adapter
//! - [`network`] - Manually driven network observer

pub mod engine;
pub mod events;
pub mod network;
pub mod queue;
pub mod state;
pub mod store;
pub mod transport;

use thiserror::Error;

use verdant_core::domain::{DomainError, MutationId};

pub use engine::{MutationOutcome, ProcessOptions, SyncEngine, SyncEngineBuilder};
pub use events::{EventBus, Subscription};
pub use network::ManualNetworkObserver;
pub use queue::MutationQueue;
pub use state::SyncStateStore;
pub use store::{JsonFileMutationStore, MemoryMutationStore};
pub use transport::HttpSyncTransport;

/// Errors that can occur during synchronization operations
#[derive(Debug, Error)]
pub enum SyncError {
    /// The operation needs connectivity
    #[error("Engine is offline")]
    Offline,

    /// No queued mutation has this id
    #[error("Mutation not found: {0}")]
    MutationNotFound(MutationId),

    /// A mutation with this id is already queued
    #[error("Duplicate mutation id: {0}")]
    DuplicateMutation(MutationId),

    /// The durable store failed to load or persist the queue
    #[error("Storage error: {0:#}")]
    Storage(#[source] anyhow::Error),

    /// The builder was missing a required collaborator
    #[error("Missing collaborator: {0}")]
    MissingCollaborator(&'static str),

    /// A domain-level error propagated from verdant-core
    #[error("Domain error: {0}")]
    DomainError(#[from] DomainError),

    /// A conflict resolver produced an unusable result
    #[error("Conflict error: {0}")]
    ConflictError(#[from] verdant_conflict::ConflictError),

    /// The scheduler rejected or failed a batch
    #[error("Scheduler error: {0}")]
    SchedulerError(#[from] verdant_scheduler::SchedulerError),
}
