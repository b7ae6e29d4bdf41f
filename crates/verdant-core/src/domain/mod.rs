//! Domain entities and business logic
//!
//! This module contains the core domain types for Verdant:
//! - Newtypes for mutation and task identifiers
//! - Queued mutations and their persisted record shape
//! - The observable sync state snapshot
//! - Typed engine events
//! - Queue statistics and health reports
//! - Domain-specific error types

pub mod errors;
pub mod events;
pub mod health;
pub mod mutation;
pub mod newtypes;
pub mod sync_state;

// Re-export commonly used types
pub use errors::DomainError;
pub use events::{QueueAction, SyncEvent, SyncEventKind};
pub use health::{HealthLevel, HealthReport, QueueStats};
pub use mutation::{Mutation, MutationDraft, MutationStatus, QueuedMutation};
pub use newtypes::*;
pub use sync_state::{SyncProgress, SyncState, SyncStatus};
