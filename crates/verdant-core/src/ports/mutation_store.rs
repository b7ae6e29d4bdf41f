//! Mutation store port (driven/secondary port)
//!
//! A durable key-value slot that holds the whole mutation queue as one
//! ordered sequence.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because storage errors are adapter-specific
//!   (file, browser storage, SQLite, ...).
//! - The store is assumed at-least-once durable: once `set` resolves the
//!   snapshot survives a process restart.
//! - Exactly one engine owns a store instance. Two engines writing the same
//!   persistence key is an unsupported configuration.

use async_trait::async_trait;

use crate::domain::Mutation;

/// Durable storage for the ordered mutation queue
#[async_trait]
pub trait IMutationStore: Send + Sync {
    /// Loads the persisted queue; a never-written store yields an empty queue
    async fn get(&self) -> anyhow::Result<Vec<Mutation>>;

    /// Replaces the persisted queue with `queue`
    async fn set(&self, queue: &[Mutation]) -> anyhow::Result<()>;
}
