//! Remote sync ports (driven/secondary ports)
//!
//! - [`ISyncTransport`] delivers one mutation to the remote authority.
//! - [`IServerStateFetcher`] reads the authoritative state a mutation targets
//!   so the conflict resolver can compare them.
//!
//! Any transport error is treated as a transient failure regardless of
//! its underlying cause; the engine decides whether retries remain.

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::Mutation;

/// Delivers mutations to the remote authority
#[async_trait]
pub trait ISyncTransport: Send + Sync {
    /// Sends `mutation` and returns the remote response body
    async fn sync(&self, mutation: &Mutation) -> anyhow::Result<Value>;
}

/// Fetches authoritative server state for a mutation's target
#[async_trait]
pub trait IServerStateFetcher: Send + Sync {
    /// Returns the current server state, or `None` when no conflict is possible
    async fn fetch(&self, mutation: &Mutation) -> anyhow::Result<Option<Value>>;
}

/// Default fetcher: never reports server state, so conflicts never occur
#[derive(Debug, Clone, Copy, Default)]
pub struct NoServerState;

#[async_trait]
impl IServerStateFetcher for NoServerState {
    async fn fetch(&self, _mutation: &Mutation) -> anyhow::Result<Option<Value>> {
        Ok(None)
    }
}
