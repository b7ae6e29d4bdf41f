//! Conflict resolution strategies
//!
//! A [`ConflictStrategy`] decides what happens to a local mutation once the
//! detector has found it diverging from server state.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use verdant_core::domain::Mutation;

use crate::error::ConflictError;

/// Signature of a custom resolution function
///
/// Receives the local mutation and the server state. Returning `Some`
/// sends the (possibly rewritten) mutation; returning `None` resolves the
/// conflict by skipping the mutation.
pub type CustomResolveFn = dyn Fn(&Mutation, &Value) -> Option<Mutation> + Send + Sync;

/// Policy applied when a mutation conflicts with server state
#[derive(Clone, Default)]
pub enum ConflictStrategy {
    /// Keep the local mutation and send it as-is
    #[default]
    LastWriteWins,
    /// Discard the local mutation in favour of the server
    ServerWins,
    /// Delegate to an application function
    Custom(Arc<CustomResolveFn>),
}

impl ConflictStrategy {
    /// Wraps a closure as a custom strategy
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&Mutation, &Value) -> Option<Mutation> + Send + Sync + 'static,
    {
        ConflictStrategy::Custom(Arc::new(f))
    }

    /// Parses a configuration name
    pub fn parse(name: &str) -> Result<Self, ConflictError> {
        match name {
            "last_write_wins" => Ok(ConflictStrategy::LastWriteWins),
            "server_wins" => Ok(ConflictStrategy::ServerWins),
            other => Err(ConflictError::InvalidStrategy(other.to_string())),
        }
    }

    /// Parses a configuration name, falling back to `LastWriteWins`
    ///
    /// Invalid names are logged and never fatal.
    pub fn from_config(name: &str) -> Self {
        Self::parse(name).unwrap_or_else(|e| {
            warn!(error = %e, "Falling back to last_write_wins");
            ConflictStrategy::LastWriteWins
        })
    }

    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            ConflictStrategy::LastWriteWins => "last_write_wins",
            ConflictStrategy::ServerWins => "server_wins",
            ConflictStrategy::Custom(_) => "custom",
        }
    }
}

impl fmt::Debug for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictStrategy::Custom(_) => f.write_str("Custom(<fn>)"),
            other => f.write_str(other.name()),
        }
    }
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
