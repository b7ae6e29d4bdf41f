//! Conflict resolution
//!
//! Applies a [`ConflictStrategy`] to a mutation whose target may have
//! diverged from server state:
//! - `LastWriteWins`: keep the local mutation
//! - `ServerWins`: discard the local mutation (counted as resolved, not failed)
//! - `Custom`: rewrite the mutation, or veto it by returning `None`

use serde_json::Value;
use tracing::{debug, info};

use verdant_core::domain::Mutation;

use crate::{detector::ConflictDetector, error::ConflictError, strategy::ConflictStrategy};

/// Why a conflicting mutation was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// The `ServerWins` strategy kept the server state
    ServerWins,
    /// A custom resolver returned `None`
    CustomVeto,
}

impl std::fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiscardReason::ServerWins => write!(f, "server state wins"),
            DiscardReason::CustomVeto => write!(f, "custom resolver skipped mutation"),
        }
    }
}

/// Outcome of a conflict check
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// No server state, or no divergence
    NoConflict(Mutation),
    /// Conflict found; local mutation kept unchanged
    KeepLocal(Mutation),
    /// Conflict found; custom resolver produced a new mutation
    Rewritten(Mutation),
    /// Conflict found; mutation deliberately dropped
    Discarded(DiscardReason),
}

impl Resolution {
    /// The mutation to send, if any
    pub fn into_mutation(self) -> Option<Mutation> {
        match self {
            Resolution::NoConflict(m) | Resolution::KeepLocal(m) | Resolution::Rewritten(m) => {
                Some(m)
            }
            Resolution::Discarded(_) => None,
        }
    }

    pub fn is_conflict(&self) -> bool {
        !matches!(self, Resolution::NoConflict(_))
    }
}

/// Detects conflicts and applies the configured strategy
#[derive(Debug, Clone, Default)]
pub struct ConflictResolver {
    strategy: ConflictStrategy,
    detector: ConflictDetector,
}

impl ConflictResolver {
    pub fn new(strategy: ConflictStrategy, detector: ConflictDetector) -> Self {
        Self { strategy, detector }
    }

    pub fn strategy(&self) -> &ConflictStrategy {
        &self.strategy
    }

    /// Resolves `mutation` against `server_state`
    ///
    /// # Errors
    /// Returns `ConflictError::IdentityChanged` if a custom resolver returns a
    /// mutation with a different id; the queue tracks mutations by id, so the
    /// rewrite would orphan the original entry.
    pub fn resolve(
        &self,
        mutation: Mutation,
        server_state: Option<&Value>,
    ) -> Result<Resolution, ConflictError> {
        let Some(server_state) = server_state else {
            return Ok(Resolution::NoConflict(mutation));
        };

        if !self.detector.has_conflict(&mutation, server_state) {
            return Ok(Resolution::NoConflict(mutation));
        }

        info!(
            mutation_id = %mutation.id,
            kind = %mutation.kind,
            strategy = %self.strategy,
            "Conflict detected"
        );

        match &self.strategy {
            ConflictStrategy::LastWriteWins => Ok(Resolution::KeepLocal(mutation)),
            ConflictStrategy::ServerWins => {
                debug!(mutation_id = %mutation.id, "Discarding local mutation");
                Ok(Resolution::Discarded(DiscardReason::ServerWins))
            }
            ConflictStrategy::Custom(resolve) => match resolve(&mutation, server_state) {
                Some(rewritten) if rewritten.id != mutation.id => {
                    Err(ConflictError::IdentityChanged {
                        original: mutation.id,
                        returned: rewritten.id,
                    })
                }
                Some(rewritten) => Ok(Resolution::Rewritten(rewritten)),
                None => {
                    debug!(mutation_id = %mutation.id, "Custom resolver vetoed mutation");
                    Ok(Resolution::Discarded(DiscardReason::CustomVeto))
                }
            },
        }
    }
}
