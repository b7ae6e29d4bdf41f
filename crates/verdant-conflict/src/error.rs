//! Error types for the conflict resolver

use thiserror::Error;

use verdant_core::domain::MutationId;

/// Errors that can occur during conflict detection and resolution
#[derive(Debug, Error)]
pub enum ConflictError {
    /// A custom resolver returned a mutation with a different identity
    #[error("custom resolver changed mutation id from {original} to {returned}")]
    IdentityChanged {
        original: MutationId,
        returned: MutationId,
    },

    /// Strategy name not recognised
    #[error("invalid conflict strategy '{0}'; valid: last_write_wins, server_wins")]
    InvalidStrategy(String),
}
