//! Conflict detection
//!
//! A conflict exists when the authoritative server state changed after the
//! local mutation was recorded. The default predicate reads a millisecond
//! timestamp from the server state (`updatedAt`, `updated_at` or
//! `timestamp`) and compares it with the mutation's own timestamp. Server
//! state without a recognisable timestamp never conflicts.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::trace;

use verdant_core::domain::Mutation;

/// Field names probed for the server-side modification time
const SERVER_TIMESTAMP_FIELDS: &[&str] = &["updatedAt", "updated_at", "timestamp"];

type Predicate = dyn Fn(&Mutation, &Value) -> bool + Send + Sync;

/// Predicate deciding whether a mutation conflicts with server state
#[derive(Clone)]
pub struct ConflictDetector {
    predicate: Arc<Predicate>,
}

impl ConflictDetector {
    /// Detector comparing server modification time with the mutation time
    pub fn timestamp() -> Self {
        Self::custom(server_is_newer)
    }

    /// Detector that flags every mutation with server state as conflicting
    pub fn always() -> Self {
        Self::custom(|_, _| true)
    }

    /// Wraps an application predicate
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&Mutation, &Value) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(f),
        }
    }

    /// Evaluates the predicate
    pub fn has_conflict(&self, mutation: &Mutation, server_state: &Value) -> bool {
        (self.predicate)(mutation, server_state)
    }
}

impl Default for ConflictDetector {
    fn default() -> Self {
        Self::timestamp()
    }
}

impl fmt::Debug for ConflictDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ConflictDetector(<fn>)")
    }
}

fn server_is_newer(mutation: &Mutation, server_state: &Value) -> bool {
    let server_ms = SERVER_TIMESTAMP_FIELDS
        .iter()
        .find_map(|field| server_state.get(field).and_then(Value::as_i64));

    match server_ms {
        Some(server_ms) => {
            let local_ms = mutation.timestamp.timestamp_millis();
            trace!(
                mutation_id = %mutation.id,
                server_ms,
                local_ms,
                "Comparing server and local timestamps"
            );
            server_ms > local_ms
        }
        None => false,
    }
}
