//! Mutation domain entity
//!
//! A [`Mutation`] is a serializable intent to change remote state. It is
//! queued locally until the sync engine confirms delivery to the remote
//! authority.
//!
//! ## Persisted shape
//!
//! ```json
//! {
//!   "id": "9b1d...",
//!   "type": "ADD_ITEM",
//!   "payload": { "id": 1 },
//!   "timestamp": 1718000000000,
//!   "retryCount": 0,
//!   "status": "pending",
//!   "lastError": "connection refused",
//!   "lastAttempt": 1718000005000
//! }
//! ```
//!
//! Timestamps are milliseconds since the Unix epoch. `lastError` and
//! `lastAttempt` are omitted until the first failed attempt.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::DomainError;
use super::newtypes::MutationId;

/// Delivery status of a queued mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationStatus {
    /// Waiting in the queue for the next sync cycle
    #[default]
    Pending,
    /// Currently being sent to the remote authority
    Syncing,
}

impl std::fmt::Display for MutationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MutationStatus::Pending => write!(f, "pending"),
            MutationStatus::Syncing => write!(f, "syncing"),
        }
    }
}

/// A queued, state-changing intent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mutation {
    /// Unique identifier within the queue
    pub id: MutationId,
    /// Application-defined tag, e.g. `ADD_ITEM`
    #[serde(rename = "type")]
    pub kind: String,
    /// Opaque application payload
    pub payload: Value,
    /// When the intent was recorded
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    /// Number of failed sync cycles; never decreases while queued
    pub retry_count: u32,
    /// Delivery status
    pub status: MutationStatus,
    /// Message of the most recent failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// When the most recent failed attempt happened
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_attempt: Option<DateTime<Utc>>,
}

impl Mutation {
    /// Creates a fresh pending mutation with a generated id
    pub fn new(kind: impl Into<String>, payload: Value) -> Result<Self, DomainError> {
        MutationDraft::new(kind, payload).into_mutation(Utc::now())
    }

    /// Records a failed sync cycle
    ///
    /// Increments `retry_count`, stores the failure message and attempt time,
    /// and puts the mutation back in the `Pending` state.
    pub fn record_failure(&mut self, error: impl Into<String>, at: DateTime<Utc>) {
        self.retry_count = self.retry_count.saturating_add(1);
        self.last_error = Some(error.into());
        self.last_attempt = Some(at);
        self.status = MutationStatus::Pending;
    }

    /// Returns true while the mutation still has automatic retries left
    pub fn can_retry(&self, max_retries: u32) -> bool {
        self.retry_count < max_retries
    }

    /// Time spent in the queue as of `now`
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.timestamp)
            .max(Duration::zero())
    }
}

// ============================================================================
// MutationDraft
// ============================================================================

/// Input for `SyncEngine::add_mutation`
///
/// `id` and `timestamp` are optional; missing values are assigned when the
/// draft is turned into a [`Mutation`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationDraft {
    /// Caller-chosen identifier
    #[serde(default)]
    pub id: Option<MutationId>,
    /// Application-defined tag
    #[serde(rename = "type")]
    pub kind: String,
    /// Opaque application payload
    #[serde(default)]
    pub payload: Value,
    /// Caller-chosen creation time
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl MutationDraft {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            id: None,
            kind: kind.into(),
            payload,
            timestamp: None,
        }
    }

    pub fn with_id(mut self, id: MutationId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Completes the draft into a pending mutation
    ///
    /// # Errors
    /// Returns `DomainError::InvalidMutationType` if the type tag is blank
    pub fn into_mutation(self, now: DateTime<Utc>) -> Result<Mutation, DomainError> {
        if self.kind.trim().is_empty() {
            return Err(DomainError::InvalidMutationType(self.kind));
        }

        Ok(Mutation {
            id: self.id.unwrap_or_else(MutationId::generate),
            kind: self.kind,
            payload: self.payload,
            timestamp: self.timestamp.unwrap_or(now),
            retry_count: 0,
            status: MutationStatus::Pending,
            last_error: None,
            last_attempt: None,
        })
    }
}

// ============================================================================
// QueuedMutation
// ============================================================================

/// A queued mutation annotated with derived fields for display
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMutation {
    pub mutation: Mutation,
    /// Time spent in the queue
    pub age: Duration,
    /// False once automatic retries are exhausted
    pub can_retry: bool,
}

impl QueuedMutation {
    pub fn new(mutation: Mutation, now: DateTime<Utc>, max_retries: u32) -> Self {
        let age = mutation.age(now);
        let can_retry = mutation.can_retry(max_retries);
        Self {
            mutation,
            age,
            can_retry,
        }
    }
}
