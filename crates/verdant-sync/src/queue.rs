//! Persisted mutation queue
//!
//! The queue has an explicit two-state lifecycle:
//!
//! ```text
//! Uninitialized { pending writes } ──initialize()──→ Ready(snapshot)
//! ```
//!
//! Writes issued before the initial load are queued and applied, in order,
//! on top of the loaded snapshot during the transition; their callers wait
//! for the outcome instead of having the write dropped. Reads wait for
//! `Ready`.
//!
//! Once ready, every write holds the queue lock across the store write, so
//! writes are serialized and each one starts from the latest snapshot. The
//! in-memory snapshot only changes after the store accepted the new queue.
//!
//! A store that cannot be read at load time does not stop the queue: it
//! becomes ready with an empty snapshot and keeps writes in memory. Every
//! write retries the load first, and nothing is written to the store until a
//! load succeeds, so unreadable persisted data is never replaced.
//!
//! One queue instance owns its store; several queues sharing one store are
//! not supported.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{oneshot, watch, Mutex};
use tracing::{debug, info, warn};

use verdant_core::domain::{Mutation, MutationId, MutationStatus};
use verdant_core::ports::IMutationStore;

use crate::SyncError;

/// A queue write
#[derive(Debug, Clone)]
enum QueueOp {
    Append(Mutation),
    Remove(Vec<MutationId>),
    RecordFailures {
        failures: Vec<(MutationId, String)>,
        at: DateTime<Utc>,
    },
    SetStatus(Vec<MutationId>, MutationStatus),
    Clear,
}

impl QueueOp {
    /// Applies the write; returns the affected mutations
    fn apply(self, queue: &mut Vec<Mutation>) -> Result<Vec<Mutation>, SyncError> {
        match self {
            QueueOp::Append(mutation) => {
                if queue.iter().any(|m| m.id == mutation.id) {
                    return Err(SyncError::DuplicateMutation(mutation.id));
                }
                queue.push(mutation.clone());
                Ok(vec![mutation])
            }
            QueueOp::Remove(ids) => {
                let ids: HashSet<MutationId> = ids.into_iter().collect();
                let (removed, kept): (Vec<Mutation>, Vec<Mutation>) =
                    std::mem::take(queue).into_iter().partition(|m| ids.contains(&m.id));
                *queue = kept;
                Ok(removed)
            }
            QueueOp::RecordFailures { failures, at } => {
                let mut updated = Vec::with_capacity(failures.len());
                for (id, error) in failures {
                    if let Some(m) = queue.iter_mut().find(|m| m.id == id) {
                        m.record_failure(error, at);
                        updated.push(m.clone());
                    }
                }
                Ok(updated)
            }
            QueueOp::SetStatus(ids, status) => {
                let mut updated = Vec::new();
                for m in queue.iter_mut().filter(|m| ids.contains(&m.id)) {
                    m.status = status;
                    updated.push(m.clone());
                }
                Ok(updated)
            }
            QueueOp::Clear => Ok(std::mem::take(queue)),
        }
    }
}

type Reply = oneshot::Sender<Result<Vec<Mutation>, SyncError>>;

enum Lifecycle {
    Uninitialized { pending: Vec<(QueueOp, Reply)> },
    Ready(Vec<Mutation>),
}

/// Ordered, persisted sequence of pending mutations
pub struct MutationQueue {
    store: Arc<dyn IMutationStore>,
    state: Mutex<Lifecycle>,
    ready: watch::Sender<bool>,
    /// Why the store could not be read, while it cannot
    unreadable: watch::Sender<Option<String>>,
}

impl MutationQueue {
    /// Creates an uninitialized queue over `store`
    pub fn new(store: Arc<dyn IMutationStore>) -> Self {
        let (ready, _rx) = watch::channel(false);
        let (unreadable, _rx) = watch::channel(None);
        Self {
            store,
            state: Mutex::new(Lifecycle::Uninitialized {
                pending: Vec::new(),
            }),
            ready,
            unreadable,
        }
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Problem reading the store, if the queue is running in memory
    pub fn storage_problem(&self) -> Option<String> {
        self.unreadable.borrow().clone()
    }

    /// Loads the persisted queue and applies writes issued before the load
    ///
    /// Returns the queue length. Calling it again once ready is a no-op. An
    /// unreadable store is logged and leaves the queue ready but empty, see
    /// [`MutationQueue::storage_problem`].
    pub async fn initialize(&self) -> usize {
        if let Lifecycle::Ready(queue) = &*self.state.lock().await {
            return queue.len();
        }

        let loaded = match self.store.get().await {
            Ok(mut loaded) => {
                recover_interrupted(&mut loaded);
                loaded
            }
            Err(e) => {
                let problem = format!("{e:#}");
                warn!(error = %problem, "Persisted queue unreadable, running in memory");
                self.unreadable.send_replace(Some(problem));
                Vec::new()
            }
        };

        let mut state = self.state.lock().await;
        let pending = match &mut *state {
            Lifecycle::Ready(queue) => return queue.len(),
            Lifecycle::Uninitialized { pending } => std::mem::take(pending),
        };

        let loaded_len = loaded.len();
        let mut queue = loaded.clone();
        let mut replies = Vec::with_capacity(pending.len());
        for (op, reply) in pending {
            replies.push((reply, op.apply(&mut queue)));
        }

        if !replies.is_empty() {
            debug!(count = replies.len(), "Flushing writes issued before load");
            if let Err(e) = self.persist(&mut queue).await {
                warn!(error = %e, "Failed to persist early writes, discarding them");
                let message = format!("{e:#}");
                for (reply, _) in replies {
                    let _ = reply.send(Err(SyncError::Storage(anyhow::anyhow!(message.clone()))));
                }
                *state = Lifecycle::Ready(loaded);
                self.ready.send_replace(true);
                return loaded_len;
            }
        }

        for (reply, outcome) in replies {
            let _ = reply.send(outcome);
        }

        let len = queue.len();
        *state = Lifecycle::Ready(queue);
        self.ready.send_replace(true);
        info!(loaded = loaded_len, queued = len, "Mutation queue ready");
        len
    }

    /// Writes `queue` to the store
    ///
    /// While the store is unreadable the load is retried first: on success
    /// the persisted mutations are put back in front of `queue`, otherwise
    /// nothing is written and `queue` only lives in memory.
    async fn persist(&self, queue: &mut Vec<Mutation>) -> Result<(), SyncError> {
        if self.unreadable.borrow().is_none() {
            return self.store.set(queue).await.map_err(SyncError::Storage);
        }

        let mut persisted = match self.store.get().await {
            Ok(persisted) => persisted,
            Err(e) => {
                debug!(error = %format!("{e:#}"), "Persisted queue still unreadable");
                return Ok(());
            }
        };
        recover_interrupted(&mut persisted);

        let known: HashSet<MutationId> = persisted.iter().map(|m| m.id.clone()).collect();
        let recovered = persisted.len();
        persisted.extend(queue.drain(..).filter(|m| !known.contains(&m.id)));
        *queue = persisted;

        self.store.set(queue).await.map_err(SyncError::Storage)?;
        self.unreadable.send_replace(None);
        info!(recovered, queued = queue.len(), "Persisted queue readable again");
        Ok(())
    }

    async fn wait_ready(&self) {
        let mut rx = self.ready.subscribe();
        // The sender lives as long as `self`, so this only ends when ready
        let _ = rx.wait_for(|ready| *ready).await;
    }

    /// Applies a write against the latest snapshot and persists it
    async fn write(&self, op: QueueOp) -> Result<Vec<Mutation>, SyncError> {
        let mut state = self.state.lock().await;
        match &mut *state {
            Lifecycle::Uninitialized { pending } => {
                let (tx, rx) = oneshot::channel();
                pending.push((op, tx));
                drop(state);
                rx.await
                    .map_err(|_| SyncError::Storage(anyhow::anyhow!("queue dropped before load")))?
            }
            Lifecycle::Ready(queue) => {
                let mut next = queue.clone();
                let affected = op.apply(&mut next)?;
                self.persist(&mut next).await?;
                *queue = next;
                Ok(affected)
            }
        }
    }

    /// Appends a mutation; ids must be unique within the queue
    pub async fn append(&self, mutation: Mutation) -> Result<(), SyncError> {
        self.write(QueueOp::Append(mutation)).await.map(|_| ())
    }

    /// Removes the given mutations, returning those that were queued
    pub async fn remove(&self, ids: Vec<MutationId>) -> Result<Vec<Mutation>, SyncError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.write(QueueOp::Remove(ids)).await
    }

    /// Records one failed cycle for each mutation still queued
    pub async fn record_failures(
        &self,
        failures: Vec<(MutationId, String)>,
        at: DateTime<Utc>,
    ) -> Result<Vec<Mutation>, SyncError> {
        if failures.is_empty() {
            return Ok(Vec::new());
        }
        self.write(QueueOp::RecordFailures { failures, at }).await
    }

    /// Marks mutations as being sent or back to pending
    pub async fn set_status(
        &self,
        ids: Vec<MutationId>,
        status: MutationStatus,
    ) -> Result<Vec<Mutation>, SyncError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.write(QueueOp::SetStatus(ids, status)).await
    }

    /// Empties the queue, returning the removed mutations
    pub async fn clear(&self) -> Result<Vec<Mutation>, SyncError> {
        self.write(QueueOp::Clear).await
    }

    /// Latest snapshot, in insertion order
    pub async fn snapshot(&self) -> Vec<Mutation> {
        self.wait_ready().await;
        match &*self.state.lock().await {
            Lifecycle::Ready(queue) => queue.clone(),
            Lifecycle::Uninitialized { .. } => Vec::new(),
        }
    }

    pub async fn get(&self, id: &MutationId) -> Option<Mutation> {
        self.snapshot().await.into_iter().find(|m| &m.id == id)
    }

    pub async fn len(&self) -> usize {
        self.snapshot().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Mutations left `Syncing` by an interrupted cycle go back to pending
fn recover_interrupted(queue: &mut [Mutation]) {
    for m in queue.iter_mut().filter(|m| m.status == MutationStatus::Syncing) {
        m.status = MutationStatus::Pending;
    }
}

impl std::fmt::Debug for MutationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationQueue")
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}
