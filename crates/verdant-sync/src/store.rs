//! Durable store adapters
//!
//! - [`MemoryMutationStore`]: process-local, for tests and ephemeral use
//! - [`JsonFileMutationStore`]: the persisted record array in a JSON file,
//!   replaced atomically (write to a temporary file, then rename)

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::Context;
use async_trait::async_trait;
use tracing::debug;

use verdant_core::domain::Mutation;
use verdant_core::ports::IMutationStore;

// ============================================================================
// MemoryMutationStore
// ============================================================================

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryMutationStore {
    queue: Mutex<Vec<Mutation>>,
    writes: AtomicUsize,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
}

impl MemoryMutationStore {
    /// Store pre-populated with a persisted queue
    pub fn with_queue(queue: Vec<Mutation>) -> Self {
        Self {
            queue: Mutex::new(queue),
            ..Self::default()
        }
    }

    /// What a restarted process would load
    pub fn snapshot(&self) -> Vec<Mutation> {
        self.queue.lock().unwrap().clone()
    }

    /// Number of successful writes
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Makes subsequent writes fail (or succeed again)
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Makes subsequent loads fail (or succeed again)
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl IMutationStore for MemoryMutationStore {
    async fn get(&self) -> anyhow::Result<Vec<Mutation>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            anyhow::bail!("memory store is unreadable");
        }
        Ok(self.snapshot())
    }

    async fn set(&self, queue: &[Mutation]) -> anyhow::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("memory store is read-only");
        }
        *self.queue.lock().unwrap() = queue.to_vec();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// JsonFileMutationStore
// ============================================================================

/// Store persisting the queue as a JSON array of mutation records
#[derive(Debug, Clone)]
pub struct JsonFileMutationStore {
    path: PathBuf,
}

impl JsonFileMutationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut p = self.path.clone().into_os_string();
        p.push(".tmp");
        PathBuf::from(p)
    }
}

#[async_trait]
impl IMutationStore for JsonFileMutationStore {
    async fn get(&self) -> anyhow::Result<Vec<Mutation>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No persisted queue, starting empty");
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read {}", self.path.display()));
            }
        };

        serde_json::from_slice(&bytes)
            .with_context(|| format!("Corrupt mutation queue in {}", self.path.display()))
    }

    async fn set(&self, queue: &[Mutation]) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let data = serde_json::to_vec_pretty(queue)?;

        // Write next to the target so the rename stays on one filesystem
        let tmp_path = self.tmp_path();
        tokio::fs::write(&tmp_path, &data)
            .await
            .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;

        debug!(path = %self.path.display(), count = queue.len(), "Queue persisted");
        Ok(())
    }
}
