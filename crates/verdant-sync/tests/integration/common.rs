//! Shared helpers for sync engine integration tests

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use verdant_core::config::SyncConfig;
use verdant_core::domain::{Mutation, MutationDraft, SyncEvent, SyncEventKind};
use verdant_core::ports::{IServerStateFetcher, ISyncTransport};
use verdant_sync::{MemoryMutationStore, SyncEngine, SyncEngineBuilder};

/// Transport recording what it was sent
///
/// Fails the first `failures` calls (all of them with `u32::MAX`), and
/// optionally takes `latency` per call.
#[derive(Default)]
pub struct ScriptedTransport {
    sent: Mutex<Vec<Mutation>>,
    failures: AtomicU32,
    latency: Option<Duration>,
}

impl ScriptedTransport {
    pub fn accepting() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn rejecting() -> Arc<Self> {
        Arc::new(Self {
            failures: AtomicU32::new(u32::MAX),
            ..Self::default()
        })
    }

    pub fn failing_first(n: u32) -> Arc<Self> {
        Arc::new(Self {
            failures: AtomicU32::new(n),
            ..Self::default()
        })
    }

    pub fn slow(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            latency: Some(latency),
            ..Self::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    /// Types of the mutations sent, in call order
    pub fn sent_kinds(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|m| m.kind.clone()).collect()
    }

    pub fn sent(&self) -> Vec<Mutation> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ISyncTransport for ScriptedTransport {
    async fn sync(&self, mutation: &Mutation) -> anyhow::Result<Value> {
        self.sent.lock().unwrap().push(mutation.clone());
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match n {
                0 => None,
                u32::MAX => Some(u32::MAX),
                n => Some(n - 1),
            })
            .is_ok();
        if failing {
            anyhow::bail!("HTTP 503: service unavailable");
        }
        Ok(json!({"accepted": mutation.id.as_str()}))
    }
}

/// Server state fetcher always returning the same document
pub struct FixedServerState(pub Value);

#[async_trait]
impl IServerStateFetcher for FixedServerState {
    async fn fetch(&self, _mutation: &Mutation) -> anyhow::Result<Option<Value>> {
        Ok(Some(self.0.clone()))
    }
}

/// Builder over an in-memory store with the default configuration
pub fn builder(transport: Arc<ScriptedTransport>) -> SyncEngineBuilder {
    SyncEngine::builder()
        .config(SyncConfig::default())
        .store(Arc::new(MemoryMutationStore::default()))
        .transport(transport)
}

pub fn draft(kind: &str, payload: Value) -> MutationDraft {
    MutationDraft::new(kind, payload)
}

/// Collects every event of `kind` the engine emits
pub fn record_events(
    engine: &SyncEngine,
    kind: SyncEventKind,
) -> (Arc<Mutex<Vec<SyncEvent>>>, verdant_sync::Subscription) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let subscription = engine.add_event_listener(kind, move |event| {
        sink.lock().unwrap().push(event.clone());
    });
    (events, subscription)
}
