//! Sync engine
//!
//! Drains the mutation queue against the remote authority:
//!
//! 1. `add_mutation` appends to the persisted queue and, when online and not
//!    already syncing, schedules a debounced `process_queue`
//! 2. `process_queue` walks a snapshot of the queue in insertion order. For
//!    each mutation: fetch server state, resolve conflicts, send with
//!    retry and exponential backoff
//! 3. At the end of a cycle delivered mutations are removed, failed ones
//!    record the failure, and the sync state settles on `synced`, `idle`
//!    (retriable failures left, a rerun is scheduled) or `error`
//!    (at least one mutation exhausted its retries)
//!
//! ## Carbon-aware mode
//!
//! With a scheduler attached and `carbon_aware` enabled, `process_queue`
//! does not send anything itself. It groups the queue by mutation type and
//! hands each group to the scheduler as a task; when the scheduler runs the
//! task it calls back into the engine, which sends each mutation once and
//! leaves retries to the scheduler.
//!
//! ## Concurrency
//!
//! `process_queue` is guarded by a syncing flag: calls made while a cycle
//! is in flight only report the current state. Debounce and retry timers are
//! never cancelled; `force_sync` bumps their generation counters so they
//! become no-ops when they fire.

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use verdant_conflict::{
    ConflictDetector, ConflictResolver, ConflictStrategy, DiscardReason, Resolution,
};
use verdant_core::config::SyncConfig;
use verdant_core::domain::{
    HealthReport, Mutation, MutationDraft, MutationId, MutationStatus, QueueAction, QueueStats,
    QueuedMutation, SyncEvent, SyncEventKind, SyncProgress, SyncState, SyncStatus,
};
use verdant_core::ports::{
    IMutationStore, INetworkObserver, IServerStateFetcher, ISyncTransport, NetworkState,
    NoServerState,
};
use verdant_scheduler::{
    CarbonAwareScheduler, Priority, ScheduleOptions, ScheduleOutcome, TaskRunner, TaskSpec,
    TaskWork,
};

use crate::events::{EventBus, Subscription};
use crate::queue::MutationQueue;
use crate::state::SyncStateStore;
use crate::SyncError;

/// Scheduler task type used for mutation batches
const SYNC_TASK_TYPE: &str = "sync";

// ============================================================================
// Public types
// ============================================================================

/// Options for [`SyncEngine::process_queue`]
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessOptions {
    /// Run in-process even in carbon-aware mode
    pub force: bool,
}

impl ProcessOptions {
    pub fn forced() -> Self {
        Self { force: true }
    }
}

/// Result of delivering one mutation
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome {
    /// Delivered; `mutation` is what was sent (possibly rewritten)
    Synced { mutation: Mutation, data: Value },
    /// Resolved by dropping the mutation; counts as success
    Skipped {
        mutation: Mutation,
        reason: DiscardReason,
    },
    /// Every attempt failed
    Failed {
        error: String,
        /// True if this failure uses up the mutation's last retry
        retries_exhausted: bool,
    },
}

impl MutationOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, MutationOutcome::Failed { .. })
    }
}

/// How many transport attempts each mutation gets in a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleMode {
    /// Remaining retry budget, with in-process backoff
    InProcess,
    /// One attempt; the scheduler owns retries
    Scheduled,
}

/// Counts from one cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct CycleReport {
    synced: usize,
    failed: usize,
}

// ============================================================================
// Retry helper
// ============================================================================

/// Runs `f` up to `attempts` times, sleeping `base × 2^attempt` between tries
async fn with_retry<F, Fut, T>(
    operation_name: &str,
    attempts: u32,
    base_delay: Duration,
    f: F,
) -> anyhow::Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let attempts = attempts.max(1);
    let mut last_error: Option<anyhow::Error> = None;

    for attempt in 0..attempts {
        match f().await {
            Ok(value) => {
                if attempt > 0 {
                    info!(
                        operation = operation_name,
                        attempt, "Operation succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) => {
                if attempt + 1 < attempts {
                    let delay = base_delay.saturating_mul(2u32.saturating_pow(attempt));
                    warn!(
                        operation = operation_name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                last_error = Some(err);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Retry exhausted for {}", operation_name)))
}

/// Resets the syncing flag when a cycle ends, however it ends
struct SyncingGuard<'a>(&'a AtomicBool);

impl<'a> SyncingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for SyncingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Assembles a [`SyncEngine`] from its collaborators
///
/// A store and a transport are required; everything else has a default.
#[derive(Default)]
pub struct SyncEngineBuilder {
    config: SyncConfig,
    store: Option<Arc<dyn IMutationStore>>,
    transport: Option<Arc<dyn ISyncTransport>>,
    server_state: Option<Arc<dyn IServerStateFetcher>>,
    resolver: Option<ConflictResolver>,
    network: Option<Arc<dyn INetworkObserver>>,
    scheduler: Option<CarbonAwareScheduler>,
}

impl SyncEngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(mut self, store: Arc<dyn IMutationStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn ISyncTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Source of authoritative server state; defaults to "never conflicts"
    pub fn server_state(mut self, fetcher: Arc<dyn IServerStateFetcher>) -> Self {
        self.server_state = Some(fetcher);
        self
    }

    /// Overrides the resolver built from `conflict_strategy`
    pub fn conflict_resolver(mut self, resolver: ConflictResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Without an observer the engine assumes it is online
    pub fn network_observer(mut self, observer: Arc<dyn INetworkObserver>) -> Self {
        self.network = Some(observer);
        self
    }

    pub fn scheduler(mut self, scheduler: CarbonAwareScheduler) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Loads the persisted queue and starts following network transitions
    ///
    /// An unreadable queue does not fail the build; the engine runs in memory
    /// and reports it through [`SyncEngine::get_health_status`].
    ///
    /// # Errors
    /// Returns `SyncError::MissingCollaborator` without a store or transport.
    pub async fn build(self) -> Result<SyncEngine, SyncError> {
        let store = self.store.ok_or(SyncError::MissingCollaborator("store"))?;
        let transport = self
            .transport
            .ok_or(SyncError::MissingCollaborator("transport"))?;

        let resolver = self.resolver.unwrap_or_else(|| {
            ConflictResolver::new(
                ConflictStrategy::from_config(&self.config.conflict_strategy),
                ConflictDetector::default(),
            )
        });

        if self.config.carbon_aware && self.scheduler.is_none() {
            warn!("Carbon-aware mode needs a scheduler, processing in-process");
        }
        let carbon_priority = Priority::parse_or_default(&self.config.carbon_priority);

        let online = self
            .network
            .as_ref()
            .map_or(true, |n| n.current_state().is_online());

        let queue = MutationQueue::new(store);
        queue.initialize().await;

        let inner = Arc::new(EngineInner {
            config: self.config,
            queue,
            transport,
            server_state: self
                .server_state
                .unwrap_or_else(|| Arc::new(NoServerState) as Arc<dyn IServerStateFetcher>),
            resolver,
            scheduler: self.scheduler,
            carbon_priority,
            state: SyncStateStore::new(SyncState::initial(online)),
            events: EventBus::new(),
            online: AtomicBool::new(online),
            syncing: AtomicBool::new(false),
            debounce_generation: AtomicU64::new(0),
            retry_generation: AtomicU64::new(0),
            scheduled: Mutex::new(HashSet::new()),
        });

        let engine = SyncEngine { inner };
        let snapshot = engine.inner.queue.snapshot().await;
        engine.refresh_queue_metrics(&snapshot);

        if let Some(network) = self.network {
            engine.follow_network(network.subscribe());
        }

        info!(
            pending = snapshot.len(),
            online,
            strategy = %engine.inner.resolver.strategy(),
            carbon_aware = engine.carbon_scheduler().is_some(),
            "Sync engine ready"
        );
        Ok(engine)
    }
}

// ============================================================================
// SyncEngine
// ============================================================================

struct EngineInner {
    config: SyncConfig,
    queue: MutationQueue,
    transport: Arc<dyn ISyncTransport>,
    server_state: Arc<dyn IServerStateFetcher>,
    resolver: ConflictResolver,
    scheduler: Option<CarbonAwareScheduler>,
    carbon_priority: Priority,
    state: SyncStateStore,
    events: EventBus,
    online: AtomicBool,
    syncing: AtomicBool,
    debounce_generation: AtomicU64,
    retry_generation: AtomicU64,
    /// Mutations handed to the scheduler and not yet run
    scheduled: Mutex<HashSet<MutationId>>,
}

/// Offline-first mutation sync engine
///
/// Cloning is cheap; clones drive the same queue and state. One engine
/// instance owns its store: running two engines against the same persisted
/// queue is not supported.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    pub fn builder() -> SyncEngineBuilder {
        SyncEngineBuilder::new()
    }

    fn max_retries(&self) -> u32 {
        self.inner.config.max_retries
    }

    fn base_delay(&self) -> Duration {
        Duration::from_millis(self.inner.config.retry_base_delay_ms)
    }

    fn carbon_scheduler(&self) -> Option<&CarbonAwareScheduler> {
        self.inner
            .scheduler
            .as_ref()
            .filter(|_| self.inner.config.carbon_aware)
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::Acquire)
    }

    pub fn is_syncing(&self) -> bool {
        self.inner.syncing.load(Ordering::Acquire)
    }

    // ========================================================================
    // State and events
    // ========================================================================

    /// Current sync state snapshot
    pub fn sync_state(&self) -> SyncState {
        self.inner.state.get()
    }

    /// Calls `f` with the current state now and after every change
    pub fn subscribe_sync_state<F>(&self, f: F) -> Subscription
    where
        F: Fn(&SyncState) + Send + Sync + 'static,
    {
        self.inner.state.subscribe(f)
    }

    /// Receiver following the sync state
    pub fn watch_sync_state(&self) -> watch::Receiver<SyncState> {
        self.inner.state.watch()
    }

    /// Registers a listener for one kind of engine event
    pub fn add_event_listener<F>(&self, kind: SyncEventKind, listener: F) -> Subscription
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.inner.events.add_event_listener(kind, listener)
    }

    fn emit(&self, event: SyncEvent) {
        self.inner.events.emit(&event);
    }

    /// Updates the state, emitting `STATUS_CHANGE` if the status moved
    fn update_state(&self, f: impl FnOnce(&mut SyncState)) -> SyncState {
        let (previous, current) = self.inner.state.update(f);
        if previous != current.status {
            debug!(from = %previous, to = %current.status, "Sync status changed");
            self.emit(SyncEvent::StatusChange {
                previous,
                current: current.status,
            });
        }
        current
    }

    fn refresh_queue_metrics(&self, snapshot: &[Mutation]) -> SyncState {
        let pending = snapshot.len();
        let retry_count = snapshot.iter().map(|m| m.retry_count).max().unwrap_or(0);
        self.update_state(|s| {
            s.pending = pending;
            s.retry_count = retry_count;
        })
    }

    /// Status for a settled (not syncing) engine given the queue
    fn settled_status(&self, snapshot: &[Mutation]) -> SyncStatus {
        if !self.is_online() {
            SyncStatus::Offline
        } else if snapshot.iter().any(|m| !m.can_retry(self.max_retries())) {
            SyncStatus::Error
        } else {
            SyncStatus::Idle
        }
    }

    // ========================================================================
    // Queue management
    // ========================================================================

    /// Queues a mutation
    ///
    /// Missing id and timestamp are assigned. When online and no cycle is
    /// running, a debounced `process_queue` is scheduled so near-simultaneous
    /// adds are sent together.
    ///
    /// # Errors
    /// Returns `SyncError::DomainError` for a blank type tag,
    /// `SyncError::DuplicateMutation` if the id is already queued and
    /// `SyncError::Storage` if the queue cannot be persisted.
    #[tracing::instrument(skip(self, draft), fields(kind = %draft.kind))]
    pub async fn add_mutation(&self, draft: MutationDraft) -> Result<Mutation, SyncError> {
        let mutation = draft.into_mutation(Utc::now())?;
        self.inner.queue.append(mutation.clone()).await?;

        let snapshot = self.inner.queue.snapshot().await;
        let state = self.refresh_queue_metrics(&snapshot);
        debug!(mutation_id = %mutation.id, pending = state.pending, "Mutation queued");
        self.emit(SyncEvent::QueueUpdated {
            action: QueueAction::Added,
            pending: state.pending,
        });

        if self.is_online() && !self.is_syncing() {
            self.schedule_debounced_process();
        }
        Ok(mutation)
    }

    /// Queue snapshot with derived age and retry eligibility
    pub async fn get_queue(&self) -> Vec<QueuedMutation> {
        let now = Utc::now();
        let max = self.max_retries();
        self.inner
            .queue
            .snapshot()
            .await
            .into_iter()
            .map(|m| QueuedMutation::new(m, now, max))
            .collect()
    }

    pub async fn get_queue_stats(&self) -> QueueStats {
        let snapshot = self.inner.queue.snapshot().await;
        QueueStats::compute(
            &snapshot,
            Utc::now(),
            self.max_retries(),
            chrono::Duration::hours(self.inner.config.stale_after_hours as i64),
        )
    }

    /// Drops every queued mutation; returns how many were removed
    #[tracing::instrument(skip(self))]
    pub async fn clear_queue(&self) -> Result<usize, SyncError> {
        let removed = self.inner.queue.clear().await?;
        warn!(count = removed.len(), "Mutation queue cleared");

        let status = self.settled_status(&[]);
        self.update_state(|s| {
            s.pending = 0;
            s.retry_count = 0;
            if s.status == SyncStatus::Error {
                s.status = status;
            }
        });
        self.emit(SyncEvent::QueueUpdated {
            action: QueueAction::Cleared,
            pending: 0,
        });
        Ok(removed.len())
    }

    /// Removes one mutation; returns false if it was not queued
    #[tracing::instrument(skip(self))]
    pub async fn remove_mutation(&self, id: &MutationId) -> Result<bool, SyncError> {
        let removed = self.inner.queue.remove(vec![id.clone()]).await?;
        if removed.is_empty() {
            return Ok(false);
        }
        info!(mutation_id = %id, "Mutation removed");

        let snapshot = self.inner.queue.snapshot().await;
        self.settle_after_manual_change(&snapshot);
        self.emit(SyncEvent::QueueUpdated {
            action: QueueAction::Removed,
            pending: snapshot.len(),
        });
        Ok(true)
    }

    /// Leaves `error` once no exhausted mutation remains
    fn settle_after_manual_change(&self, snapshot: &[Mutation]) {
        self.refresh_queue_metrics(snapshot);
        let status = self.settled_status(snapshot);
        self.update_state(|s| {
            if s.status == SyncStatus::Error && status != SyncStatus::Error {
                s.status = status;
            }
        });
    }

    /// Sends one mutation now, ignoring queue order and retry exhaustion
    ///
    /// # Errors
    /// Returns `SyncError::Offline` when offline and
    /// `SyncError::MutationNotFound` if the id is not queued. A failed
    /// delivery is not an error: it is recorded and returned as
    /// [`MutationOutcome::Failed`].
    #[tracing::instrument(skip(self))]
    pub async fn force_sync_mutation(&self, id: &MutationId) -> Result<MutationOutcome, SyncError> {
        if !self.is_online() {
            return Err(SyncError::Offline);
        }
        let mutation = self
            .inner
            .queue
            .get(id)
            .await
            .ok_or_else(|| SyncError::MutationNotFound(id.clone()))?;

        let attempts = self
            .max_retries()
            .saturating_sub(mutation.retry_count)
            .max(1);
        let outcome = self.process_single_mutation(mutation, attempts).await;

        match &outcome {
            MutationOutcome::Synced { .. } | MutationOutcome::Skipped { .. } => {
                self.complete_successes(vec![outcome.clone()]).await?;
            }
            MutationOutcome::Failed { error, .. } => {
                self.record_failures(vec![(id.clone(), error.clone())]).await?;
            }
        }

        let snapshot = self.inner.queue.snapshot().await;
        self.settle_after_manual_change(&snapshot);
        Ok(outcome)
    }

    /// Aggregated health from queue statistics and the sync state
    pub async fn get_health_status(&self) -> HealthReport {
        let stats = self.get_queue_stats().await;
        let report = HealthReport::assess(&stats, &self.sync_state());
        match self.inner.queue.storage_problem() {
            Some(problem) => report.with_storage_problem(&problem),
            None => report,
        }
    }

    // ========================================================================
    // Network
    // ========================================================================

    fn follow_network(&self, mut rx: watch::Receiver<NetworkState>) {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let state = *rx.borrow_and_update();
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                SyncEngine { inner }.set_network_state(state).await;
            }
        });
    }

    /// Applies a connectivity transition
    ///
    /// Going offline suppresses processing (adds are still accepted). Going
    /// online sets the status to `idle` and processes the queue.
    pub async fn set_network_state(&self, state: NetworkState) {
        let was_online = self.inner.online.swap(state.is_online(), Ordering::AcqRel);

        match state {
            NetworkState::Offline => {
                info!("Offline, sync suspended");
                self.update_state(|s| s.status = SyncStatus::Offline);
            }
            NetworkState::Online => {
                if !was_online {
                    info!("Online, resuming sync");
                }
                self.update_state(|s| s.status = SyncStatus::Idle);
                if let Err(e) = self.process_queue(ProcessOptions::default()).await {
                    error!(error = %e, "Queue processing after reconnect failed");
                }
            }
        }
    }

    // ========================================================================
    // Timers
    // ========================================================================

    fn schedule_debounced_process(&self) {
        let generation = self.inner.debounce_generation.fetch_add(1, Ordering::AcqRel) + 1;
        let delay = Duration::from_millis(self.inner.config.debounce_ms);
        let weak = Arc::downgrade(&self.inner);

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            // A later add or a forced sync superseded this timer
            if inner.debounce_generation.load(Ordering::Acquire) != generation {
                return;
            }
            if let Err(e) = (SyncEngine { inner })
                .process_queue(ProcessOptions::default())
                .await
            {
                error!(error = %e, "Debounced queue processing failed");
            }
        });
    }

    fn schedule_retry(&self) {
        let generation = self.inner.retry_generation.fetch_add(1, Ordering::AcqRel) + 1;
        let delay = self.base_delay().saturating_mul(2);
        let weak = Arc::downgrade(&self.inner);
        debug!(delay_ms = delay.as_millis() as u64, "Scheduling retry cycle");

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.retry_generation.load(Ordering::Acquire) != generation {
                return;
            }
            let engine = SyncEngine { inner };
            if !engine.is_online() {
                return;
            }
            if let Err(e) = engine.process_queue(ProcessOptions::default()).await {
                error!(error = %e, "Retry cycle failed");
            }
        });
    }

    fn supersede_timers(&self) {
        self.inner.debounce_generation.fetch_add(1, Ordering::AcqRel);
        self.inner.retry_generation.fetch_add(1, Ordering::AcqRel);
    }

    // ========================================================================
    // Processing
    // ========================================================================

    /// Runs a sync cycle now, in-process, superseding pending timers
    #[tracing::instrument(skip(self))]
    pub async fn force_sync(&self) -> Result<SyncState, SyncError> {
        self.supersede_timers();
        self.process_queue(ProcessOptions::forced()).await
    }

    /// Drains the queue
    ///
    /// A no-op that only reports the state while offline or while another
    /// cycle is running.
    ///
    /// # Errors
    /// Returns `SyncError::Storage` if queue updates cannot be persisted.
    #[tracing::instrument(skip(self))]
    pub async fn process_queue(&self, options: ProcessOptions) -> Result<SyncState, SyncError> {
        if !self.is_online() {
            debug!("Offline, skipping queue processing");
            return Ok(self.sync_state());
        }

        let Some(guard) = SyncingGuard::acquire(&self.inner.syncing) else {
            debug!("Sync cycle already running");
            return Ok(self.sync_state());
        };

        let snapshot = self.inner.queue.snapshot().await;
        if snapshot.is_empty() {
            self.inner.retry_generation.fetch_add(1, Ordering::AcqRel);
            return Ok(self.update_state(|s| {
                s.status = SyncStatus::Synced;
                s.pending = 0;
                s.retry_count = 0;
                s.progress = SyncProgress::new(0, 0);
                s.error = None;
                s.last_sync = Some(Utc::now());
            }));
        }

        if !options.force {
            if let Some(scheduler) = self.carbon_scheduler() {
                let batches = self.claim_batches(&snapshot);
                // Inline (urgent) batches call back into the engine
                drop(guard);
                self.delegate(scheduler, batches).await;
                return Ok(self.refresh_queue_metrics(&self.inner.queue.snapshot().await));
            }
        }

        self.run_cycle(snapshot, CycleMode::InProcess).await?;
        drop(guard);
        Ok(self.sync_state())
    }

    /// Groups retriable, not yet scheduled mutations by type, in queue order
    fn claim_batches(&self, snapshot: &[Mutation]) -> Vec<(String, Vec<MutationId>)> {
        let max = self.max_retries();
        let mut scheduled = self.inner.scheduled.lock().unwrap();
        let mut batches: Vec<(String, Vec<MutationId>)> = Vec::new();

        for m in snapshot {
            if !m.can_retry(max) || !scheduled.insert(m.id.clone()) {
                continue;
            }
            match batches.iter_mut().find(|(kind, _)| kind == &m.kind) {
                Some((_, ids)) => ids.push(m.id.clone()),
                None => batches.push((m.kind.clone(), vec![m.id.clone()])),
            }
        }
        batches
    }

    async fn delegate(
        &self,
        scheduler: &CarbonAwareScheduler,
        batches: Vec<(String, Vec<MutationId>)>,
    ) {
        for (kind, ids) in batches {
            let count = ids.len();
            let runner = SyncBatchRunner {
                engine: Arc::downgrade(&self.inner),
                ids,
            };
            let spec = TaskSpec::new(SYNC_TASK_TYPE, TaskWork::single(runner))
                .with_estimated_duration(Duration::from_secs(count as u64));

            match scheduler
                .schedule_task(spec, self.inner.carbon_priority, ScheduleOptions::default())
                .await
            {
                Ok(ScheduleOutcome::Scheduled { id, at }) => {
                    info!(
                        kind = %kind,
                        count,
                        task_id = %id,
                        at = %at,
                        "Batch handed to scheduler"
                    );
                }
                Ok(ScheduleOutcome::Executed(report)) => {
                    debug!(
                        kind = %kind,
                        count,
                        attempts = report.attempts,
                        "Batch executed inline"
                    );
                }
                Err(e) => {
                    warn!(kind = %kind, count, error = %e, "Scheduled batch failed");
                }
            }
        }
    }

    /// Called by the scheduler when a batch task runs
    async fn run_scheduled_batch(&self, ids: &[MutationId]) -> anyhow::Result<CycleReport> {
        if !self.is_online() {
            anyhow::bail!("offline");
        }
        let Some(_guard) = SyncingGuard::acquire(&self.inner.syncing) else {
            anyhow::bail!("another sync cycle is running");
        };

        let wanted: HashSet<&MutationId> = ids.iter().collect();
        let batch: Vec<Mutation> = self
            .inner
            .queue
            .snapshot()
            .await
            .into_iter()
            .filter(|m| wanted.contains(&m.id))
            .collect();

        Ok(self.run_cycle(batch, CycleMode::Scheduled).await?)
    }

    /// One pass over `mutations`, in order
    async fn run_cycle(
        &self,
        mutations: Vec<Mutation>,
        mode: CycleMode,
    ) -> Result<CycleReport, SyncError> {
        let max = self.max_retries();
        let eligible: Vec<Mutation> = mutations.into_iter().filter(|m| m.can_retry(max)).collect();
        let total = eligible.len();
        let processed: HashSet<MutationId> = eligible.iter().map(|m| m.id.clone()).collect();

        self.update_state(|s| {
            s.status = SyncStatus::Syncing;
            s.progress = SyncProgress::new(0, total);
        });
        info!(total, mode = ?mode, "Sync cycle started");

        self.inner
            .queue
            .set_status(processed.iter().cloned().collect(), MutationStatus::Syncing)
            .await?;

        let mut successes = Vec::new();
        let mut failures = Vec::new();

        for (idx, queued) in eligible.into_iter().enumerate() {
            // Removed or force-synced while this cycle was running
            if let Some(current) = self.inner.queue.get(&queued.id).await {
                let attempts = match mode {
                    CycleMode::InProcess => max.saturating_sub(current.retry_count),
                    CycleMode::Scheduled => 1,
                };
                let id = current.id.clone();
                match self.process_single_mutation(current, attempts).await {
                    MutationOutcome::Failed { error, .. } => failures.push((id, error)),
                    success => successes.push(success),
                }
            }

            let progress = SyncProgress::new(idx + 1, total);
            self.update_state(|s| s.progress = progress);
            self.emit(SyncEvent::ProgressUpdate(progress));
        }

        let report = CycleReport {
            synced: successes.len(),
            failed: failures.len(),
        };
        self.complete_successes(successes).await?;
        let updated = self.record_failures(failures).await?;

        let snapshot = self.inner.queue.snapshot().await;
        let exhausted = snapshot.iter().filter(|m| !m.can_retry(max)).count();
        let retriable_failures = updated.iter().any(|m| m.can_retry(max));
        let last_error = updated.last().and_then(|m| m.last_error.clone());

        let status = if !self.is_online() {
            SyncStatus::Offline
        } else if exhausted > 0 {
            SyncStatus::Error
        } else if retriable_failures {
            SyncStatus::Idle
        } else {
            SyncStatus::Synced
        };

        self.refresh_queue_metrics(&snapshot);
        self.update_state(|s| {
            s.status = status;
            if let Some(e) = last_error {
                s.error = Some(e);
            } else if status == SyncStatus::Synced {
                s.error = None;
            }
            if status == SyncStatus::Synced {
                s.last_sync = Some(Utc::now());
            }
        });

        info!(
            synced = report.synced,
            failed = report.failed,
            exhausted,
            status = %status,
            "Sync cycle finished"
        );

        // Pending retry timers are stale now; arm a fresh one if needed
        self.inner.retry_generation.fetch_add(1, Ordering::AcqRel);
        if mode == CycleMode::InProcess && retriable_failures && self.is_online() {
            self.schedule_retry();
        }

        // Added while this cycle was running
        let arrived = snapshot
            .iter()
            .any(|m| m.can_retry(max) && !processed.contains(&m.id));
        if arrived && self.is_online() {
            self.schedule_debounced_process();
        }

        Ok(report)
    }

    /// Removes delivered mutations and emits `MUTATION_SYNCED`
    async fn complete_successes(&self, successes: Vec<MutationOutcome>) -> Result<(), SyncError> {
        if successes.is_empty() {
            return Ok(());
        }
        let ids = successes
            .iter()
            .filter_map(|o| match o {
                MutationOutcome::Synced { mutation, .. }
                | MutationOutcome::Skipped { mutation, .. } => Some(mutation.id.clone()),
                MutationOutcome::Failed { .. } => None,
            })
            .collect();
        self.inner.queue.remove(ids).await?;

        for outcome in successes {
            match outcome {
                MutationOutcome::Synced { mutation, data } => {
                    self.emit(SyncEvent::MutationSynced { mutation, data });
                }
                MutationOutcome::Skipped { mutation, .. } => {
                    self.emit(SyncEvent::MutationSynced {
                        mutation,
                        data: Value::Null,
                    });
                }
                MutationOutcome::Failed { .. } => {}
            }
        }

        let pending = self.inner.queue.len().await;
        self.emit(SyncEvent::QueueUpdated {
            action: QueueAction::Synced,
            pending,
        });
        Ok(())
    }

    /// Records failures and emits `SYNC_ERROR`; returns the updated mutations
    async fn record_failures(
        &self,
        failures: Vec<(MutationId, String)>,
    ) -> Result<Vec<Mutation>, SyncError> {
        if failures.is_empty() {
            return Ok(Vec::new());
        }
        let max = self.max_retries();
        let updated = self.inner.queue.record_failures(failures, Utc::now()).await?;

        for m in &updated {
            let can_retry = m.can_retry(max);
            if can_retry {
                warn!(mutation_id = %m.id, retry_count = m.retry_count, "Mutation sync failed");
            } else {
                error!(
                    mutation_id = %m.id,
                    retry_count = m.retry_count,
                    "Mutation exhausted its retries, kept for operator action"
                );
            }
            self.emit(SyncEvent::SyncError {
                mutation_id: m.id.clone(),
                error: m.last_error.clone().unwrap_or_default(),
                retry_count: m.retry_count,
                can_retry,
            });
        }

        let pending = self.inner.queue.len().await;
        self.emit(SyncEvent::QueueUpdated {
            action: QueueAction::Failed,
            pending,
        });
        Ok(updated)
    }

    /// Delivers one mutation: server state, conflict policy, transport
    ///
    /// The transport gets up to `attempts` tries with exponential backoff.
    /// Any failure, including a failed server-state fetch, is transient.
    pub async fn process_single_mutation(
        &self,
        mutation: Mutation,
        attempts: u32,
    ) -> MutationOutcome {
        let retries_exhausted = !mutation.can_retry(self.max_retries().saturating_sub(1));
        let failed = |error: String| MutationOutcome::Failed {
            error,
            retries_exhausted,
        };

        let server_state = match self.inner.server_state.fetch(&mutation).await {
            Ok(state) => state,
            Err(e) => return failed(format!("Server state fetch failed: {e:#}")),
        };

        let resolution = match self
            .inner
            .resolver
            .resolve(mutation.clone(), server_state.as_ref())
        {
            Ok(resolution) => resolution,
            Err(e) => return failed(e.to_string()),
        };
        let to_send = match resolution {
            Resolution::Discarded(reason) => {
                info!(
                    mutation_id = %mutation.id,
                    reason = %reason,
                    "Conflict resolved by skipping mutation"
                );
                return MutationOutcome::Skipped { mutation, reason };
            }
            Resolution::NoConflict(m) | Resolution::KeepLocal(m) | Resolution::Rewritten(m) => m,
        };

        let transport = &self.inner.transport;
        let outgoing = &to_send;
        let operation = format!("sync {}", to_send.id);
        let result = with_retry(&operation, attempts, self.base_delay(), move || {
            transport.sync(outgoing)
        })
        .await;

        match result {
            Ok(data) => {
                debug!(mutation_id = %to_send.id, "Mutation delivered");
                MutationOutcome::Synced {
                    mutation: to_send,
                    data,
                }
            }
            Err(e) => failed(format!("{e:#}")),
        }
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("state", &self.sync_state())
            .field("online", &self.is_online())
            .field("carbon_aware", &self.carbon_scheduler().is_some())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// SyncBatchRunner
// ============================================================================

/// Scheduler task sending a batch of queued mutations through the engine
///
/// Holds the engine weakly so pending tasks do not keep it alive. When the
/// task is dropped (run, failed for good, or cancelled) its mutations become
/// eligible for scheduling again.
struct SyncBatchRunner {
    engine: Weak<EngineInner>,
    ids: Vec<MutationId>,
}

#[async_trait]
impl TaskRunner for SyncBatchRunner {
    async fn run(&self) -> anyhow::Result<()> {
        let Some(inner) = self.engine.upgrade() else {
            return Ok(());
        };
        let report = SyncEngine { inner }.run_scheduled_batch(&self.ids).await?;
        if report.failed > 0 {
            anyhow::bail!(
                "{} of {} mutation(s) failed",
                report.failed,
                report.failed + report.synced
            );
        }
        Ok(())
    }
}

impl Drop for SyncBatchRunner {
    fn drop(&mut self) {
        if let Some(inner) = self.engine.upgrade() {
            let mut scheduled = inner.scheduled.lock().unwrap();
            for id in &self.ids {
                scheduled.remove(id);
            }
        }
    }
}
