//! Queue draining delegated to the carbon-aware scheduler

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use serde_json::Value;

use verdant_core::config::{SchedulerConfig, SyncConfig};
use verdant_core::domain::SyncStatus;
use verdant_scheduler::{
    CarbonAwareScheduler, CarbonDataService, CarbonForecast, DataSource, ForecastSlot, Priority,
    StaticDeviceProbe,
};
use verdant_sync::{ProcessOptions, SyncEngine};

use crate::common::{draft, ScriptedTransport};

fn scheduler() -> CarbonAwareScheduler {
    CarbonAwareScheduler::new(
        SchedulerConfig::default(),
        CarbonDataService::default(),
        Arc::new(StaticDeviceProbe::default()),
    )
}

/// Dirty grid for 12 hours, clean afterwards
fn dirty_then_clean(scheduler: &CarbonAwareScheduler) {
    let slots = (0..24)
        .map(|h| ForecastSlot::new(h, if h < 12 { 450.0 } else { 150.0 }, DataSource::Simulated))
        .collect();
    scheduler.set_forecast(CarbonForecast::new(Utc::now(), slots));
}

async fn carbon_engine(
    transport: Arc<ScriptedTransport>,
    scheduler: CarbonAwareScheduler,
    priority: &str,
) -> SyncEngine {
    SyncEngine::builder()
        .config(SyncConfig {
            carbon_aware: true,
            carbon_priority: priority.to_string(),
            ..SyncConfig::default()
        })
        .store(Arc::new(verdant_sync::MemoryMutationStore::default()))
        .transport(transport)
        .scheduler(scheduler)
        .build()
        .await
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_background_batch_waits_for_clean_window() {
    let scheduler = scheduler();
    dirty_then_clean(&scheduler);
    let transport = ScriptedTransport::accepting();
    let engine = carbon_engine(transport.clone(), scheduler.clone(), "background").await;

    engine.add_mutation(draft("ADD_ITEM", Value::Null)).await.unwrap();
    engine.add_mutation(draft("ADD_ITEM", Value::Null)).await.unwrap();
    engine.add_mutation(draft("DELETE_ITEM", Value::Null)).await.unwrap();
    engine.process_queue(ProcessOptions::default()).await.unwrap();

    // One task per mutation type, nothing sent yet
    assert_eq!(transport.calls(), 0);
    let status = scheduler.queue_status();
    assert_eq!(status.total, 2);
    assert_eq!(status.per_priority[&Priority::Background], 2);

    // Already handed over; not scheduled twice
    engine.process_queue(ProcessOptions::default()).await.unwrap();
    tokio::time::sleep(StdDuration::from_secs(1)).await;
    assert_eq!(scheduler.queue_status().total, 2);

    tokio::time::sleep(StdDuration::from_secs(13 * 3600)).await;

    // Both batches come due together; their relative order is not fixed
    let mut sent = transport.sent_kinds();
    sent.sort();
    assert_eq!(sent, vec!["ADD_ITEM", "ADD_ITEM", "DELETE_ITEM"]);
    assert!(engine.get_queue().await.is_empty());
    assert_eq!(engine.sync_state().status, SyncStatus::Synced);
    assert_eq!(scheduler.stats().tasks_executed, 2);
}

#[tokio::test(start_paused = true)]
async fn test_urgent_priority_runs_inline() {
    let scheduler = scheduler();
    let transport = ScriptedTransport::accepting();
    let engine = carbon_engine(transport.clone(), scheduler.clone(), "urgent").await;

    engine.add_mutation(draft("ADD_ITEM", Value::Null)).await.unwrap();
    engine.process_queue(ProcessOptions::default()).await.unwrap();

    assert_eq!(transport.calls(), 1);
    assert!(engine.get_queue().await.is_empty());
    assert_eq!(scheduler.queue_status().total, 0);
}

#[tokio::test(start_paused = true)]
async fn test_forced_sync_bypasses_scheduler() {
    let scheduler = scheduler();
    dirty_then_clean(&scheduler);
    let transport = ScriptedTransport::accepting();
    let engine = carbon_engine(transport.clone(), scheduler.clone(), "background").await;

    engine.add_mutation(draft("ADD_ITEM", Value::Null)).await.unwrap();
    let state = engine.force_sync().await.unwrap();

    assert_eq!(transport.calls(), 1);
    assert_eq!(state.status, SyncStatus::Synced);
    assert_eq!(scheduler.queue_status().total, 0);
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_owns_retries_in_carbon_mode() {
    let scheduler = scheduler();
    dirty_then_clean(&scheduler);
    let transport = ScriptedTransport::failing_first(1);
    let engine = carbon_engine(transport.clone(), scheduler.clone(), "background").await;

    engine.add_mutation(draft("ADD_ITEM", Value::Null)).await.unwrap();
    engine.process_queue(ProcessOptions::default()).await.unwrap();

    let results = scheduler.force_execute_all().await;
    assert_eq!(results.len(), 1);
    let report = results.into_iter().next().unwrap().unwrap();

    // One send per scheduler attempt: a failure, then the retry
    assert_eq!(report.attempts, 2);
    assert_eq!(transport.calls(), 2);
    assert!(engine.get_queue().await.is_empty());
}
