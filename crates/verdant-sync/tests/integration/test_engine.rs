//! Queue draining, retries, conflicts and connectivity through the engine API

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use verdant_conflict::{ConflictDetector, ConflictResolver, ConflictStrategy};
use verdant_core::domain::{
    HealthLevel, MutationId, QueueAction, SyncEvent, SyncEventKind, SyncStatus,
};
use verdant_core::ports::NetworkState;
use verdant_sync::{ManualNetworkObserver, MutationOutcome, ProcessOptions, SyncError};

use crate::common::{builder, draft, record_events, FixedServerState, ScriptedTransport};

#[tokio::test]
async fn test_empty_queue_settles_synced() {
    let engine = builder(ScriptedTransport::accepting()).build().await.unwrap();

    let state = engine.process_queue(ProcessOptions::default()).await.unwrap();

    assert_eq!(state.status, SyncStatus::Synced);
    assert_eq!(state.pending, 0);
    assert_eq!(state.progress.percentage, 100);
    assert!(state.last_sync.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_mutations_are_sent_in_insertion_order() {
    let transport = ScriptedTransport::accepting();
    let engine = builder(transport.clone()).build().await.unwrap();

    engine.add_mutation(draft("A", json!({"n": 1}))).await.unwrap();
    engine.add_mutation(draft("B", json!({"n": 2}))).await.unwrap();
    engine.add_mutation(draft("C", json!({"n": 3}))).await.unwrap();

    let state = engine.force_sync().await.unwrap();

    assert_eq!(transport.sent_kinds(), vec!["A", "B", "C"]);
    assert_eq!(state.status, SyncStatus::Synced);
    assert!(engine.get_queue().await.is_empty());

    // The superseded debounce timer must not send anything again
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(transport.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_server_wins_discards_without_calling_transport() {
    let transport = ScriptedTransport::accepting();
    let engine = builder(transport.clone())
        .server_state(Arc::new(FixedServerState(json!({"name": "server"}))))
        .conflict_resolver(ConflictResolver::new(
            ConflictStrategy::ServerWins,
            ConflictDetector::always(),
        ))
        .build()
        .await
        .unwrap();
    let (synced, _sub) = record_events(&engine, SyncEventKind::MutationSynced);

    let mutation = engine
        .add_mutation(draft("RENAME", json!({"name": "local"})))
        .await
        .unwrap();
    let state = engine.force_sync().await.unwrap();

    assert_eq!(transport.calls(), 0);
    assert!(engine.get_queue().await.is_empty());
    assert_eq!(state.status, SyncStatus::Synced);

    let synced = synced.lock().unwrap();
    assert_eq!(synced.len(), 1);
    match &synced[0] {
        SyncEvent::MutationSynced { mutation: m, data } => {
            assert_eq!(m.id, mutation.id);
            assert_eq!(data, &Value::Null);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_custom_resolver_rewrites_payload() {
    let transport = ScriptedTransport::accepting();
    let strategy = ConflictStrategy::custom(|local, server| {
        let mut merged = local.clone();
        merged.payload = json!({"local": local.payload, "server": server});
        Some(merged)
    });
    let engine = builder(transport.clone())
        .server_state(Arc::new(FixedServerState(json!({"v": 7}))))
        .conflict_resolver(ConflictResolver::new(strategy, ConflictDetector::always()))
        .build()
        .await
        .unwrap();

    engine.add_mutation(draft("EDIT", json!({"v": 8}))).await.unwrap();
    engine.force_sync().await.unwrap();

    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].payload, json!({"local": {"v": 8}, "server": {"v": 7}}));
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_retry_within_one_cycle() {
    let transport = ScriptedTransport::failing_first(2);
    let engine = builder(transport.clone()).build().await.unwrap();

    engine.add_mutation(draft("A", Value::Null)).await.unwrap();
    let state = engine.force_sync().await.unwrap();

    assert_eq!(transport.calls(), 3);
    assert_eq!(state.status, SyncStatus::Synced);
    assert_eq!(state.retry_count, 0);
    assert!(engine.get_queue().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_rejected_mutation_exhausts_retries_across_cycles() {
    let transport = ScriptedTransport::rejecting();
    let engine = builder(transport.clone()).build().await.unwrap();
    let (errors, _sub) = record_events(&engine, SyncEventKind::SyncError);

    engine.add_mutation(draft("A", Value::Null)).await.unwrap();

    let mut retry_counts = Vec::new();
    let mut statuses = Vec::new();
    for _ in 0..3 {
        let state = engine.process_queue(ProcessOptions::default()).await.unwrap();
        retry_counts.push(engine.get_queue().await[0].mutation.retry_count);
        statuses.push(state.status);
    }

    assert_eq!(retry_counts, vec![1, 2, 3]);
    assert_eq!(statuses, vec![SyncStatus::Idle, SyncStatus::Idle, SyncStatus::Error]);
    // Remaining budget per cycle: 3, then 2, then 1
    assert_eq!(transport.calls(), 6);

    let queue = engine.get_queue().await;
    assert_eq!(queue.len(), 1);
    assert!(!queue[0].can_retry);
    assert_eq!(
        queue[0].mutation.last_error.as_deref(),
        Some("HTTP 503: service unavailable")
    );

    let errors = errors.lock().unwrap();
    let flags: Vec<bool> = errors
        .iter()
        .map(|e| match e {
            SyncEvent::SyncError { can_retry, .. } => *can_retry,
            other => panic!("unexpected event {other:?}"),
        })
        .collect();
    assert_eq!(flags, vec![true, true, false]);

    // Exhausted mutations are not sent again
    engine.process_queue(ProcessOptions::default()).await.unwrap();
    assert_eq!(transport.calls(), 6);
}

#[tokio::test(start_paused = true)]
async fn test_retriable_failure_schedules_rerun() {
    let transport = ScriptedTransport::failing_first(3);
    let engine = builder(transport.clone()).build().await.unwrap();

    engine.add_mutation(draft("A", Value::Null)).await.unwrap();
    let state = engine.force_sync().await.unwrap();
    assert_eq!(state.status, SyncStatus::Idle);
    assert_eq!(state.error.as_deref(), Some("HTTP 503: service unavailable"));

    // Rerun fires at twice the base delay
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(transport.calls(), 4);
    assert_eq!(engine.sync_state().status, SyncStatus::Synced);
    assert!(engine.get_queue().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_processing_runs_one_pass() {
    let transport = ScriptedTransport::slow(Duration::from_secs(1));
    let engine = builder(transport.clone()).build().await.unwrap();
    engine.add_mutation(draft("A", Value::Null)).await.unwrap();

    let (first, second) = tokio::join!(
        engine.process_queue(ProcessOptions::default()),
        engine.process_queue(ProcessOptions::default()),
    );

    assert_eq!(transport.calls(), 1);
    assert_eq!(first.unwrap().status, SyncStatus::Synced);
    assert_eq!(second.unwrap().status, SyncStatus::Syncing);
}

#[tokio::test(start_paused = true)]
async fn test_offline_adds_sync_when_back_online() {
    let transport = ScriptedTransport::accepting();
    let observer = Arc::new(ManualNetworkObserver::offline());
    let engine = builder(transport.clone())
        .network_observer(observer.clone())
        .build()
        .await
        .unwrap();

    engine.add_mutation(draft("A", Value::Null)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(transport.calls(), 0);
    assert_eq!(engine.get_queue().await.len(), 1);
    assert_eq!(engine.sync_state().status, SyncStatus::Offline);
    assert_eq!(engine.sync_state().pending, 1);

    observer.set_state(NetworkState::Online);
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(transport.calls(), 1);
    assert!(engine.get_queue().await.is_empty());
    assert_eq!(engine.sync_state().status, SyncStatus::Synced);
}

#[tokio::test(start_paused = true)]
async fn test_going_offline_stops_processing() {
    let transport = ScriptedTransport::accepting();
    let observer = Arc::new(ManualNetworkObserver::online());
    let engine = builder(transport.clone())
        .network_observer(observer.clone())
        .build()
        .await
        .unwrap();

    observer.set_state(NetworkState::Offline);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(engine.sync_state().status, SyncStatus::Offline);

    engine.add_mutation(draft("A", Value::Null)).await.unwrap();
    let state = engine.process_queue(ProcessOptions::default()).await.unwrap();

    assert_eq!(state.status, SyncStatus::Offline);
    assert_eq!(transport.calls(), 0);

    let id = engine.get_queue().await[0].mutation.id.clone();
    assert!(matches!(
        engine.force_sync_mutation(&id).await,
        Err(SyncError::Offline)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_status_and_queue_events_are_emitted() {
    let engine = builder(ScriptedTransport::accepting()).build().await.unwrap();
    let (statuses, _s1) = record_events(&engine, SyncEventKind::StatusChange);
    let (queue_events, _s2) = record_events(&engine, SyncEventKind::QueueUpdated);
    let (progress, _s3) = record_events(&engine, SyncEventKind::ProgressUpdate);

    engine.add_mutation(draft("A", Value::Null)).await.unwrap();
    engine.add_mutation(draft("B", Value::Null)).await.unwrap();
    engine.force_sync().await.unwrap();

    let transitions: Vec<(SyncStatus, SyncStatus)> = statuses
        .lock()
        .unwrap()
        .iter()
        .map(|e| match e {
            SyncEvent::StatusChange { previous, current } => (*previous, *current),
            other => panic!("unexpected event {other:?}"),
        })
        .collect();
    assert_eq!(
        transitions,
        vec![
            (SyncStatus::Idle, SyncStatus::Syncing),
            (SyncStatus::Syncing, SyncStatus::Synced),
        ]
    );

    let actions: Vec<(QueueAction, usize)> = queue_events
        .lock()
        .unwrap()
        .iter()
        .map(|e| match e {
            SyncEvent::QueueUpdated { action, pending } => (*action, *pending),
            other => panic!("unexpected event {other:?}"),
        })
        .collect();
    assert_eq!(
        actions,
        vec![
            (QueueAction::Added, 1),
            (QueueAction::Added, 2),
            (QueueAction::Synced, 0),
        ]
    );

    let last = progress.lock().unwrap().last().cloned();
    match last {
        Some(SyncEvent::ProgressUpdate(p)) => {
            assert_eq!((p.current, p.total, p.percentage), (2, 2, 100));
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_panicking_listener_does_not_break_sync() {
    let transport = ScriptedTransport::accepting();
    let engine = builder(transport.clone()).build().await.unwrap();
    let _bad = engine.add_event_listener(SyncEventKind::QueueUpdated, |_| panic!("listener bug"));
    let (synced, _good) = record_events(&engine, SyncEventKind::MutationSynced);

    engine.add_mutation(draft("A", Value::Null)).await.unwrap();
    engine.force_sync().await.unwrap();

    assert_eq!(transport.calls(), 1);
    assert_eq!(synced.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_state_subscription_sees_current_and_updates() {
    let engine = builder(ScriptedTransport::accepting()).build().await.unwrap();
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let subscription = engine.subscribe_sync_state(move |state| {
        sink.lock().unwrap().push(state.pending);
    });

    engine.add_mutation(draft("A", Value::Null)).await.unwrap();
    subscription.unsubscribe();
    engine.clear_queue().await.unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.first(), Some(&0));
    assert_eq!(seen.last(), Some(&1));
}

#[tokio::test(start_paused = true)]
async fn test_operator_actions_recover_from_error() {
    let transport = ScriptedTransport::rejecting();
    let engine = builder(transport.clone()).build().await.unwrap();
    let failed = engine.add_mutation(draft("A", Value::Null)).await.unwrap();
    for _ in 0..3 {
        engine.process_queue(ProcessOptions::default()).await.unwrap();
    }
    assert_eq!(engine.sync_state().status, SyncStatus::Error);

    let health = engine.get_health_status().await;
    assert_eq!(health.status, HealthLevel::Error);
    let stats = engine.get_queue_stats().await;
    assert_eq!(stats.permanently_failed, 1);
    assert_eq!(stats.by_type.get("A"), Some(&1));

    // A forced send still tries once despite the exhausted budget
    let outcome = engine.force_sync_mutation(&failed.id).await.unwrap();
    assert!(matches!(outcome, MutationOutcome::Failed { retries_exhausted: true, .. }));

    assert!(engine.remove_mutation(&failed.id).await.unwrap());
    assert!(!engine.remove_mutation(&failed.id).await.unwrap());
    assert_eq!(engine.sync_state().status, SyncStatus::Idle);
    assert_eq!(engine.get_health_status().await.status, HealthLevel::Healthy);

    let missing = MutationId::new("missing").unwrap();
    assert!(matches!(
        engine.force_sync_mutation(&missing).await,
        Err(SyncError::MutationNotFound(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_force_sync_mutation_skips_the_line() {
    let transport = ScriptedTransport::accepting();
    let engine = builder(transport.clone()).build().await.unwrap();
    engine.add_mutation(draft("FIRST", Value::Null)).await.unwrap();
    let second = engine.add_mutation(draft("SECOND", Value::Null)).await.unwrap();

    // Before the debounce window elapses
    let outcome = engine.force_sync_mutation(&second.id).await.unwrap();
    assert!(outcome.is_success());
    assert_eq!(transport.sent_kinds(), vec!["SECOND"]);
    assert_eq!(engine.get_queue().await.len(), 1);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(transport.sent_kinds(), vec!["SECOND", "FIRST"]);
    assert!(engine.get_queue().await.is_empty());
}

#[tokio::test]
async fn test_duplicate_ids_are_rejected() {
    let engine = builder(ScriptedTransport::accepting()).build().await.unwrap();
    let id = MutationId::new("fixed").unwrap();
    engine
        .add_mutation(draft("A", Value::Null).with_id(id.clone()))
        .await
        .unwrap();
    let err = engine
        .add_mutation(draft("A", Value::Null).with_id(id))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::DuplicateMutation(_)));
}

#[tokio::test]
async fn test_blank_type_is_rejected() {
    let engine = builder(ScriptedTransport::accepting()).build().await.unwrap();
    let err = engine.add_mutation(draft("  ", Value::Null)).await.unwrap_err();
    assert!(matches!(err, SyncError::DomainError(_)));
    assert!(engine.get_queue().await.is_empty());
}
