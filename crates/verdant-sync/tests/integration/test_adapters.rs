//! HTTP transport against a mock endpoint and the JSON file store across
//! engine restarts

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use verdant_core::config::{SyncConfig, TransportConfig};
use verdant_core::domain::{HealthLevel, Mutation, MutationDraft, MutationId, SyncStatus};
use verdant_core::ports::{IMutationStore, ISyncTransport};
use verdant_sync::{
    HttpSyncTransport, JsonFileMutationStore, ManualNetworkObserver, ProcessOptions, SyncEngine,
};

use crate::common::ScriptedTransport;

fn mutation(id: &str) -> Mutation {
    MutationDraft::new("ADD_ITEM", json!({"name": "milk"}))
        .with_id(MutationId::new(id).unwrap())
        .into_mutation(chrono::Utc::now())
        .unwrap()
}

fn transport(server: &MockServer) -> HttpSyncTransport {
    HttpSyncTransport::new(format!("{}/mutations", server.uri()), Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_http_transport_posts_wire_record() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/mutations"))
        .and(body_partial_json(json!({
            "id": "m-1",
            "type": "ADD_ITEM",
            "payload": {"name": "milk"},
            "retryCount": 0,
            "status": "pending"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"serverId": 42})))
        .expect(1)
        .mount(&server)
        .await;

    let data = transport(&server).sync(&mutation("m-1")).await.unwrap();
    assert_eq!(data, json!({"serverId": 42}));
}

#[tokio::test]
async fn test_http_transport_no_content_is_null() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let data = transport(&server).sync(&mutation("m-1")).await.unwrap();
    assert_eq!(data, Value::Null);
}

#[tokio::test]
async fn test_http_transport_rejects_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("database down"))
        .mount(&server)
        .await;

    let err = transport(&server).sync(&mutation("m-1")).await.unwrap_err();
    let message = format!("{err:#}");
    assert!(message.contains("500"), "{message}");
    assert!(message.contains("database down"), "{message}");
}

#[tokio::test]
async fn test_http_transport_requires_endpoint() {
    assert!(HttpSyncTransport::from_config(&TransportConfig::default()).is_err());

    let transport = HttpSyncTransport::from_config(&TransportConfig {
        endpoint: Some("http://localhost:9/mutations".into()),
        timeout_secs: 1,
    })
    .unwrap();
    assert_eq!(transport.endpoint(), "http://localhost:9/mutations");
}

#[tokio::test]
async fn test_engine_drains_through_http_transport() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/mutations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(2)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let engine = SyncEngine::builder()
        .store(Arc::new(JsonFileMutationStore::new(dir.path().join("queue.json"))))
        .transport(Arc::new(transport(&server)))
        .build()
        .await
        .unwrap();

    engine
        .add_mutation(MutationDraft::new("ADD_ITEM", json!({"n": 1})))
        .await
        .unwrap();
    engine
        .add_mutation(MutationDraft::new("ADD_ITEM", json!({"n": 2})))
        .await
        .unwrap();
    let state = engine.force_sync().await.unwrap();

    assert_eq!(state.status, SyncStatus::Synced);
    assert!(engine.get_queue().await.is_empty());
}

#[tokio::test]
async fn test_queue_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let queue_file = dir.path().join("data").join("queue.json");

    // First process: offline, queues two mutations
    {
        let engine = SyncEngine::builder()
            .store(Arc::new(JsonFileMutationStore::new(&queue_file)))
            .transport(ScriptedTransport::accepting())
            .network_observer(Arc::new(ManualNetworkObserver::offline()))
            .build()
            .await
            .unwrap();
        engine
            .add_mutation(MutationDraft::new("FIRST", Value::Null))
            .await
            .unwrap();
        engine
            .add_mutation(MutationDraft::new("SECOND", Value::Null))
            .await
            .unwrap();
    }

    let persisted = JsonFileMutationStore::new(&queue_file).get().await.unwrap();
    assert_eq!(persisted.len(), 2);

    // Second process: online, drains in the original order
    let transport = ScriptedTransport::accepting();
    let engine = SyncEngine::builder()
        .config(SyncConfig {
            queue_file: queue_file.clone(),
            ..SyncConfig::default()
        })
        .store(Arc::new(JsonFileMutationStore::new(&queue_file)))
        .transport(transport.clone())
        .build()
        .await
        .unwrap();
    assert_eq!(engine.sync_state().pending, 2);

    engine.process_queue(ProcessOptions::default()).await.unwrap();

    assert_eq!(transport.sent_kinds(), vec!["FIRST", "SECOND"]);
    let persisted = JsonFileMutationStore::new(&queue_file).get().await.unwrap();
    assert!(persisted.is_empty());
}

#[tokio::test]
async fn test_corrupt_queue_file_runs_in_memory() {
    let dir = tempfile::tempdir().unwrap();
    let queue_file = dir.path().join("queue.json");
    let corrupt = b"[{\"id\": ".to_vec();
    std::fs::write(&queue_file, &corrupt).unwrap();

    let engine = SyncEngine::builder()
        .store(Arc::new(JsonFileMutationStore::new(&queue_file)))
        .transport(ScriptedTransport::accepting())
        .network_observer(Arc::new(ManualNetworkObserver::offline()))
        .build()
        .await
        .unwrap();

    let health = engine.get_health_status().await;
    assert_eq!(health.status, HealthLevel::Degraded);
    assert!(health.issues.iter().any(|i| i.contains("Corrupt mutation queue")));

    engine
        .add_mutation(MutationDraft::new("ADD_ITEM", Value::Null))
        .await
        .unwrap();
    assert_eq!(engine.get_queue().await.len(), 1);
    assert_eq!(std::fs::read(&queue_file).unwrap(), corrupt);
}
