//! Identity reconciliation across sweeps
//!
//! These tests drive whole sweeps against mocked instances and verify that:
//! - Alias-keyed placeholders are re-keyed to the durable id exactly once
//! - The sink sees every resolved identity, including configured ones
//! - Failed resolutions keep the alias record alive without duplicates

use crate::helpers::*;
use fleetwatch::registry::IdentityMap;
use fleetwatch::store::InstanceStatus;
use pretty_assertions::assert_eq;
use tempfile::tempdir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_single_sweep_resolves_alias_target() {
    let server = MockServer::start().await;
    mount_metrics(&server, "known", 200, None).await;
    mount_metrics(&server, "web-b", 200, None).await;
    mount_identity(&server, "web-b", "durable-7").await;

    let dir = tempdir().unwrap();
    let store = open_store(&dir.path().join("state.json")).await;
    let (mut engine, sink) = create_engine(
        vec![
            target(&server, "known", Some("known-1")),
            target(&server, "web-b", None),
        ],
        store.clone(),
    )
    .await;

    engine.sweep().await;

    assert_eq!(store.keys().await, vec!["durable-7", "known-1"]);
    for key in ["durable-7", "known-1"] {
        assert_eq!(store.get(key).await.unwrap().status, InstanceStatus::Online);
    }
    assert_eq!(store.get("durable-7").await.unwrap().alias, "web-b");

    let expected: IdentityMap = [
        (identity_url(&server, "known"), "known-1".to_string()),
        (identity_url(&server, "web-b"), "durable-7".to_string()),
    ]
    .into_iter()
    .collect();
    assert_eq!(sink.calls(), vec![expected]);
}

#[tokio::test]
async fn test_late_identity_rekeys_without_duplicates() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/web-b/identity"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(3)
        .mount(&server)
        .await;
    mount_identity(&server, "web-b", "durable-7").await;

    // online, offline, online, online
    mount_metrics(&server, "web-b", 200, Some(1)).await;
    mount_metrics(&server, "web-b", 500, Some(1)).await;
    mount_metrics(&server, "web-b", 200, None).await;

    let dir = tempdir().unwrap();
    let store = open_store(&dir.path().join("state.json")).await;
    let (mut engine, sink) = create_engine(vec![target(&server, "web-b", None)], store.clone()).await;

    let expected_status = [
        InstanceStatus::Online,
        InstanceStatus::Offline,
        InstanceStatus::Online,
    ];
    for status in expected_status {
        engine.sweep().await;
        assert_eq!(store.keys().await, vec!["web-b"]);
        assert_eq!(store.get("web-b").await.unwrap().status, status);
        assert!(sink.calls().is_empty());
    }

    engine.sweep().await;
    assert_eq!(store.keys().await, vec!["durable-7"]);
    let record = store.get("durable-7").await.unwrap();
    assert_eq!(record.status, InstanceStatus::Online);
    assert_eq!(record.alias, "web-b");
    assert_eq!(sink.calls().len(), 1);
}

#[tokio::test]
async fn test_unreachable_target_stays_offline_placeholder() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir.path().join("state.json")).await;
    let unreachable = fleetwatch::registry::Target::new(
        "gone",
        None,
        "http://127.0.0.1:9/metrics",
        "http://127.0.0.1:9/identity",
    );
    let (mut engine, sink) = create_engine(vec![unreachable], store.clone()).await;

    engine.sweep().await;
    engine.sweep().await;

    assert_eq!(store.keys().await, vec!["gone"]);
    let record = store.get("gone").await.unwrap();
    assert_eq!(record.status, InstanceStatus::Offline);
    assert_eq!(record.samples, Some(0));
    assert!(sink.calls().is_empty());
}

#[tokio::test]
async fn test_stale_records_are_pruned_on_resolution() {
    let server = MockServer::start().await;
    mount_metrics(&server, "web-b", 200, None).await;
    mount_identity(&server, "web-b", "durable-7").await;

    let dir = tempdir().unwrap();
    let state_file = dir.path().join("state.json");
    {
        let store = open_store(&state_file).await;
        store.mark_offline("decommissioned", "old-box").await.unwrap();
    }

    let store = open_store(&state_file).await;
    let (mut engine, _sink) = create_engine(vec![target(&server, "web-b", None)], store.clone()).await;
    assert_eq!(store.keys().await, vec!["decommissioned", "web-b"]);

    engine.sweep().await;

    assert_eq!(store.keys().await, vec!["durable-7"]);
}

#[tokio::test]
async fn test_spawned_poller_runs_first_sweep_immediately() {
    let server = MockServer::start().await;
    mount_metrics(&server, "web-b", 200, None).await;
    mount_identity(&server, "web-b", "durable-7").await;

    let dir = tempdir().unwrap();
    let store = open_store(&dir.path().join("state.json")).await;
    let (engine, sink) = create_engine(vec![target(&server, "web-b", None)], store.clone()).await;

    let handle = engine.spawn();
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    assert!(handle.stop().await);

    assert_eq!(store.keys().await, vec!["durable-7"]);
    assert_eq!(sink.calls().len(), 1);
}
