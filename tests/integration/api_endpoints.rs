//! Integration tests for the read API
//!
//! These tests verify that:
//! - Every route answers with the store's current contents
//! - Query parameters filter as documented
//! - Unknown instances yield a JSON error with status 404

use fleetwatch::api::{ApiConfig, ApiState, spawn_api_server};
use fleetwatch::store::{StateStore, StatusPayload};
use pretty_assertions::assert_eq;
use reqwest::StatusCode;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tempfile::{TempDir, tempdir};

async fn spawn_test_api() -> (SocketAddr, Arc<StateStore>, TempDir) {
    let dir = tempdir().unwrap();
    let store = Arc::new(StateStore::open(dir.path().join("state.json")).await.unwrap());

    store.ensure_placeholder("web-b", "web-b").await.unwrap();
    store.ensure_placeholder("known-1", "known").await.unwrap();
    let payload = StatusPayload {
        instance_id: Some("known-1".to_string()),
        ..StatusPayload::default()
    };
    store.upsert_online(payload, "known-1", "known").await.unwrap();

    let config = ApiConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        enable_cors: false,
    };
    let addr = spawn_api_server(config, ApiState::new(store.clone(), 2))
        .await
        .unwrap();
    (addr, store, dir)
}

async fn get_json(addr: SocketAddr, route: &str) -> (StatusCode, Value) {
    let response = reqwest::get(format!("http://{addr}{route}")).await.unwrap();
    let status = response.status();
    (status, response.json().await.unwrap())
}

#[tokio::test]
async fn test_health() {
    let (addr, _store, _dir) = spawn_test_api().await;

    let (status, body) = get_json(addr, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!({"status": "up", "targets": 2}));
}

#[tokio::test]
async fn test_instance_index() {
    let (addr, _store, _dir) = spawn_test_api().await;

    let (status, body) = get_json(addr, "/api/v1/instances").await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["ts"].is_string());
    let items = body["items"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["instanceId"], "known-1");
    assert_eq!(items[0]["status"], "online");
    assert_eq!(items[1]["instanceId"], "web-b");
    assert_eq!(items[1]["status"], "offline");
}

#[tokio::test]
async fn test_instance_index_since_filter() {
    let (addr, _store, _dir) = spawn_test_api().await;

    let (_, future) = get_json(addr, "/api/v1/instances?since=2999-01-01T00:00:00Z").await;
    assert_eq!(future["items"].as_array().unwrap().len(), 0);

    let (_, garbage) = get_json(addr, "/api/v1/instances?since=yesterday").await;
    assert_eq!(garbage["items"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_single_instance() {
    let (addr, _store, _dir) = spawn_test_api().await;

    let (status, body) = get_json(addr, "/api/v1/instances/web-b").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["instanceId"], "web-b");
    assert_eq!(body["samples"], 0);

    let (status, body) = get_json(addr, "/api/v1/instances/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("nope"));
}

#[tokio::test]
async fn test_state_filtered_by_ids() {
    let (addr, store, _dir) = spawn_test_api().await;

    let (_, all) = get_json(addr, "/api/v1/state").await;
    assert_eq!(all["items"].as_array().unwrap().len(), 2);

    let (_, some) = get_json(addr, "/api/v1/state?ids=%20web-b%20,,missing").await;
    let items = some["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["alias"], "web-b");

    store.mark_offline("known-1", "known").await.unwrap();
    let (_, after) = get_json(addr, "/api/v1/state?ids=known-1").await;
    assert_eq!(after["items"][0]["status"], "offline");
}
