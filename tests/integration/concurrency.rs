//! Concurrency tests
//!
//! These tests verify that readers running alongside the poller:
//! - Never see an instance under both its alias and its durable id
//! - Always see a store that matches what is on disk
//! - Never observe a torn or half-written state file

use crate::helpers::*;
use fleetwatch::store::{StateSnapshot, StateStore, StatusPayload, StatusRecord};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tempfile::tempdir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SWEEPS: usize = 8;
const READERS: usize = 4;

/// (alias, durable id) of every target that starts out alias-only
const LATE_IDENTITIES: [(&str, &str); 2] = [("web-b", "durable-7"), ("web-c", "durable-9")];

fn assert_no_double_keys(keys: &BTreeSet<String>) {
    for (alias, id) in LATE_IDENTITIES {
        assert!(
            !(keys.contains(alias) && keys.contains(id)),
            "{alias} and {id} present at the same time: {keys:?}"
        );
    }
}

fn keys_of(items: &[StatusRecord]) -> BTreeSet<String> {
    let keys: BTreeSet<String> = items.iter().map(|r| r.instance_id.clone()).collect();
    assert_eq!(keys.len(), items.len(), "duplicate records");
    keys
}

fn read_state_file(path: &Path) -> Option<StateSnapshot> {
    let content = std::fs::read_to_string(path).ok()?;
    Some(serde_json::from_str(&content).expect("state file must always be complete JSON"))
}

async fn mount_flaky_metrics(server: &MockServer, alias: &str) {
    let calls = Arc::new(AtomicUsize::new(0));
    Mock::given(method("GET"))
        .and(path(format!("/{alias}/metrics")))
        .respond_with(move |_req: &wiremock::Request| {
            if calls.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
                ResponseTemplate::new(200).set_body_json(sample_metrics())
            } else {
                ResponseTemplate::new(503)
            }
        })
        .mount(server)
        .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_during_sweeps_see_consistent_state() {
    let server = MockServer::start().await;

    mount_metrics(&server, "known", 200, None).await;
    for (alias, id) in LATE_IDENTITIES {
        mount_flaky_metrics(&server, alias).await;
        Mock::given(method("GET"))
            .and(path(format!("/{alias}/identity")))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(3)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/{alias}/identity")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": id })))
            .mount(&server)
            .await;
    }

    let dir = tempdir().unwrap();
    let state_file = dir.path().join("state.json");
    let store = open_store(&state_file).await;
    let (mut engine, _sink) = create_engine(
        vec![
            target(&server, "known", Some("known-1")),
            target(&server, "web-b", None),
            target(&server, "web-c", None),
        ],
        store.clone(),
    )
    .await;

    let done = Arc::new(AtomicBool::new(false));
    let mut readers = vec![];
    for _ in 0..READERS {
        let store = store.clone();
        let done = done.clone();
        let state_file = state_file.clone();
        readers.push(tokio::spawn(async move {
            let mut rounds = 0usize;
            while !done.load(Ordering::SeqCst) {
                let state = store.build_state(None).await;
                assert_no_double_keys(&keys_of(&state.items));

                let index = store.build_index(None).await;
                assert!(index.items.len() >= 3);

                assert!(store.get("known-1").await.is_some());

                if let Some(on_disk) = read_state_file(&state_file) {
                    assert_no_double_keys(&keys_of(&on_disk.items));
                }

                rounds += 1;
                tokio::task::yield_now().await;
            }
            rounds
        }));
    }

    let writer_file = state_file.clone();
    let writer = tokio::spawn(async move {
        for _ in 0..SWEEPS {
            engine.sweep().await;

            // the poller is the only writer, so nothing can change between these two reads
            let in_memory = store.build_state(None).await.items;
            let reloaded = StateStore::open(&writer_file).await.unwrap();
            assert_eq!(in_memory, reloaded.build_state(None).await.items);
        }
    });

    writer.await.unwrap();
    done.store(true, Ordering::SeqCst);
    for reader in readers {
        assert!(reader.await.unwrap() > 0);
    }

    let reloaded = StateStore::open(&state_file).await.unwrap();
    assert_eq!(reloaded.keys().await, vec!["durable-7", "durable-9", "known-1"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_leave_file_in_sync() {
    let dir = tempdir().unwrap();
    let state_file = dir.path().join("state.json");
    let store = open_store(&state_file).await;

    let mut tasks = vec![];
    for i in 0..8 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            let alias = format!("node-{i}");
            let id = format!("id-{i}");
            store.ensure_placeholder(&alias, &alias).await.unwrap();
            for round in 0..5 {
                if round % 2 == 0 {
                    store.mark_offline(&alias, &alias).await.unwrap();
                } else {
                    store
                        .upsert_online(StatusPayload::default(), &alias, &alias)
                        .await
                        .unwrap();
                }
            }
            let payload = StatusPayload {
                instance_id: Some(id),
                ..StatusPayload::default()
            };
            store.upsert_online(payload, &alias, &alias).await.unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let expected: Vec<String> = (0..8).map(|i| format!("id-{i}")).collect();
    assert_eq!(store.keys().await, expected);

    let reloaded = StateStore::open(&state_file).await.unwrap();
    assert_eq!(
        reloaded.build_state(None).await.items,
        store.build_state(None).await.items
    );
}
