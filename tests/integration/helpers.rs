//! Helper functions for integration tests

use async_trait::async_trait;
use fleetwatch::{
    config::ServiceConfig,
    notify::NotificationSink,
    poller::PollEngine,
    registry::{IdentityMap, Target},
    store::StateStore,
};
use serde_json::{Value, json};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Sink remembering every identity map it was handed
#[derive(Default)]
pub struct RecordingSink {
    calls: Mutex<Vec<IdentityMap>>,
}

impl RecordingSink {
    pub fn calls(&self) -> Vec<IdentityMap> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn notify(&self, identities: &IdentityMap) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(identities.clone());
        Ok(())
    }
}

/// Target whose endpoints live under `/<alias>/` on `server`
pub fn target(server: &MockServer, alias: &str, id: Option<&str>) -> Target {
    Target::new(
        alias,
        id.map(String::from),
        metrics_url(server, alias),
        identity_url(server, alias),
    )
}

pub fn metrics_url(server: &MockServer, alias: &str) -> String {
    format!("{}/{alias}/metrics", server.uri())
}

pub fn identity_url(server: &MockServer, alias: &str) -> String {
    format!("{}/{alias}/identity", server.uri())
}

pub fn service_config(targets: Vec<Target>) -> ServiceConfig {
    ServiceConfig {
        poll_interval: Duration::from_secs(5),
        http_timeout: Duration::from_secs(1),
        targets,
    }
}

pub async fn open_store(path: &Path) -> Arc<StateStore> {
    Arc::new(StateStore::open(path).await.unwrap())
}

pub async fn create_engine(
    targets: Vec<Target>,
    store: Arc<StateStore>,
) -> (PollEngine, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let engine = PollEngine::new(service_config(targets), store, sink.clone())
        .await
        .unwrap();
    (engine, sink)
}

pub fn sample_metrics() -> Value {
    json!({
        "cpuLoad": 0.25,
        "cpuTemperatureCelsius": 48.0,
        "totalMemoryBytes": 8000,
        "freeMemoryBytes": 2000,
        "timestamp": "2024-05-01T10:00:00Z"
    })
}

pub async fn mount_metrics(server: &MockServer, alias: &str, status: u16, times: Option<u64>) {
    let mut template = ResponseTemplate::new(status);
    if status == 200 {
        template = template.set_body_json(sample_metrics());
    }
    let mock = Mock::given(method("GET"))
        .and(path(format!("/{alias}/metrics")))
        .respond_with(template);
    match times {
        Some(n) => mock.up_to_n_times(n).mount(server).await,
        None => mock.mount(server).await,
    }
}

pub async fn mount_identity(server: &MockServer, alias: &str, id: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/{alias}/identity")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": id })))
        .mount(server)
        .await;
}
