//! PollEngine - sweeps all targets on a fixed interval
//!
//! ## Message Flow
//!
//! ```text
//! Sweep → for each target (registry order):
//!           ensure identity ─┬─ resolved now → promote, notify sink, prune store
//!                            └─ failed      → keep alias key, retry next sweep
//!           fetch metrics ───┬─ Online  → store.upsert_online
//!                            └─ Offline → store.mark_offline
//!       → wait interval (or stop)
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, trace, warn};

use super::payload::{MetricsError, PayloadDefaults, PollOutcome, normalize_metrics};
use crate::config::ServiceConfig;
use crate::identity::IdentityResolver;
use crate::notify::NotificationSink;
use crate::registry::{Target, TargetRegistry};
use crate::store::{StateStore, StoreResult};

/// Lower bound for the pause between sweeps
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Lower bound for every outbound request timeout
pub const MIN_REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

/// How long [`PollerHandle::stop`] waits for the loop to exit
pub const STOP_GRACE: Duration = Duration::from_secs(2);

/// Polls every configured target, one sweep at a time
///
/// The engine owns the registry and is the only writer of the state store.
pub struct PollEngine {
    registry: TargetRegistry,
    store: Arc<StateStore>,
    resolver: IdentityResolver,
    sink: Arc<dyn NotificationSink>,
    client: reqwest::Client,
    interval: Duration,
    timeout: Duration,
}

fn stop_requested(stop: &watch::Receiver<bool>) -> bool {
    *stop.borrow() || stop.has_changed().is_err()
}

impl PollEngine {
    /// Build the registry from `config` and create a placeholder record for
    /// every target that has none yet.
    pub async fn new(
        config: ServiceConfig,
        store: Arc<StateStore>,
        sink: Arc<dyn NotificationSink>,
    ) -> StoreResult<Self> {
        let registry = TargetRegistry::build(config.targets, &store).await?;
        let client = reqwest::Client::new();

        Ok(Self {
            registry,
            store,
            resolver: IdentityResolver::new(client.clone()),
            sink,
            client,
            interval: config.poll_interval.max(MIN_POLL_INTERVAL),
            timeout: config.http_timeout.max(MIN_REQUEST_TIMEOUT),
        })
    }

    /// Replace the identity resolver
    pub fn with_resolver(mut self, resolver: IdentityResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn registry(&self) -> &TargetRegistry {
        &self.registry
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn request_timeout(&self) -> Duration {
        self.timeout
    }

    fn payload_defaults(&self) -> PayloadDefaults {
        PayloadDefaults {
            window_seconds: self.interval.as_secs_f64(),
            timeout_seconds: self.timeout.as_secs_f64(),
        }
    }

    /// The key to write under for entry `index`, resolving it if needed.
    ///
    /// Returns `None` when the identity is still unknown after this attempt.
    async fn ensure_identity(&mut self, index: usize) -> Option<String> {
        let entry = self.registry.get(index)?;
        if entry.is_resolved() {
            return Some(entry.current_key().to_string());
        }
        let target = entry.target().clone();

        let id = match self.resolver.resolve(&target, self.timeout).await {
            Ok(id) => id,
            Err(e) => {
                warn!(
                    "could not resolve instance id for {} at {}: {e}",
                    target.alias(),
                    target.identity_url()
                );
                return None;
            }
        };

        if self.registry.promote(index, id.clone()) {
            info!("{} resolved to {id}", target.alias());

            let identities = self.registry.identity_map();
            match tokio::time::timeout(self.timeout, self.sink.notify(&identities)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("identity notification failed: {e:#}"),
                Err(_) => warn!("identity notification timed out after {:?}", self.timeout),
            }

            match self.store.prune(self.registry.current_keys()).await {
                Ok(0) => {}
                Ok(removed) => debug!("pruned {removed} records after resolving {id}"),
                Err(e) => error!("failed to prune state: {e}"),
            }
        }

        Some(id)
    }

    async fn request_metrics(&self, target: &Target) -> Result<Value, MetricsError> {
        let response = self
            .client
            .get(target.metrics_url())
            .timeout(self.timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(MetricsError::Status(response.status()));
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| MetricsError::InvalidBody(e.to_string()))
    }

    /// Fetch and normalize the metrics of `target`
    pub async fn fetch_metrics(&self, target: &Target) -> PollOutcome {
        let result = self
            .request_metrics(target)
            .await
            .and_then(|body| normalize_metrics(&body, self.payload_defaults()));

        match result {
            Ok(payload) => PollOutcome::Online(payload),
            Err(e) => PollOutcome::Offline(e),
        }
    }

    /// Poll a single registry entry and record the outcome
    #[instrument(skip(self))]
    pub async fn poll_target(&mut self, index: usize) {
        let Some(entry) = self.registry.get(index) else {
            return;
        };
        let key_hint = entry.current_key().to_string();
        let target = entry.target().clone();
        let alias = target.alias();

        let effective_id = self
            .ensure_identity(index)
            .await
            .unwrap_or_else(|| key_hint.clone());

        let result = match self.fetch_metrics(&target).await {
            PollOutcome::Online(mut payload) => {
                trace!("{alias}: received metrics");
                payload.instance_id = Some(effective_id.clone());
                self.store.upsert_online(payload, &key_hint, alias).await
            }
            PollOutcome::Offline(reason) => {
                info!("{alias} is offline: {reason}");
                self.store.mark_offline(&effective_id, alias).await
            }
        };

        if let Err(e) = result {
            error!("failed to record status of {effective_id}: {e}");
        }
    }

    /// Poll every target once, in registry order
    pub async fn sweep(&mut self) {
        for index in 0..self.registry.len() {
            self.poll_target(index).await;
        }
    }

    /// Like [`sweep`](Self::sweep), but abandons the remaining targets once a
    /// stop is requested. Returns whether the sweep completed.
    async fn sweep_until_stopped(&mut self, stop: &watch::Receiver<bool>) -> bool {
        for index in 0..self.registry.len() {
            if stop_requested(stop) {
                debug!("stop requested, aborting sweep");
                return false;
            }
            self.poll_target(index).await;
        }
        true
    }

    async fn run(mut self, mut stop: watch::Receiver<bool>) {
        debug!(
            "starting poll loop for {} targets every {:?}",
            self.registry.len(),
            self.interval
        );

        loop {
            if !self.sweep_until_stopped(&stop).await {
                break;
            }

            let stopped = tokio::select! {
                _ = tokio::time::sleep(self.interval) => false,
                _ = stop.wait_for(|stopped| *stopped) => true,
            };
            if stopped || stop_requested(&stop) {
                break;
            }
        }

        debug!("poll loop stopped");
    }

    /// Start the poll loop on a background task
    pub fn spawn(self) -> PollerHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(stop_rx));
        PollerHandle { stop_tx, task }
    }
}

/// Handle to a running poll loop
///
/// Dropping the handle also stops the loop once it next checks for a stop.
pub struct PollerHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Ask the loop to stop and wait up to [`STOP_GRACE`] for it to exit.
    ///
    /// In-flight requests are allowed to finish; the task is never aborted.
    /// Returns whether the loop exited within the grace period.
    pub async fn stop(self) -> bool {
        let _ = self.stop_tx.send(true);

        match tokio::time::timeout(STOP_GRACE, self.task).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!("poll loop terminated abnormally: {e}");
                true
            }
            Err(_) => {
                warn!("poll loop did not stop within {STOP_GRACE:?}");
                false
            }
        }
    }
}
