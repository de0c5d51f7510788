//! Notification sinks for resolved identities
//!
//! The poller calls [`NotificationSink::notify`] with the full
//! [`IdentityMap`] every time a target's identity is newly resolved. Sinks
//! decide what to do with it; the poller never suppresses duplicates itself.
//!
//! - [`LogSink`]: logs the identity set (used when no broker is configured)
//! - [`mqtt::MqttSink`]: publishes a retained whitelist message, skipping
//!   payloads identical to the last one published

#[cfg(feature = "mqtt")]
pub mod mqtt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

use crate::registry::IdentityMap;
use crate::store::record::now_timestamp;

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, identities: &IdentityMap) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhitelistItem {
    pub instance_id: String,
}

/// Message broadcast for the current identity set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhitelistPayload {
    pub ts: String,
    pub items: Vec<WhitelistItem>,
}

impl WhitelistPayload {
    /// Distinct resolved keys in map order
    pub fn from_identities(identities: &IdentityMap) -> Self {
        let mut items: Vec<WhitelistItem> = Vec::with_capacity(identities.len());
        for key in identities.values() {
            let key = key.trim();
            if key.is_empty() || items.iter().any(|item| item.instance_id == key) {
                continue;
            }
            items.push(WhitelistItem {
                instance_id: key.to_string(),
            });
        }
        Self {
            ts: now_timestamp(),
            items,
        }
    }
}

/// Remembers the last published item set
#[derive(Debug, Default)]
pub struct Deduplicator {
    last: Mutex<Option<Vec<WhitelistItem>>>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `publish` unless `payload` carries the same items as the last
    /// successful publish. Returns whether `publish` ran.
    pub async fn publish_if_changed<F, Fut>(
        &self,
        payload: &WhitelistPayload,
        publish: F,
    ) -> anyhow::Result<bool>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<()>>,
    {
        let mut last = self.last.lock().await;
        if payload.items.is_empty() || last.as_ref() == Some(&payload.items) {
            return Ok(false);
        }
        publish().await?;
        *last = Some(payload.items.clone());
        Ok(true)
    }
}

/// Sink that only logs the identity set
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn notify(&self, identities: &IdentityMap) -> anyhow::Result<()> {
        let payload = WhitelistPayload::from_identities(identities);
        let ids: Vec<&str> = payload
            .items
            .iter()
            .map(|item| item.instance_id.as_str())
            .collect();
        info!("resolved identities: {}", ids.join(", "));
        Ok(())
    }
}
