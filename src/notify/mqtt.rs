//! MQTT whitelist broadcaster
//!
//! Publishes the resolved identity set as a retained QoS 1 message. The
//! client and its event loop belong to the [`MqttSink`] instance; dropping
//! the sink stops the event loop task.
//!
//! Publishing never waits on the broker: messages are queued without
//! blocking, and a full queue (broker unreachable) is reported as an error
//! so the next resolution retries the publish.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, QoS, Transport};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{Deduplicator, NotificationSink, WhitelistPayload};
use crate::registry::IdentityMap;
use crate::util::truthy;

const DEFAULT_TOPIC: &str = "fleetwatch/whitelist/instances";
const DEFAULT_PORT: u16 = 8883;
const DEFAULT_KEEPALIVE_SECS: u64 = 60;

/// Capacity of the client's outgoing request queue
const REQUEST_QUEUE_CAPACITY: usize = 10;

/// Delay before polling the event loop again after a connection error
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_tls: bool,
    pub keep_alive: Duration,
    pub topic: String,
    pub client_id: String,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

impl MqttConfig {
    /// Read the `MQTT_BROKER_*` variables; `None` when no broker host is set
    pub fn from_env() -> Option<Self> {
        let host = env_var("MQTT_BROKER_HOST")?;
        let port = env_var("MQTT_BROKER_PORT")
            .and_then(|port| port.parse().ok())
            .unwrap_or(DEFAULT_PORT);
        let keep_alive = env_var("MQTT_BROKER_KEEPALIVE")
            .and_then(|secs| secs.parse().ok())
            .unwrap_or(DEFAULT_KEEPALIVE_SECS);

        if env_var("MQTT_TLS_INSECURE").is_some_and(|v| truthy(&v)) {
            warn!("MQTT_TLS_INSECURE is not supported, broker certificates are always verified");
        }

        Some(Self {
            host,
            port,
            username: env_var("MQTT_BROKER_USERNAME"),
            password: env_var("MQTT_BROKER_PASSWORD"),
            use_tls: env_var("MQTT_BROKER_USE_TLS").is_none_or(|v| truthy(&v)),
            keep_alive: Duration::from_secs(keep_alive),
            topic: env_var("MQTT_TOPIC").unwrap_or_else(|| DEFAULT_TOPIC.to_string()),
            client_id: env_var("MQTT_CLIENT_ID")
                .unwrap_or_else(|| format!("fleetwatch-{}", std::process::id())),
        })
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);
        if let Some(username) = &self.username {
            options.set_credentials(username, self.password.as_deref().unwrap_or_default());
        }
        if self.use_tls {
            options.set_transport(Transport::tls_with_default_config());
        }
        options
    }
}

pub struct MqttSink {
    client: AsyncClient,
    topic: String,
    dedup: Deduplicator,
    event_loop: JoinHandle<()>,
}

impl MqttSink {
    /// Create the client and spawn its event loop on the current runtime
    pub fn connect(config: &MqttConfig) -> Self {
        info!(
            "connecting to MQTT broker {}:{} (topic {})",
            config.host, config.port, config.topic
        );
        let (client, mut eventloop) = AsyncClient::new(config.options(), REQUEST_QUEUE_CAPACITY);

        let event_loop = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(incoming)) => debug!("mqtt incoming: {incoming:?}"),
                    Ok(Event::Outgoing(_)) => {}
                    Err(e) => {
                        warn!("mqtt connection error: {e}");
                        tokio::time::sleep(RECONNECT_DELAY).await;
                    }
                }
            }
        });

        Self {
            client,
            topic: config.topic.clone(),
            dedup: Deduplicator::new(),
            event_loop,
        }
    }
}

impl Drop for MqttSink {
    fn drop(&mut self) {
        self.event_loop.abort();
    }
}

#[async_trait]
impl NotificationSink for MqttSink {
    async fn notify(&self, identities: &IdentityMap) -> anyhow::Result<()> {
        let payload = WhitelistPayload::from_identities(identities);
        let body = serde_json::to_vec(&payload).context("failed to encode whitelist")?;

        let published = self
            .dedup
            .publish_if_changed(&payload, move || async move {
                self.client
                    .try_publish(&self.topic, QoS::AtLeastOnce, true, body)
                    .context("failed to queue whitelist publish")
            })
            .await?;

        if published {
            info!("published {} identities to {}", payload.items.len(), self.topic);
        } else {
            debug!("whitelist unchanged, skipping publish");
        }
        Ok(())
    }
}
