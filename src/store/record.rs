//! Status records and the projections served from them

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Liveness of an instance as of its most recent poll
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Online,
    #[default]
    Offline,
}

impl InstanceStatus {
    /// Get the string representation (lowercase)
    ///
    /// This matches the serde serialization format.
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Online => "online",
            InstanceStatus::Offline => "offline",
        }
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw last observation reported by an instance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestSample {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_load: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_temperature_celsius: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_memory_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub free_memory_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub watched_processes: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub up: Option<bool>,
}

/// Normalized result of one successful metrics poll
///
/// Built once at the ingestion boundary; numeric fields already carry their
/// defaults so the store never has to guess.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusPayload {
    /// Canonical key the record should live under, when known
    pub instance_id: Option<String>,
    pub alias: Option<String>,
    pub generated_at: Option<String>,
    pub samples: u64,
    pub window_seconds: f64,
    pub timeout_seconds: f64,
    pub average_cpu_load: f64,
    pub average_cpu_temperature_celsius: f64,
    pub average_memory_usage_ratio: f64,
    pub average_free_memory_bytes: u64,
    pub average_total_memory_bytes: u64,
    pub latest_sample: LatestSample,
    pub network_interfaces: Vec<NetworkInterface>,
}

impl Default for StatusPayload {
    fn default() -> Self {
        Self {
            instance_id: None,
            alias: None,
            generated_at: None,
            samples: 0,
            window_seconds: 0.0,
            timeout_seconds: 0.0,
            average_cpu_load: -1.0,
            average_cpu_temperature_celsius: -1.0,
            average_memory_usage_ratio: -1.0,
            average_free_memory_bytes: 0,
            average_total_memory_bytes: 0,
            latest_sample: LatestSample::default(),
            network_interfaces: Vec::new(),
        }
    }
}

/// The unit of durable state, keyed by `instance_id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRecord {
    pub instance_id: String,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub status: InstanceStatus,
    #[serde(default)]
    pub received_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub samples: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_cpu_load: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_cpu_temperature_celsius: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_memory_usage_ratio: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_free_memory_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_total_memory_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_sample: Option<LatestSample>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_interfaces: Option<Vec<NetworkInterface>>,
}

impl StatusRecord {
    /// A record with nothing but its key, alias and timestamp
    pub fn bare(instance_id: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            alias: alias.into(),
            status: InstanceStatus::Offline,
            received_at: now_timestamp(),
            generated_at: None,
            samples: None,
            window_seconds: None,
            timeout_seconds: None,
            average_cpu_load: None,
            average_cpu_temperature_celsius: None,
            average_memory_usage_ratio: None,
            average_free_memory_bytes: None,
            average_total_memory_bytes: None,
            latest_sample: None,
            network_interfaces: None,
        }
    }

    /// Offline record with zeroed counters, as created for configured
    /// targets before their first poll
    pub fn placeholder(instance_id: impl Into<String>, alias: impl Into<String>) -> Self {
        let mut record = Self::bare(instance_id, alias);
        record.fill_offline_defaults();
        record
    }

    pub fn online(
        instance_id: impl Into<String>,
        alias: impl Into<String>,
        payload: StatusPayload,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            alias: alias.into(),
            status: InstanceStatus::Online,
            received_at: now_timestamp(),
            generated_at: payload.generated_at,
            samples: Some(payload.samples),
            window_seconds: Some(payload.window_seconds),
            timeout_seconds: Some(payload.timeout_seconds),
            average_cpu_load: Some(payload.average_cpu_load),
            average_cpu_temperature_celsius: Some(payload.average_cpu_temperature_celsius),
            average_memory_usage_ratio: Some(payload.average_memory_usage_ratio),
            average_free_memory_bytes: Some(payload.average_free_memory_bytes),
            average_total_memory_bytes: Some(payload.average_total_memory_bytes),
            latest_sample: Some(payload.latest_sample),
            network_interfaces: Some(payload.network_interfaces),
        }
    }

    /// Zero the counters that were never populated; populated fields stay
    pub fn fill_offline_defaults(&mut self) {
        self.samples.get_or_insert(0);
        self.window_seconds.get_or_insert(0.0);
        self.timeout_seconds.get_or_insert(0.0);
        self.latest_sample.get_or_insert_with(LatestSample::default);
        self.network_interfaces.get_or_insert_with(Vec::new);
    }

    pub fn received_at_parsed(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.received_at)
    }

    pub fn index_entry(&self) -> IndexEntry {
        IndexEntry {
            instance_id: self.instance_id.clone(),
            status: self.status,
            received_at: self.received_at.clone(),
        }
    }
}

/// Full records, sorted by key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub ts: String,
    pub items: Vec<StatusRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    pub instance_id: String,
    pub status: InstanceStatus,
    pub received_at: String,
}

/// Reduced projection for cheap change detection by clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub ts: String,
    pub items: Vec<IndexEntry>,
}

/// Current UTC time as RFC 3339 with millisecond precision and a `Z` suffix
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parses RFC 3339, or a naive ISO datetime taken as UTC
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
