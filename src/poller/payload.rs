//! Metrics ingestion
//!
//! Turns the JSON body of a metrics endpoint into a [`StatusPayload`].
//! This is the only place that inspects raw metrics bodies; everything
//! downstream works with the normalized type.

use std::fmt;

use serde_json::{Map, Value};

use crate::store::record::now_timestamp;
use crate::store::{LatestSample, NetworkInterface, StatusPayload};

/// Why a metrics poll did not produce a payload
#[derive(Debug)]
pub enum MetricsError {
    /// Connection failure or timeout
    Request(reqwest::Error),

    /// Non-2xx response
    Status(reqwest::StatusCode),

    /// Body is not a JSON object
    InvalidBody(String),
}

impl fmt::Display for MetricsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricsError::Request(err) => write!(f, "metrics request failed: {}", err),
            MetricsError::Status(status) => write!(f, "metrics endpoint returned {}", status),
            MetricsError::InvalidBody(msg) => write!(f, "invalid metrics body: {}", msg),
        }
    }
}

impl std::error::Error for MetricsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MetricsError::Request(err) => Some(err),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for MetricsError {
    fn from(err: reqwest::Error) -> Self {
        MetricsError::Request(err)
    }
}

/// Result of polling one target's metrics endpoint
#[derive(Debug)]
pub enum PollOutcome {
    Online(StatusPayload),
    Offline(MetricsError),
}

impl PollOutcome {
    pub fn is_online(&self) -> bool {
        matches!(self, PollOutcome::Online(_))
    }
}

/// Values used when the instance does not report its own window/timeout
#[derive(Debug, Clone, Copy)]
pub struct PayloadDefaults {
    pub window_seconds: f64,
    pub timeout_seconds: f64,
}

fn number(obj: &Map<String, Value>, key: &str) -> Option<f64> {
    let value = match obj.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }?;
    value.is_finite().then_some(value)
}

fn byte_count(obj: &Map<String, Value>, key: &str) -> Option<u64> {
    let value = number(obj, key)?;
    (value >= 0.0).then_some(value as u64)
}

fn string(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn first_string(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| string(obj, key))
}

fn latest_sample(sample: &Map<String, Value>) -> LatestSample {
    LatestSample {
        timestamp: string(sample, "timestamp"),
        cpu_load: number(sample, "cpuLoad"),
        cpu_temperature_celsius: number(sample, "cpuTemperatureCelsius"),
        total_memory_bytes: byte_count(sample, "totalMemoryBytes"),
        free_memory_bytes: byte_count(sample, "freeMemoryBytes"),
        watched_processes: sample
            .get("watchedProcesses")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
    }
}

fn push_addresses(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if !s.is_empty() && !out.iter().any(|a| a == s) {
                out.push(s.to_string());
            }
        }
        Value::Array(items) => items.iter().for_each(|item| push_addresses(item, out)),
        Value::Object(obj) => {
            if let Some(address) = first_string(obj, &["address", "ip", "addr"]) {
                push_addresses(&Value::String(address), out);
            }
        }
        _ => {}
    }
}

fn interface(value: &Value, fallback_name: Option<&str>) -> Option<NetworkInterface> {
    match value {
        Value::Object(obj) => {
            let name = first_string(obj, &["name", "ifname", "interface"])
                .or_else(|| fallback_name.map(String::from))?;
            let mut addresses = Vec::new();
            for key in ["addresses", "ips", "ipv4", "ipv6", "address", "ip"] {
                if let Some(value) = obj.get(key) {
                    push_addresses(value, &mut addresses);
                }
            }
            Some(NetworkInterface {
                name,
                mac_address: first_string(obj, &["macAddress", "mac", "hwaddr"]),
                addresses,
                up: ["up", "isUp"]
                    .iter()
                    .find_map(|key| obj.get(*key).and_then(Value::as_bool)),
            })
        }
        Value::String(_) | Value::Array(_) => {
            let mut addresses = Vec::new();
            push_addresses(value, &mut addresses);
            Some(NetworkInterface {
                name: fallback_name?.to_string(),
                addresses,
                ..Default::default()
            })
        }
        _ => None,
    }
}

/// Normalize a reported interface list.
///
/// Accepts a list of interface objects or an object keyed by interface name.
pub fn normalize_interfaces(value: Option<&Value>) -> Vec<NetworkInterface> {
    match value {
        Some(Value::Array(items)) => items.iter().filter_map(|v| interface(v, None)).collect(),
        Some(Value::Object(map)) => map
            .iter()
            .filter_map(|(name, v)| interface(v, Some(name)))
            .collect(),
        _ => Vec::new(),
    }
}

/// Build a [`StatusPayload`] from a metrics body.
///
/// Pre-aggregated fields are passed through. When an instance only reports a
/// raw sample, the averages are taken from that sample with `samples = 1`.
pub fn normalize_metrics(
    body: &Value,
    defaults: PayloadDefaults,
) -> Result<StatusPayload, MetricsError> {
    let obj = body
        .as_object()
        .ok_or_else(|| MetricsError::InvalidBody("expected a JSON object".to_string()))?;

    let sample_obj = obj
        .get("latestSample")
        .and_then(Value::as_object)
        .unwrap_or(obj);
    let sample = latest_sample(sample_obj);

    let total = byte_count(obj, "averageTotalMemoryBytes").or(sample.total_memory_bytes);
    let free = byte_count(obj, "averageFreeMemoryBytes").or(sample.free_memory_bytes);
    let usage_ratio = number(obj, "averageMemoryUsageRatio").or_else(|| match (total, free) {
        (Some(total), Some(free)) if total > 0 => Some(1.0 - free as f64 / total as f64),
        _ => None,
    });

    Ok(StatusPayload {
        instance_id: string(obj, "instanceId"),
        alias: string(obj, "alias"),
        generated_at: string(obj, "generatedAt")
            .or_else(|| sample.timestamp.clone())
            .or_else(|| Some(now_timestamp())),
        samples: number(obj, "samples")
            .filter(|n| *n >= 0.0)
            .map_or(1, |n| n as u64),
        window_seconds: number(obj, "windowSeconds").unwrap_or(defaults.window_seconds),
        timeout_seconds: number(obj, "timeoutSeconds").unwrap_or(defaults.timeout_seconds),
        average_cpu_load: number(obj, "averageCpuLoad")
            .or(sample.cpu_load)
            .unwrap_or(-1.0),
        average_cpu_temperature_celsius: number(obj, "averageCpuTemperatureCelsius")
            .or(sample.cpu_temperature_celsius)
            .unwrap_or(-1.0),
        average_memory_usage_ratio: usage_ratio.unwrap_or(-1.0),
        average_free_memory_bytes: free.unwrap_or(0),
        average_total_memory_bytes: total.unwrap_or(0),
        network_interfaces: normalize_interfaces(
            obj.get("networkInterfaces").or_else(|| obj.get("interfaces")),
        ),
        latest_sample: sample,
    })
}
