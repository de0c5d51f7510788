use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{trace, warn};

use crate::registry::Target;

const DEFAULT_METRICS_PATH: &str = "/metrics";
const DEFAULT_IDENTITY_PATH: &str = "/identity";

/// Errors raised while loading the targets file. All of them are fatal at startup.
#[derive(Debug)]
pub enum ConfigError {
    /// The targets file could not be read
    Io { path: PathBuf, source: std::io::Error },

    /// The targets file is not valid JSON
    Parse(serde_json::Error),

    /// `instances` is missing, not a list, or contains no usable entry
    NoInstances,

    /// An instance entry lacks a required field
    MissingField { index: usize, field: &'static str },

    /// A derived endpoint is not an absolute http(s) URL
    InvalidUrl { alias: String, url: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "cannot read targets file {}: {}", path.display(), source)
            }
            ConfigError::Parse(err) => write!(f, "invalid targets file: {}", err),
            ConfigError::NoInstances => {
                write!(f, "targets file must contain a non-empty 'instances' list")
            }
            ConfigError::MissingField { index, field } => {
                write!(f, "instance #{} must define '{}'", index, field)
            }
            ConfigError::InvalidUrl { alias, url } => {
                write!(f, "instance '{}' has a non-absolute endpoint: {}", alias, url)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Parse(err) => Some(err),
            _ => None,
        }
    }
}

/// Raw contents of the targets file
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub poll_interval_seconds: Option<u64>,
    pub http_timeout_seconds: Option<f64>,

    /// Kept untyped so that non-object entries can be skipped instead of
    /// rejecting the whole file.
    pub instances: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceConfig {
    /// Strings and numbers are accepted for `alias` and `id`
    pub alias: Option<serde_json::Value>,
    pub id: Option<serde_json::Value>,
    #[serde(alias = "url")]
    pub base_url: Option<String>,
    pub metrics_path: Option<String>,
    pub identity_path: Option<String>,
}

/// Validated service configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub poll_interval: Duration,
    pub http_timeout: Duration,
    pub targets: Vec<Target>,
}

fn default_poll_interval() -> u64 {
    20
}

fn default_http_timeout() -> f64 {
    4.0
}

/// Trimmed text of a string or number value; blank and other values are absent
fn scalar_string(value: Option<&serde_json::Value>) -> Option<String> {
    let text = match value? {
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn normalize_path(path: Option<&str>, default: &str) -> String {
    let path = path.map(str::trim).filter(|p| !p.is_empty()).unwrap_or(default);
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

fn is_absolute_url(url: &str) -> bool {
    ["http://", "https://"]
        .iter()
        .any(|scheme| url.len() > scheme.len() && url.starts_with(scheme))
}

impl InstanceConfig {
    pub fn into_target(self, index: usize) -> Result<Target, ConfigError> {
        let alias = scalar_string(self.alias.as_ref()).ok_or(ConfigError::MissingField {
            index,
            field: "alias",
        })?;
        let durable_id = scalar_string(self.id.as_ref());

        let base_url = self
            .base_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or(ConfigError::MissingField {
                index,
                field: "baseUrl",
            })?
            .trim_end_matches('/');

        let metrics_url = format!(
            "{base_url}{}",
            normalize_path(self.metrics_path.as_deref(), DEFAULT_METRICS_PATH)
        );
        let identity_url = format!(
            "{base_url}{}",
            normalize_path(self.identity_path.as_deref(), DEFAULT_IDENTITY_PATH)
        );

        for url in [&metrics_url, &identity_url] {
            if !is_absolute_url(url) {
                return Err(ConfigError::InvalidUrl {
                    alias,
                    url: url.clone(),
                });
            }
        }

        Ok(Target::new(alias, durable_id, metrics_url, identity_url))
    }
}

impl Config {
    /// Validate the raw file into a [`ServiceConfig`]
    pub fn resolve(self) -> Result<ServiceConfig, ConfigError> {
        let instances = self.instances.ok_or(ConfigError::NoInstances)?;
        if instances.is_empty() {
            return Err(ConfigError::NoInstances);
        }

        let mut targets = Vec::with_capacity(instances.len());
        for (index, entry) in instances.into_iter().enumerate() {
            if !entry.is_object() {
                warn!("skipping instance #{index}: not an object");
                continue;
            }
            let instance: InstanceConfig =
                serde_json::from_value(entry).map_err(ConfigError::Parse)?;
            targets.push(instance.into_target(index)?);
        }

        if targets.is_empty() {
            return Err(ConfigError::NoInstances);
        }

        let poll_interval = self
            .poll_interval_seconds
            .filter(|secs| *secs > 0)
            .unwrap_or_else(default_poll_interval);
        let http_timeout = self
            .http_timeout_seconds
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .unwrap_or_else(default_http_timeout);

        Ok(ServiceConfig {
            poll_interval: Duration::from_secs(poll_interval),
            http_timeout: Duration::from_secs_f64(http_timeout),
            targets,
        })
    }
}

impl ServiceConfig {
    /// Apply `FLEETWATCH_POLL_INTERVAL_SECONDS` / `FLEETWATCH_HTTP_TIMEOUT_SECONDS`
    pub fn with_env_overrides(mut self) -> Self {
        self.poll_interval = crate::util::get_poll_interval(self.poll_interval);
        self.http_timeout = crate::util::get_http_timeout(self.http_timeout);
        self
    }
}

pub fn parse_config(content: &str) -> Result<ServiceConfig, ConfigError> {
    serde_json::from_str::<Config>(content)
        .map_err(ConfigError::Parse)?
        .resolve()
}

pub fn read_config_file(path: impl AsRef<Path>) -> Result<ServiceConfig, ConfigError> {
    let path = path.as_ref();
    let file_content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&file_content).inspect(|config| trace!("loaded config: {config:?}"))
}
