//! Identity resolver
//!
//! Fetches a target's durable instance identifier from its identity endpoint.
//! Resolution is best-effort: callers log failures and try again on the next
//! sweep. Successful lookups are cached per identity URL for the lifetime of
//! the resolver.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, instrument, trace};

use crate::registry::Target;

/// Field names checked for the identifier, in order
const IDENTIFIER_FIELDS: [&str; 2] = ["instanceId", "id"];

/// Why an identity lookup failed. Always recoverable.
#[derive(Debug)]
pub enum IdentityError {
    /// Connection failure or timeout
    Request(reqwest::Error),

    /// Non-2xx response
    Status(reqwest::StatusCode),

    /// Body is not a JSON document
    InvalidBody(String),

    /// Body carries no usable identifier
    MissingIdentifier,
}

impl fmt::Display for IdentityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityError::Request(err) => write!(f, "identity request failed: {}", err),
            IdentityError::Status(status) => write!(f, "identity endpoint returned {}", status),
            IdentityError::InvalidBody(msg) => write!(f, "invalid identity body: {}", msg),
            IdentityError::MissingIdentifier => {
                write!(f, "identity body has no 'instanceId' or 'id'")
            }
        }
    }
}

impl std::error::Error for IdentityError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IdentityError::Request(err) => Some(err),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for IdentityError {
    fn from(err: reqwest::Error) -> Self {
        IdentityError::Request(err)
    }
}

/// Pull the identifier out of an identity response body.
///
/// The first field in [`IDENTIFIER_FIELDS`] holding a non-blank string (or a
/// number) wins. The result is trimmed.
pub fn extract_identifier(body: &Value) -> Option<String> {
    IDENTIFIER_FIELDS.iter().find_map(|field| {
        let id = match body.get(field)? {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        (!id.is_empty()).then_some(id)
    })
}

#[derive(Debug)]
pub struct IdentityResolver {
    client: reqwest::Client,
    cache: RwLock<HashMap<String, String>>,
}

impl Default for IdentityResolver {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

impl IdentityResolver {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub async fn cached(&self, identity_url: &str) -> Option<String> {
        self.cache.read().await.get(identity_url).cloned()
    }

    /// Resolve the durable identifier of `target`, bounded by `timeout`
    #[instrument(skip(self, target), fields(url = %target.identity_url()))]
    pub async fn resolve(&self, target: &Target, timeout: Duration) -> Result<String, IdentityError> {
        if let Some(id) = self.cached(target.identity_url()).await {
            trace!("identity cache hit");
            return Ok(id);
        }

        let response = self
            .client
            .get(target.identity_url())
            .timeout(timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(IdentityError::Status(response.status()));
        }

        let body = response.text().await?;
        let body: Value =
            serde_json::from_str(&body).map_err(|e| IdentityError::InvalidBody(e.to_string()))?;

        let id = extract_identifier(&body).ok_or(IdentityError::MissingIdentifier)?;
        debug!("resolved identity {id}");

        self.cache
            .write()
            .await
            .insert(target.identity_url().to_string(), id.clone());
        Ok(id)
    }
}
