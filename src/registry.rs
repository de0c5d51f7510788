//! Target registry
//!
//! Each configured target gets one [`RegistryEntry`] carrying its
//! [`ResolutionState`]. The only way to change that state is
//! [`TargetRegistry::promote`], which moves an entry from `Unresolved` to
//! `Resolved` once and never back.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::store::{StateStore, StoreResult};

/// Identity URL → resolved tracking key, for every resolved target
pub type IdentityMap = BTreeMap<String, String>;

/// A monitored instance as configured
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    alias: String,
    durable_id: Option<String>,
    metrics_url: String,
    identity_url: String,
}

impl Target {
    pub fn new(
        alias: impl Into<String>,
        durable_id: Option<String>,
        metrics_url: impl Into<String>,
        identity_url: impl Into<String>,
    ) -> Self {
        Self {
            alias: alias.into(),
            durable_id,
            metrics_url: metrics_url.into(),
            identity_url: identity_url.into(),
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn durable_id(&self) -> Option<&str> {
        self.durable_id.as_deref()
    }

    pub fn metrics_url(&self) -> &str {
        &self.metrics_url
    }

    pub fn identity_url(&self) -> &str {
        &self.identity_url
    }

    /// The configured durable id, or the alias when none is known upfront
    pub fn tracking_key(&self) -> &str {
        self.durable_id.as_deref().unwrap_or(&self.alias)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionState {
    Unresolved,
    Resolved(String),
}

#[derive(Debug, Clone)]
pub struct RegistryEntry {
    target: Target,
    state: ResolutionState,
}

impl RegistryEntry {
    fn new(target: Target) -> Self {
        let state = match target.durable_id() {
            Some(id) => ResolutionState::Resolved(id.to_string()),
            None => ResolutionState::Unresolved,
        };
        Self { target, state }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn state(&self) -> &ResolutionState {
        &self.state
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self.state, ResolutionState::Resolved(_))
    }

    /// Key records for this target are currently written under
    pub fn current_key(&self) -> &str {
        match &self.state {
            ResolutionState::Resolved(key) => key,
            ResolutionState::Unresolved => self.target.alias(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TargetRegistry {
    entries: Vec<RegistryEntry>,
}

impl TargetRegistry {
    /// Build the registry without touching any store
    pub fn new(targets: impl IntoIterator<Item = Target>) -> Self {
        Self {
            entries: targets.into_iter().map(RegistryEntry::new).collect(),
        }
    }

    /// Build the registry and make sure every target has a record in `store`
    pub async fn build(
        targets: impl IntoIterator<Item = Target>,
        store: &StateStore,
    ) -> StoreResult<Self> {
        let registry = Self::new(targets);
        for entry in &registry.entries {
            let target = entry.target();
            if store
                .ensure_placeholder(target.tracking_key(), target.alias())
                .await?
            {
                debug!("created placeholder for {}", target.tracking_key());
            }
        }
        info!("registry built with {} targets", registry.len());
        Ok(registry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[RegistryEntry] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&RegistryEntry> {
        self.entries.get(index)
    }

    /// Resolve entry `index` to `id`.
    ///
    /// Returns `true` only when this call performed the transition. Already
    /// resolved entries and out-of-range indices are left untouched.
    pub fn promote(&mut self, index: usize, id: impl Into<String>) -> bool {
        let Some(entry) = self.entries.get_mut(index) else {
            return false;
        };
        if entry.is_resolved() {
            return false;
        }
        entry.state = ResolutionState::Resolved(id.into());
        true
    }

    /// Every key currently backed by a live entry, in registry order
    pub fn current_keys(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|entry| entry.current_key().to_string())
            .collect()
    }

    pub fn identity_map(&self) -> IdentityMap {
        self.entries
            .iter()
            .filter_map(|entry| match &entry.state {
                ResolutionState::Resolved(key) => {
                    Some((entry.target.identity_url().to_string(), key.clone()))
                }
                ResolutionState::Unresolved => None,
            })
            .collect()
    }
}
