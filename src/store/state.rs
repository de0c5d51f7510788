//! Lock-serialized status store with write-through JSON persistence

use std::collections::{BTreeMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, trace, warn};

use super::error::{StoreError, StoreResult};
use super::record::{
    IndexSnapshot, InstanceStatus, StateSnapshot, StatusPayload, StatusRecord, now_timestamp,
    parse_timestamp,
};

#[derive(Serialize)]
struct SnapshotRef<'a> {
    ts: String,
    items: Vec<&'a StatusRecord>,
}

#[derive(Deserialize)]
struct RawSnapshot {
    #[serde(default)]
    items: Vec<serde_json::Value>,
}

/// Concurrent key → [`StatusRecord`] map mirrored to a single JSON file
///
/// Every mutation holds the lock across the in-memory change and the file
/// write, so readers never observe a state that is not also on disk.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    items: Mutex<BTreeMap<String, StatusRecord>>,
}

fn non_blank(value: &str) -> Option<&str> {
    let value = value.trim();
    (!value.is_empty()).then_some(value)
}

impl StateStore {
    /// Open the store at `path`, loading whatever state is there.
    ///
    /// A missing or malformed file yields an empty store. Only a file that
    /// exists but cannot be read is an error.
    pub async fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StoreError::LoadFailed {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let items = Self::load(&path).await?;
        info!("loaded {} records from {}", items.len(), path.display());

        Ok(Self {
            path,
            items: Mutex::new(items),
        })
    }

    async fn load(path: &Path) -> StoreResult<BTreeMap<String, StatusRecord>> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("no state file at {}, starting empty", path.display());
                return Ok(BTreeMap::new());
            }
            Err(e) if e.kind() == ErrorKind::InvalidData => {
                warn!("state file {} is not UTF-8, starting empty", path.display());
                return Ok(BTreeMap::new());
            }
            Err(source) => {
                return Err(StoreError::LoadFailed {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let raw: RawSnapshot = match serde_json::from_str(&content) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("state file {} is corrupted ({e}), starting empty", path.display());
                return Ok(BTreeMap::new());
            }
        };

        let mut items = BTreeMap::new();
        for item in raw.items {
            let mut record = match serde_json::from_value::<StatusRecord>(item) {
                Ok(record) => record,
                Err(e) => {
                    warn!("skipping unreadable record: {e}");
                    continue;
                }
            };
            let Some(key) = non_blank(&record.instance_id).map(String::from) else {
                warn!("skipping record without instanceId");
                continue;
            };
            record.instance_id = key.clone();
            if non_blank(&record.alias).is_none() {
                record.alias = key.clone();
            }
            items.insert(key, record);
        }

        Ok(items)
    }

    /// Write the full snapshot to a sibling temp file and rename it into place
    async fn persist(&self, items: &BTreeMap<String, StatusRecord>) -> StoreResult<()> {
        let snapshot = SnapshotRef {
            ts: now_timestamp(),
            items: items.values().collect(),
        };
        let body = serde_json::to_vec_pretty(&snapshot)?;

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &body)
            .await
            .map_err(|source| StoreError::PersistFailed {
                path: tmp.clone(),
                source,
            })?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|source| StoreError::PersistFailed {
                path: self.path.clone(),
                source,
            })?;

        trace!("persisted {} records", items.len());
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert an offline placeholder under `key` unless a record exists.
    ///
    /// Returns whether a record was inserted; the file is only rewritten then.
    pub async fn ensure_placeholder(&self, key: &str, alias: &str) -> StoreResult<bool> {
        let Some(key) = non_blank(key) else {
            return Ok(false);
        };
        let alias = non_blank(alias).unwrap_or(key);

        let mut items = self.items.lock().await;
        if items.contains_key(key) {
            return Ok(false);
        }
        items.insert(key.to_string(), StatusRecord::placeholder(key, alias));
        self.persist(&items).await?;
        Ok(true)
    }

    /// Record a successful poll.
    ///
    /// The record lands under `payload.instance_id` when present, else under
    /// `key_hint`. If that differs from `key_hint`, the record still stored
    /// under `key_hint` is removed and its alias carried over.
    #[instrument(skip(self, payload))]
    pub async fn upsert_online(
        &self,
        payload: StatusPayload,
        key_hint: &str,
        alias: &str,
    ) -> StoreResult<()> {
        let canonical = payload
            .instance_id
            .as_deref()
            .and_then(non_blank)
            .or_else(|| non_blank(key_hint))
            .map(String::from);
        let Some(canonical) = canonical else {
            warn!("ignoring online payload without any key");
            return Ok(());
        };

        let mut items = self.items.lock().await;

        let mut carried_alias = None;
        if canonical != key_hint {
            if let Some(old) = items.remove(key_hint) {
                debug!("promoted record {key_hint} -> {canonical}");
                carried_alias = Some(old.alias);
            }
        }

        let alias = payload
            .alias
            .as_deref()
            .and_then(non_blank)
            .or_else(|| carried_alias.as_deref().and_then(non_blank))
            .or_else(|| non_blank(alias))
            .unwrap_or(canonical.as_str())
            .to_string();

        let record = StatusRecord::online(canonical.clone(), alias, payload);
        items.insert(canonical, record);
        self.persist(&items).await
    }

    /// Flip `id` to offline, keeping every metric field it already had
    #[instrument(skip(self))]
    pub async fn mark_offline(&self, id: &str, alias: &str) -> StoreResult<()> {
        let Some(id) = non_blank(id) else {
            return Ok(());
        };

        let mut items = self.items.lock().await;
        let mut record = items
            .remove(id)
            .unwrap_or_else(|| StatusRecord::bare(id, non_blank(alias).unwrap_or(id)));

        record.status = InstanceStatus::Offline;
        record.received_at = now_timestamp();
        if non_blank(&record.alias).is_none() {
            record.alias = non_blank(alias).unwrap_or(id).to_string();
        }
        record.fill_offline_defaults();

        items.insert(id.to_string(), record);
        self.persist(&items).await
    }

    /// Drop every record whose key is not in `allowed`.
    ///
    /// An empty (or all-blank) `allowed` set is a no-op. Returns the number
    /// of records removed.
    pub async fn prune<I, S>(&self, allowed: I) -> StoreResult<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let allowed: HashSet<String> = allowed
            .into_iter()
            .filter_map(|key| non_blank(key.as_ref()).map(String::from))
            .collect();
        if allowed.is_empty() {
            return Ok(0);
        }

        let mut items = self.items.lock().await;
        let before = items.len();
        items.retain(|key, _| allowed.contains(key));
        let removed = before - items.len();

        if removed > 0 {
            info!("pruned {removed} stale records");
            self.persist(&items).await?;
        }
        Ok(removed)
    }

    /// All records sorted by key, or only those in `ids` when it is non-empty
    pub async fn build_state(&self, ids: Option<&[String]>) -> StateSnapshot {
        let wanted: Option<HashSet<&str>> = ids
            .filter(|ids| !ids.is_empty())
            .map(|ids| ids.iter().map(String::as_str).collect());

        let items = self.items.lock().await;
        let items = items
            .iter()
            .filter(|(key, _)| wanted.as_ref().is_none_or(|w| w.contains(key.as_str())))
            .map(|(_, record)| record.clone())
            .collect();

        StateSnapshot {
            ts: now_timestamp(),
            items,
        }
    }

    /// `(key, status, receivedAt)` for records received strictly after `since`.
    ///
    /// An absent or unparsable `since` disables the filter; records whose own
    /// timestamp cannot be parsed are always included.
    pub async fn build_index(&self, since: Option<&str>) -> IndexSnapshot {
        let since = since.and_then(parse_timestamp);

        let items = self.items.lock().await;
        let items = items
            .values()
            .filter(|record| match (since, record.received_at_parsed()) {
                (Some(since), Some(received)) => received > since,
                _ => true,
            })
            .map(StatusRecord::index_entry)
            .collect();

        IndexSnapshot {
            ts: now_timestamp(),
            items,
        }
    }

    pub async fn get(&self, id: &str) -> Option<StatusRecord> {
        self.items.lock().await.get(id).cloned()
    }

    pub async fn keys(&self) -> Vec<String> {
        self.items.lock().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }
}
