//! Durable instance status store
//!
//! Holds the latest [`StatusRecord`] per tracking key and mirrors the whole
//! map to one JSON file after every mutation.
//!
//! ## Design
//!
//! - **Write-through**: each mutating call persists the full snapshot before
//!   returning, so the file lags memory by at most one in-flight write
//! - **Atomic replace**: snapshots go to a `.tmp` sibling and are renamed
//!   over the state file
//! - **Single lock**: one `tokio::sync::Mutex` guards the map and the write,
//!   serializing the poller against API readers
//!
//! ## File format
//!
//! ```json
//! { "ts": "2024-05-01T10:00:00.000Z", "items": [ { "instanceId": "...", ... } ] }
//! ```

pub mod error;
pub mod record;
pub mod state;

pub use error::{StoreError, StoreResult};
pub use record::{
    IndexEntry, IndexSnapshot, InstanceStatus, LatestSample, NetworkInterface, StateSnapshot,
    StatusPayload, StatusRecord,
};
pub use state::StateStore;
