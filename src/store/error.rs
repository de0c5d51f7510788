//! Error types for state store operations

use std::fmt;
use std::path::PathBuf;

/// Result type alias for state store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while loading or persisting state
#[derive(Debug)]
pub enum StoreError {
    /// The state file exists but could not be read
    LoadFailed { path: PathBuf, source: std::io::Error },

    /// The snapshot could not be serialized
    SerializationError(serde_json::Error),

    /// Writing or replacing the state file failed. In-memory and durable
    /// state have diverged when this is returned from a mutation.
    PersistFailed { path: PathBuf, source: std::io::Error },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::LoadFailed { path, source } => {
                write!(f, "failed to read state file {}: {}", path.display(), source)
            }
            StoreError::SerializationError(err) => {
                write!(f, "state serialization error: {}", err)
            }
            StoreError::PersistFailed { path, source } => {
                write!(f, "failed to persist state to {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::LoadFailed { source, .. } => Some(source),
            StoreError::SerializationError(err) => Some(err),
            StoreError::PersistFailed { source, .. } => Some(source),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::SerializationError(err)
    }
}
