//! Storage trait definitions

use crate::manager::EngineSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid snapshot name: {0:?}")]
    InvalidName(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Date parsing error: {0}")]
    DateParse(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Listing entry for a stored snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotInfo {
    pub name: String,
    pub saved_at: DateTime<Utc>,
    pub chunk_count: usize,
    pub chapter_count: usize,
    /// Size of the serialized snapshot
    pub bytes: usize,
}

/// Named engine snapshots
///
/// Implementations must be thread-safe (Send + Sync) so a store can be
/// shared with a driver task.
pub trait StateStore: Send + Sync {
    /// Save under `name`, replacing any snapshot with that name
    fn save_snapshot(&self, name: &str, snapshot: &EngineSnapshot) -> StorageResult<SnapshotInfo>;

    fn load_snapshot(&self, name: &str) -> StorageResult<Option<EngineSnapshot>>;

    /// Returns whether a snapshot was deleted
    fn delete_snapshot(&self, name: &str) -> StorageResult<bool>;

    /// All snapshots, ordered by name
    fn list_snapshots(&self) -> StorageResult<Vec<SnapshotInfo>>;
}

/// Extension trait for opening stores from paths
pub trait OpenStore: StateStore + Sized {
    /// Open or create a store at the given path
    fn open(path: impl AsRef<Path>) -> StorageResult<Self>;

    /// Create an in-memory store (useful for testing)
    fn open_in_memory() -> StorageResult<Self>;
}
