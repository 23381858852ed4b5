//! Snapshot persistence
//!
//! Engine state is persisted through the `StateStore` trait. The primary
//! implementation is `SqliteStateStore`, which keeps named snapshots as JSON
//! rows.

mod sqlite;
mod traits;

pub use sqlite::SqliteStateStore;
pub use traits::{OpenStore, SnapshotInfo, StateStore, StorageError, StorageResult};
