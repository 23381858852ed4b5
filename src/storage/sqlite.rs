//! SQLite snapshot store

use super::traits::{OpenStore, SnapshotInfo, StateStore, StorageError, StorageResult};
use crate::manager::EngineSnapshot;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// SQLite-backed snapshot store
///
/// One row per named snapshot, the snapshot itself stored as JSON next to
/// a few listing columns. Thread-safe via internal mutex on the connection.
pub struct SqliteStateStore {
    conn: Mutex<Connection>,
}

impl SqliteStateStore {
    fn init_schema(conn: &Connection) -> StorageResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS snapshots (
                name TEXT PRIMARY KEY,
                saved_at TEXT NOT NULL,
                chunk_count INTEGER NOT NULL,
                chapter_count INTEGER NOT NULL,
                snapshot_json TEXT NOT NULL
            );

            PRAGMA journal_mode = WAL;
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn validate_name(name: &str) -> StorageResult<()> {
        if name.trim().is_empty() {
            return Err(StorageError::InvalidName(name.to_string()));
        }
        Ok(())
    }

    fn parse_time(raw: &str) -> StorageResult<DateTime<Utc>> {
        Ok(DateTime::parse_from_rfc3339(raw)
            .map_err(|e| StorageError::DateParse(e.to_string()))?
            .with_timezone(&Utc))
    }
}

impl OpenStore for SqliteStateStore {
    fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl StateStore for SqliteStateStore {
    fn save_snapshot(&self, name: &str, snapshot: &EngineSnapshot) -> StorageResult<SnapshotInfo> {
        Self::validate_name(name)?;
        let json = serde_json::to_string(snapshot)?;
        let info = SnapshotInfo {
            name: name.to_string(),
            saved_at: Utc::now(),
            chunk_count: snapshot.tree.chunks.len(),
            chapter_count: snapshot.chapter_texts.len(),
            bytes: json.len(),
        };

        let conn = self.conn();
        conn.execute(
            r#"
            INSERT INTO snapshots (name, saved_at, chunk_count, chapter_count, snapshot_json)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(name) DO UPDATE SET
                saved_at = excluded.saved_at,
                chunk_count = excluded.chunk_count,
                chapter_count = excluded.chapter_count,
                snapshot_json = excluded.snapshot_json
            "#,
            params![
                info.name,
                info.saved_at.to_rfc3339(),
                info.chunk_count as i64,
                info.chapter_count as i64,
                json,
            ],
        )?;
        debug!(name, bytes = info.bytes, "snapshot saved");
        Ok(info)
    }

    fn load_snapshot(&self, name: &str) -> StorageResult<Option<EngineSnapshot>> {
        let conn = self.conn();
        let json: Option<String> = conn
            .query_row(
                "SELECT snapshot_json FROM snapshots WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;

        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn delete_snapshot(&self, name: &str) -> StorageResult<bool> {
        let conn = self.conn();
        let rows = conn.execute("DELETE FROM snapshots WHERE name = ?1", params![name])?;
        Ok(rows > 0)
    }

    fn list_snapshots(&self) -> StorageResult<Vec<SnapshotInfo>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT name, saved_at, chunk_count, chapter_count, length(snapshot_json)
             FROM snapshots ORDER BY name",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(name, saved_at, chunks, chapters, bytes)| {
                Ok(SnapshotInfo {
                    name,
                    saved_at: Self::parse_time(&saved_at)?,
                    chunk_count: chunks as usize,
                    chapter_count: chapters as usize,
                    bytes: bytes as usize,
                })
            })
            .collect()
    }
}
