//! Durable key/value store backing tracker snapshots.
//!
//! The tracker only needs load/save of one JSON document. `SqliteStore` keeps
//! it in a small key/value table; `MemoryStore` is for tests.

use chrono::Utc;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde_json::Value;
use std::path::PathBuf;
#[cfg(test)]
use std::sync::{Arc, Mutex};

use crate::error::{Result, TrackerError};

pub const SNAPSHOT_KEY: &str = "tabtrail.snapshot";

pub trait SnapshotStore: Send {
    fn load(&self) -> Result<Option<Value>>;
    fn save(&self, snapshot: &Value) -> Result<()>;
}

pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let store = Self { path };
        store.init_schema()?;
        Ok(store)
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT value FROM kv WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(|err| TrackerError::sqlite("Failed to query kv entry", err))
        })
    }

    pub fn put(&self, key: &str, value: &str) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO kv (key, value, updated_at) \
                 VALUES (?1, ?2, ?3) \
                 ON CONFLICT(key) DO UPDATE SET \
                    value = excluded.value, \
                    updated_at = excluded.updated_at",
                params![key, value, Utc::now().to_rfc3339()],
            )
            .map_err(|err| TrackerError::sqlite("Failed to upsert kv entry", err))?;
            Ok(())
        })
    }

    fn init_schema(&self) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute_batch(
                "BEGIN;
                 CREATE TABLE IF NOT EXISTS kv (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                 );
                 COMMIT;",
            )
            .map_err(|err| TrackerError::sqlite("Failed to initialize schema", err))
        })
    }

    fn with_connection<T>(&self, op: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.open()?;
        op(&mut conn)
    }

    fn open(&self) -> Result<Connection> {
        if let Some(parent) = self.path.parent() {
            fs_err::create_dir_all(parent)
                .map_err(|err| TrackerError::io("Failed to create tracker data dir", err))?;
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

        let conn = Connection::open_with_flags(&self.path, flags)
            .map_err(|err| TrackerError::sqlite("Failed to open sqlite db", err))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|err| TrackerError::sqlite("Failed to enable WAL", err))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|err| TrackerError::sqlite("Failed to set synchronous", err))?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(|err| TrackerError::sqlite("Failed to set busy_timeout", err))?;

        Ok(conn)
    }
}

impl SnapshotStore for SqliteStore {
    fn load(&self) -> Result<Option<Value>> {
        let Some(raw) = self.get(SNAPSHOT_KEY)? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|err| TrackerError::json("Failed to parse stored snapshot", err))
    }

    fn save(&self, snapshot: &Value) -> Result<()> {
        let raw = serde_json::to_string(snapshot)
            .map_err(|err| TrackerError::json("Failed to serialize snapshot", err))?;
        self.put(SNAPSHOT_KEY, &raw)
    }
}

/// Shared in-memory store. Clones see the same document, so a test can keep
/// one handle while the tracker owns another.
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    value: Arc<Mutex<Option<Value>>>,
    saves: Arc<Mutex<usize>>,
}

#[cfg(test)]
impl MemoryStore {
    pub fn with_value(value: Value) -> Self {
        let store = Self::default();
        if let Ok(mut slot) = store.value.lock() {
            *slot = Some(value);
        }
        store
    }

    pub fn value(&self) -> Option<Value> {
        self.value.lock().ok().and_then(|slot| slot.clone())
    }

    pub fn save_count(&self) -> usize {
        self.saves.lock().map(|count| *count).unwrap_or(0)
    }
}

#[cfg(test)]
impl SnapshotStore for MemoryStore {
    fn load(&self) -> Result<Option<Value>> {
        Ok(self.value())
    }

    fn save(&self, snapshot: &Value) -> Result<()> {
        if let Ok(mut slot) = self.value.lock() {
            *slot = Some(snapshot.clone());
        }
        if let Ok(mut count) = self.saves.lock() {
            *count += 1;
        }
        Ok(())
    }
}
