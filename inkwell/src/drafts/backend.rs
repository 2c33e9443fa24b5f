//! String key/value backends for the draft store.
//!
//! Both behave like browser local storage: flat keys, string values, whole
//! value replacement on every write, and no transactions across calls.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("storage quota exceeded: need {needed} bytes, {remaining} remaining")]
    QuotaExceeded { needed: u64, remaining: u64 },

    #[error("storage backend unavailable: {0}")]
    Unavailable(String),

    #[error("storage lock poisoned")]
    Poisoned,
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        StorageError::Unavailable(e.to_string())
    }
}

pub trait StorageBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
    /// Every stored key, in unspecified order.
    fn keys(&self) -> Result<Vec<String>, StorageError>;
}

/// In-process storage with an optional byte quota over stored values.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<BTreeMap<String, String>>,
    quota_bytes: Option<u64>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: u64) -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            quota_bytes: Some(quota_bytes),
        }
    }
}

impl StorageBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        if let Some(quota) = self.quota_bytes {
            let used: u64 = entries
                .iter()
                .filter(|(existing, _)| existing.as_str() != key)
                .map(|(_, stored)| stored.len() as u64)
                .sum();
            let needed = value.len() as u64;
            let remaining = quota.saturating_sub(used);
            if needed > remaining {
                return Err(StorageError::QuotaExceeded { needed, remaining });
            }
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        let entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(entries.keys().cloned().collect())
    }
}

/// SQLite-backed storage.
///
/// Schema:
/// ```sql
/// CREATE TABLE IF NOT EXISTS local_storage (
///     key   TEXT PRIMARY KEY,
///     value TEXT NOT NULL
/// );
/// ```
#[derive(Debug)]
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Open (or create) a database file. `":memory:"` opens a private
    /// in-memory database.
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| StorageError::Unavailable(e.to_string()))?;
                }
            }
            Connection::open(path)?
        };

        conn.execute(
            "CREATE TABLE IF NOT EXISTS local_storage (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl StorageBackend for SqliteBackend {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::Poisoned)?;
        let value = conn
            .query_row(
                "SELECT value FROM local_storage WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::Poisoned)?;
        conn.execute(
            "INSERT INTO local_storage (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::Poisoned)?;
        conn.execute("DELETE FROM local_storage WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::Poisoned)?;
        let mut stmt = conn.prepare("SELECT key FROM local_storage ORDER BY key")?;
        let keys = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(backend: &dyn StorageBackend) {
        assert_eq!(backend.get("a").unwrap(), None);
        backend.set("a", "1").unwrap();
        backend.set("b", "2").unwrap();
        backend.set("a", "3").unwrap();
        assert_eq!(backend.get("a").unwrap().as_deref(), Some("3"));

        let mut keys = backend.keys().unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);

        backend.remove("a").unwrap();
        backend.remove("missing").unwrap();
        assert_eq!(backend.get("a").unwrap(), None);
    }

    #[test]
    fn memory_backend_behaves_like_local_storage() {
        exercise(&MemoryBackend::new());
    }

    #[test]
    fn sqlite_backend_behaves_like_local_storage() {
        exercise(&SqliteBackend::open(":memory:").unwrap());
    }

    #[test]
    fn memory_quota_rejects_oversized_writes() {
        let backend = MemoryBackend::with_quota(10);
        backend.set("a", "12345").unwrap();
        let err = backend.set("b", "1234567").unwrap_err();
        assert_eq!(
            err,
            StorageError::QuotaExceeded {
                needed: 7,
                remaining: 5
            }
        );
        // Replacing a value only counts the new size.
        backend.set("a", "1234567890").unwrap();
    }

    #[test]
    fn sqlite_backend_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("drafts.db");
        let path = path.to_str().unwrap();

        SqliteBackend::open(path).unwrap().set("k", "v").unwrap();
        let reopened = SqliteBackend::open(path).unwrap();
        assert_eq!(reopened.get("k").unwrap().as_deref(), Some("v"));
    }
}
