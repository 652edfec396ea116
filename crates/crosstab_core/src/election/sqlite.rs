//! SQLite-backed shared storage.
//!
//! Several processes may open the same database file. Notifications cover
//! writes made through this handle only; writes from other handles become
//! visible on the next `read`, which the election's periodic tick performs.

use crate::clock::now_epoch_ms;
use crate::db::{open_db, open_db_in_memory};
use crate::election::error::StorageResult;
use crate::election::storage::{SharedStorage, StorageChange};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tokio::sync::broadcast;

const CHANGE_CAPACITY: usize = 64;

pub struct SqliteStorage {
    conn: Mutex<Connection>,
    changes: broadcast::Sender<StorageChange>,
}

impl SqliteStorage {
    /// Opens (or creates) a shared store file.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        Ok(Self::from_connection(open_db(path)?))
    }

    /// Opens a store private to this process, mostly useful in tests.
    pub fn open_in_memory() -> StorageResult<Self> {
        Ok(Self::from_connection(open_db_in_memory()?))
    }

    fn from_connection(conn: Connection) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            conn: Mutex::new(conn),
            changes,
        }
    }

    fn notify(&self, key: &str, value: Option<String>) {
        let _ = self.changes.send(StorageChange {
            key: key.to_string(),
            value,
        });
    }
}

impl SharedStorage for SqliteStorage {
    fn read(&self, key: &str) -> StorageResult<Option<String>> {
        let conn = self.conn.lock();
        let value = conn
            .query_row(
                "SELECT value FROM shared_kv WHERE key = ?1;",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn write(&self, key: &str, value: &str) -> StorageResult<()> {
        self.conn.lock().execute(
            "INSERT INTO shared_kv (key, value, updated_at_ms) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at_ms = excluded.updated_at_ms;",
            params![key, value, now_epoch_ms() as i64],
        )?;
        self.notify(key, Some(value.to_string()));
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let removed = self
            .conn
            .lock()
            .execute("DELETE FROM shared_kv WHERE key = ?1;", params![key])?;
        if removed > 0 {
            self.notify(key, None);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::SqliteStorage;
    use crate::election::storage::{SharedStorage, StorageChange};

    #[test]
    fn upserts_and_removes_values() {
        let storage = SqliteStorage::open_in_memory().expect("open");
        assert_eq!(storage.read("lease").expect("read"), None);

        storage.write("lease", "a").expect("insert");
        storage.write("lease", "b").expect("update");
        assert_eq!(storage.read("lease").expect("read").as_deref(), Some("b"));

        storage.remove("lease").expect("remove");
        assert_eq!(storage.read("lease").expect("read"), None);
    }

    #[test]
    fn own_writes_and_removals_are_notified() {
        let storage = SqliteStorage::open_in_memory().expect("open");
        let mut changes = storage.subscribe();

        storage.write("lease", "a").expect("write");
        storage.remove("lease").expect("remove");
        storage.remove("lease").expect("remove missing");

        assert_eq!(
            changes.try_recv().expect("write notified"),
            StorageChange {
                key: "lease".to_string(),
                value: Some("a".to_string())
            }
        );
        assert_eq!(
            changes.try_recv().expect("remove notified"),
            StorageChange {
                key: "lease".to_string(),
                value: None
            }
        );
        assert!(changes.try_recv().is_err());
    }

    #[test]
    fn other_handles_see_writes_on_read_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("shared.db");
        let writer = SqliteStorage::open(&path).expect("open writer");
        let reader = SqliteStorage::open(&path).expect("open reader");
        let mut changes = reader.subscribe();

        writer.write("lease", "a").expect("write");

        assert!(changes.try_recv().is_err());
        assert_eq!(reader.read("lease").expect("read").as_deref(), Some("a"));
    }
}
