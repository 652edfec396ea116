//! Shared key-value medium used as the election coordination area.
//!
//! Any medium works as long as single-key writes are atomic and writers
//! eventually notify readers; there are no multi-key transactions.

use crate::election::error::StorageResult;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;

const DEFAULT_CHANGE_CAPACITY: usize = 64;

/// Change notification for one key; `value` is `None` after removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageChange {
    pub key: String,
    pub value: Option<String>,
}

/// Shared, eventually consistent key-value area with change notification.
pub trait SharedStorage: Send + Sync {
    fn read(&self, key: &str) -> StorageResult<Option<String>>;

    /// Atomic single-key write; the last writer wins.
    fn write(&self, key: &str, value: &str) -> StorageResult<()>;

    fn remove(&self, key: &str) -> StorageResult<()>;

    /// Notifications may arrive late and are best-effort.
    fn subscribe(&self) -> broadcast::Receiver<StorageChange>;
}

/// In-process storage area; clones share the same entries.
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    entries: Arc<Mutex<BTreeMap<String, String>>>,
    changes: broadcast::Sender<StorageChange>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new(DEFAULT_CHANGE_CAPACITY)
    }
}

impl MemoryStorage {
    /// Creates an area whose subscribers buffer `capacity` notifications.
    pub fn new(capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(capacity.max(1));
        Self {
            entries: Arc::new(Mutex::new(BTreeMap::new())),
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

impl SharedStorage for MemoryStorage {
    fn read(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> StorageResult<()> {
        self.entries
            .lock()
            .insert(key.to_string(), value.to_string());
        self.notify(key, Some(value.to_string()));
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let removed = self.entries.lock().remove(key);
        if removed.is_some() {
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
    use super::{MemoryStorage, SharedStorage, StorageChange};

    #[test]
    fn clones_share_entries_and_notifications() {
        let storage = MemoryStorage::default();
        let peer = storage.clone();
        let mut changes = peer.subscribe();

        storage.write("k", "v1").expect("write");
        assert_eq!(peer.read("k").expect("read").as_deref(), Some("v1"));
        assert_eq!(
            changes.try_recv().expect("notified"),
            StorageChange {
                key: "k".to_string(),
                value: Some("v1".to_string())
            }
        );
    }

    #[test]
    fn removing_missing_key_is_silent() {
        let storage = MemoryStorage::default();
        let mut changes = storage.subscribe();
        storage.remove("absent").expect("remove");
        assert!(changes.try_recv().is_err());
    }
}
