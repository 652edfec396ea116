//! Shared status container.
//!
//! Modules receive a clone at construction time and may read any status;
//! only the lifecycle kernel writes.

use crate::lifecycle::status::LifecycleStatus;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Cheaply cloneable handle to the status of every module in one graph.
#[derive(Debug, Clone, Default)]
pub struct SharedState {
    statuses: Arc<RwLock<BTreeMap<String, LifecycleStatus>>>,
}

impl SharedState {
    /// Creates a container with every module `Pending`.
    pub(crate) fn with_modules(names: impl IntoIterator<Item = String>) -> Self {
        let statuses = names
            .into_iter()
            .map(|name| (name, LifecycleStatus::Pending))
            .collect();
        Self {
            statuses: Arc::new(RwLock::new(statuses)),
        }
    }

    pub fn status(&self, name: &str) -> Option<LifecycleStatus> {
        self.statuses.read().get(name).copied()
    }

    pub fn is_ready(&self, name: &str) -> bool {
        self.status(name) == Some(LifecycleStatus::Ready)
    }

    /// Point-in-time copy of every status.
    pub fn snapshot(&self) -> BTreeMap<String, LifecycleStatus> {
        self.statuses.read().clone()
    }

    /// Stores `status` and returns the previous value.
    pub(crate) fn set(&self, name: &str, status: LifecycleStatus) -> Option<LifecycleStatus> {
        self.statuses.write().insert(name.to_string(), status)
    }
}
