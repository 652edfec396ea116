//! Leader election over a shared key-value medium.
//!
//! Exactly one context per scope is elected active. Leadership is a lease
//! record with a heartbeat; a record whose heartbeat is older than the
//! staleness threshold may be claimed by any waiting context.

mod elector;
mod error;
mod lease;
mod sqlite;
mod storage;

pub use elector::{LeaderElection, LeadershipChanged};
pub use error::{ElectionError, ElectionResult, StorageError, StorageResult};
pub use lease::{
    ElectionConfig, LeaseRecord, DEFAULT_HEARTBEAT_INTERVAL_MS, DEFAULT_STALENESS_THRESHOLD_MS,
};
pub use sqlite::SqliteStorage;
pub use storage::{MemoryStorage, SharedStorage, StorageChange};
