//! Lease-based leader election.
//!
//! # Responsibility
//! - Claim the scope's lease when it is vacant or stale.
//! - Refresh the heartbeat while this context holds the lease.
//! - Track the current leader from storage reads and notifications and emit
//!   [`LeadershipChanged`] when it moves.
//!
//! # Invariants
//! - The context id is generated once and never changes.
//! - All mutation goes through single-key writes; the last write wins.
//! - A context that loses a claim race waits for the next staleness window.
//! - `check_is_main()` reflects the last observed record, not a fresh read.

use crate::clock::now_epoch_ms;
use crate::election::error::ElectionResult;
use crate::election::lease::{ElectionConfig, LeaseRecord};
use crate::election::storage::{SharedStorage, StorageChange};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio::time::{self, MissedTickBehavior};
use uuid::Uuid;

const EVENT_CAPACITY: usize = 16;

/// Emitted whenever the observed leader changes; `None` means vacant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeadershipChanged {
    pub leader_id: Option<String>,
}

pub struct LeaderElection {
    id: String,
    key: String,
    config: ElectionConfig,
    storage: Arc<dyn SharedStorage>,
    changes: Mutex<broadcast::Receiver<StorageChange>>,
    leader: Mutex<Option<String>>,
    events: broadcast::Sender<LeadershipChanged>,
}

impl LeaderElection {
    /// Creates an election participant with a fresh random context id.
    pub fn new(storage: Arc<dyn SharedStorage>, config: ElectionConfig) -> ElectionResult<Self> {
        Self::with_id(Uuid::new_v4().to_string(), storage, config)
    }

    pub fn with_id(
        id: impl Into<String>,
        storage: Arc<dyn SharedStorage>,
        config: ElectionConfig,
    ) -> ElectionResult<Self> {
        config.validate()?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let changes = storage.subscribe();
        Ok(Self {
            id: id.into(),
            key: config.key(),
            config,
            storage,
            changes: Mutex::new(changes),
            leader: Mutex::new(None),
            events,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &ElectionConfig {
        &self.config
    }

    /// Whether this context is the observed leader.
    pub fn check_is_main(&self) -> bool {
        self.leader.lock().as_deref() == Some(self.id.as_str())
    }

    pub fn leader_id(&self) -> Option<String> {
        self.leader.lock().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LeadershipChanged> {
        self.events.subscribe()
    }

    /// Runs one election round at `now_ms` and returns `check_is_main()`.
    pub fn tick(&self, now_ms: u64) -> ElectionResult<bool> {
        match self.read_record()? {
            Some(record) if record.leader_id == self.id => {
                self.write_record(now_ms)?;
                debug!(
                    "event=lease_heartbeat module=election status=ok id={} at_ms={now_ms}",
                    self.id
                );
            }
            Some(record) if !record.is_stale(now_ms, self.config.staleness_threshold_ms) => {}
            previous => {
                let reason = match &previous {
                    Some(_) => "stale",
                    None => "vacant",
                };
                info!(
                    "event=lease_claim module=election status=start id={} reason={reason} previous={}",
                    self.id,
                    previous.as_ref().map_or("-", |record| record.leader_id.as_str())
                );
                self.write_record(now_ms)?;
            }
        }
        self.refresh()?;
        Ok(self.check_is_main())
    }

    /// Applies queued storage notifications and returns `check_is_main()`.
    pub fn pump(&self) -> ElectionResult<bool> {
        let mut touched = false;
        {
            let mut changes = self.changes.lock();
            loop {
                match changes.try_recv() {
                    Ok(change) => touched |= change.key == self.key,
                    Err(TryRecvError::Lagged(skipped)) => {
                        warn!(
                            "event=lease_notifications module=election status=lagged id={} skipped={skipped}",
                            self.id
                        );
                        touched = true;
                    }
                    Err(TryRecvError::Empty | TryRecvError::Closed) => break,
                }
            }
        }
        // Notifications only say "something changed"; the record is re-read
        // so late deliveries cannot roll the observed leader back.
        if touched {
            self.refresh()?;
        }
        Ok(self.check_is_main())
    }

    /// Removes the lease if this context holds it. Best-effort.
    pub fn relinquish(&self) -> ElectionResult<bool> {
        let owned = matches!(self.read_record()?, Some(record) if record.leader_id == self.id);
        if owned {
            self.storage.remove(&self.key)?;
            info!(
                "event=lease_relinquish module=election status=ok id={}",
                self.id
            );
        }
        self.refresh()?;
        Ok(owned)
    }

    /// Drives the election until `shutdown` resolves, then relinquishes.
    pub async fn run_until<F>(&self, shutdown: F) -> ElectionResult<bool>
    where
        F: Future<Output = ()>,
    {
        let mut heartbeat = time::interval(Duration::from_millis(self.config.heartbeat_interval_ms));
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut changes = self.storage.subscribe();
        let mut notifications_open = true;
        tokio::pin!(shutdown);

        info!(
            "event=election_run module=election status=start id={} scope={}",
            self.id, self.config.scope
        );
        loop {
            tokio::select! {
                () = &mut shutdown => break,
                _ = heartbeat.tick() => {
                    if let Err(err) = self.tick(now_epoch_ms()) {
                        warn!("event=lease_tick module=election status=error id={} error={err}", self.id);
                    }
                }
                change = changes.recv(), if notifications_open => {
                    let relevant = match change {
                        Ok(change) => change.key == self.key,
                        Err(RecvError::Lagged(_)) => true,
                        Err(RecvError::Closed) => {
                            notifications_open = false;
                            false
                        }
                    };
                    if relevant {
                        if let Err(err) = self.refresh() {
                            warn!("event=lease_read module=election status=error id={} error={err}", self.id);
                        }
                    }
                }
            }
        }

        let relinquished = self.relinquish()?;
        info!(
            "event=election_run module=election status=stopped id={} relinquished={relinquished}",
            self.id
        );
        Ok(relinquished)
    }

    fn read_record(&self) -> ElectionResult<Option<LeaseRecord>> {
        let Some(raw) = self.storage.read(&self.key)? else {
            return Ok(None);
        };
        let record = LeaseRecord::decode(&raw);
        if record.is_none() {
            warn!(
                "event=lease_read module=election status=corrupt id={} key={}",
                self.id, self.key
            );
        }
        Ok(record)
    }

    fn write_record(&self, now_ms: u64) -> ElectionResult<()> {
        let encoded = LeaseRecord::new(self.id.clone(), now_ms).encode()?;
        self.storage.write(&self.key, &encoded)?;
        Ok(())
    }

    fn refresh(&self) -> ElectionResult<()> {
        let leader = self.read_record()?.map(|record| record.leader_id);
        self.observe(leader);
        Ok(())
    }

    fn observe(&self, leader: Option<String>) {
        let mut current = self.leader.lock();
        if *current == leader {
            return;
        }
        *current = leader.clone();
        info!(
            "event=leadership_changed module=election status=ok id={} leader={} is_main={}",
            self.id,
            leader.as_deref().unwrap_or("-"),
            leader.as_deref() == Some(self.id.as_str())
        );
        let _ = self.events.send(LeadershipChanged { leader_id: leader });
    }
}

#[cfg(test)]
mod tests {
    use super::{LeaderElection, LeadershipChanged};
    use crate::election::lease::{ElectionConfig, LeaseRecord};
    use crate::election::storage::{MemoryStorage, SharedStorage};
    use std::sync::Arc;

    fn participant(id: &str, storage: &MemoryStorage) -> LeaderElection {
        LeaderElection::with_id(id, Arc::new(storage.clone()), ElectionConfig::default())
            .expect("valid config")
    }

    #[test]
    fn claims_vacant_lease_and_refreshes_heartbeat() {
        let storage = MemoryStorage::default();
        let election = participant("a", &storage);
        let mut events = election.subscribe();

        assert!(election.tick(1_000).expect("tick"));
        assert_eq!(
            events.try_recv().expect("event"),
            LeadershipChanged {
                leader_id: Some("a".to_string())
            }
        );

        assert!(election.tick(2_000).expect("tick"));
        let raw = storage.read("crosstab.leader.default").expect("read");
        assert_eq!(
            raw.as_deref().and_then(LeaseRecord::decode),
            Some(LeaseRecord::new("a", 2_000))
        );
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn does_not_claim_fresh_lease() {
        let storage = MemoryStorage::default();
        let leader = participant("a", &storage);
        let follower = participant("b", &storage);

        leader.tick(1_000).expect("tick");
        assert!(!follower.tick(3_500).expect("tick"));
        assert_eq!(follower.leader_id().as_deref(), Some("a"));
    }

    #[test]
    fn corrupt_record_is_claimable() {
        let storage = MemoryStorage::default();
        storage
            .write("crosstab.leader.default", "not json")
            .expect("write");
        let election = participant("a", &storage);
        assert!(election.tick(10).expect("tick"));
    }

    #[test]
    fn relinquish_only_removes_owned_lease() {
        let storage = MemoryStorage::default();
        let leader = participant("a", &storage);
        let follower = participant("b", &storage);
        leader.tick(1_000).expect("tick");
        follower.pump().expect("pump");

        assert!(!follower.relinquish().expect("relinquish"));
        assert!(leader.relinquish().expect("relinquish"));
        assert_eq!(leader.leader_id(), None);
        assert!(!follower.pump().expect("pump"));
        assert_eq!(follower.leader_id(), None);
    }
}
