//! Snapshot scheduler: a cancellable task that materializes a new snapshot
//! when the log has grown enough or the latest snapshot is too old.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use clawnet_core::constants::{SNAPSHOT_MAX_AGE_MS, SNAPSHOT_MAX_EVENTS};
use clawnet_core::error::ClawError;
use clawnet_core::types::Timestamp;
use clawnet_store::EventStore;

use crate::snapshot::{create_snapshot, SnapshotStore};

#[derive(Clone, Debug)]
pub struct SnapshotPolicy {
    /// Threshold (a): events appended since the last snapshot.
    pub max_events: u64,
    /// Threshold (b): age of the latest snapshot in milliseconds.
    pub max_age_ms: u64,
    /// How often the thresholds are evaluated.
    pub check_interval_ms: u64,
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        Self {
            max_events: SNAPSHOT_MAX_EVENTS,
            max_age_ms: SNAPSHOT_MAX_AGE_MS,
            check_interval_ms: 10_000,
        }
    }
}

pub struct SnapshotScheduler {
    store: Arc<EventStore>,
    snapshots: Arc<SnapshotStore>,
    policy: SnapshotPolicy,
    /// Stands in for a snapshot timestamp until the first one exists.
    started_at: Timestamp,
}

impl SnapshotScheduler {
    pub fn new(
        store: Arc<EventStore>,
        snapshots: Arc<SnapshotStore>,
        policy: SnapshotPolicy,
        started_at: Timestamp,
    ) -> Self {
        Self { store, snapshots, policy, started_at }
    }

    /// Decide whether either threshold fires at `now`.
    pub fn due(&self, now: Timestamp) -> Result<bool, ClawError> {
        let len = self.store.log_length()?;
        if len == 0 {
            return Ok(false);
        }
        match self.snapshots.latest()? {
            Some(latest) => {
                let at_seq = self.store.event_seq(&latest.at)?.unwrap_or(0);
                let grown = len.saturating_sub(at_seq) >= self.policy.max_events;
                let aged = now.saturating_sub(latest.created_at) >= self.policy.max_age_ms as i64;
                Ok(grown || aged)
            }
            None => {
                let grown = len >= self.policy.max_events;
                let aged = now.saturating_sub(self.started_at) >= self.policy.max_age_ms as i64;
                Ok(grown || aged)
            }
        }
    }

    /// Replay the log and persist a fresh snapshot.
    pub fn snapshot_now(&self, now: Timestamp) -> Result<(), ClawError> {
        if let Some(snapshot) = create_snapshot(&self.store, now)? {
            info!(at = %snapshot.at, "snapshot created");
            self.snapshots.save(&snapshot)?;
        }
        Ok(())
    }

    /// Periodic loop. Exits when `shutdown` flips to true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker =
            tokio::time::interval(std::time::Duration::from_millis(self.policy.check_interval_ms));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = chrono::Utc::now().timestamp_millis();
                    match self.due(now) {
                        Ok(true) => {
                            if let Err(e) = self.snapshot_now(now) {
                                warn!(error = %e, "snapshot creation failed");
                            }
                        }
                        Ok(false) => {}
                        Err(e) => warn!(error = %e, "snapshot threshold check failed"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }
}
