//! Per-poll ordering of "commit + publish".

use crate::models::PollId;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Keyed async lock. Writers hold the guard for a poll from the store write
/// until the matching event has been handed to the notifier, so subscribers
/// see deltas for one poll in commit order. Different polls never contend.
#[derive(Clone, Default)]
pub struct PollSequencer {
    locks: Arc<DashMap<PollId, Arc<Mutex<()>>>>,
}

impl PollSequencer {
    pub async fn lock(&self, poll_id: PollId) -> OwnedMutexGuard<()> {
        let lock = Arc::clone(&*self.locks.entry(poll_id).or_default());
        lock.lock_owned().await
    }

    /// Drops the lock entry of a deleted poll. Current holders keep their guard.
    ///
    /// A task already queued on the old lock and a later caller that gets a
    /// fresh entry are no longer mutually exclusive. Both run against a poll
    /// that is gone, so each fails its load with `NotFound` and publishes
    /// nothing.
    pub fn forget(&self, poll_id: PollId) {
        self.locks.remove(&poll_id);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
