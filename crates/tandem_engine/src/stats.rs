//! Operator-facing statistics.

use crate::target::PoolStatus;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use tandem_model::{ChangeSet, Operation};

/// Snapshots captured but not yet replicated, per operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PendingCounts {
    /// Pending inserts.
    pub inserted: usize,
    /// Pending updates.
    pub updated: usize,
    /// Pending deletes.
    pub deleted: usize,
}

impl PendingCounts {
    /// Counts the snapshots of a change set.
    pub fn of(changes: &ChangeSet) -> Self {
        Self {
            inserted: changes.inserted.len(),
            updated: changes.updated.len(),
            deleted: changes.deleted.len(),
        }
    }

    /// Total pending snapshots.
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }
}

/// Live pending counters shared by hooks and the dispatcher.
#[derive(Debug, Default)]
pub struct PendingTracker {
    inserted: AtomicUsize,
    updated: AtomicUsize,
    deleted: AtomicUsize,
}

impl PendingTracker {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&self, operation: Operation) -> &AtomicUsize {
        match operation {
            Operation::Insert => &self.inserted,
            Operation::Update => &self.updated,
            Operation::Delete => &self.deleted,
        }
    }

    /// Records one captured snapshot.
    pub fn add(&self, operation: Operation) {
        self.counter(operation).fetch_add(1, Ordering::SeqCst);
    }

    /// Removes counts that were replicated or discarded.
    pub fn sub(&self, counts: PendingCounts) {
        saturating_sub(&self.inserted, counts.inserted);
        saturating_sub(&self.updated, counts.updated);
        saturating_sub(&self.deleted, counts.deleted);
    }

    /// Returns the current counts.
    pub fn counts(&self) -> PendingCounts {
        PendingCounts {
            inserted: self.inserted.load(Ordering::SeqCst),
            updated: self.updated.load(Ordering::SeqCst),
            deleted: self.deleted.load(Ordering::SeqCst),
        }
    }
}

fn saturating_sub(counter: &AtomicUsize, amount: usize) {
    let _ = counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
        Some(current.saturating_sub(amount))
    });
}

/// Replication statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    /// Whether replication is enabled.
    pub enabled: bool,
    /// Whether the last connectivity check succeeded.
    pub target_reachable: bool,
    /// Captured snapshots not yet replicated.
    pub pending: PendingCounts,
    /// Batches that committed on the target.
    pub replayed_batches: u64,
    /// Batches that exhausted their retries.
    pub failed_batches: u64,
    /// Records that failed inside committed batches.
    pub record_failures: u64,
    /// Target pool status.
    pub pool: PoolStatus,
}
