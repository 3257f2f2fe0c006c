//! Per-transaction accumulation of snapshots.

use crate::snapshot::{EntitySnapshot, Operation};
use serde::{Deserialize, Serialize};

/// A drained batch of snapshots, one bucket per operation.
///
/// Buckets keep capture order, and every snapshot is stamped with its
/// position across all buckets (see [`EntitySnapshot::sequence`]). Replay
/// order across buckets is fixed by the replay engine, not by this type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Inserted records.
    pub inserted: Vec<EntitySnapshot>,
    /// Updated records.
    pub updated: Vec<EntitySnapshot>,
    /// Deleted records.
    pub deleted: Vec<EntitySnapshot>,
}

impl ChangeSet {
    /// Creates an empty change set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a change set by routing each snapshot to its bucket.
    pub fn from_snapshots(snapshots: impl IntoIterator<Item = EntitySnapshot>) -> Self {
        let mut set = Self::new();
        for snapshot in snapshots {
            set.push(snapshot);
        }
        set
    }

    /// Appends a snapshot to the bucket matching its operation.
    pub fn push(&mut self, mut snapshot: EntitySnapshot) {
        snapshot.set_sequence(self.len() as u64 + 1);
        match snapshot.operation() {
            Operation::Insert => self.inserted.push(snapshot),
            Operation::Update => self.updated.push(snapshot),
            Operation::Delete => self.deleted.push(snapshot),
        }
    }

    /// Returns the total number of snapshots.
    pub fn len(&self) -> usize {
        self.inserted.len() + self.updated.len() + self.deleted.len()
    }

    /// Returns true if all buckets are empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates over all snapshots in replay order (deletes, updates, inserts).
    pub fn iter_replay_order(&self) -> impl Iterator<Item = &EntitySnapshot> {
        self.deleted
            .iter()
            .chain(self.updated.iter())
            .chain(self.inserted.iter())
    }

    /// Returns all snapshots in capture order.
    pub fn capture_order(&self) -> Vec<&EntitySnapshot> {
        let mut snapshots: Vec<_> = self.iter_replay_order().collect();
        snapshots.sort_by_key(|s| s.sequence());
        snapshots
    }
}

/// Accumulates snapshots for one unit of work.
///
/// A buffer belongs to exactly one in-flight transaction; callers enforce
/// that by owning it (see the lifecycle hooks), so no locking happens here.
#[derive(Debug, Default)]
pub struct ChangeBuffer {
    changes: ChangeSet,
}

impl ChangeBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a snapshot to the bucket matching its operation.
    pub fn capture(&mut self, snapshot: EntitySnapshot) {
        self.changes.push(snapshot);
    }

    /// Returns and clears all buckets.
    pub fn drain(&mut self) -> ChangeSet {
        std::mem::take(&mut self.changes)
    }

    /// Drops everything captured so far, returning how many snapshots were
    /// discarded.
    pub fn clear(&mut self) -> usize {
        let discarded = self.changes.len();
        self.changes = ChangeSet::new();
        discarded
    }

    /// Returns the number of captured snapshots per bucket
    /// as `(inserted, updated, deleted)`.
    pub fn counts(&self) -> (usize, usize, usize) {
        (
            self.changes.inserted.len(),
            self.changes.updated.len(),
            self.changes.deleted.len(),
        )
    }

    /// Returns the total number of captured snapshots.
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Returns true if nothing was captured.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::PrimaryKey;
    use crate::value::FieldMap;

    fn snap(id: i64, op: Operation) -> EntitySnapshot {
        let fields: FieldMap = vec![("id", id)].into_iter().collect();
        EntitySnapshot::from_parts("employee", fields, PrimaryKey::from(id), op)
    }

    #[test]
    fn capture_routes_by_operation() {
        let mut buffer = ChangeBuffer::new();
        buffer.capture(snap(1, Operation::Insert));
        buffer.capture(snap(1, Operation::Update));
        buffer.capture(snap(2, Operation::Delete));
        buffer.capture(snap(3, Operation::Insert));

        assert_eq!(buffer.counts(), (2, 1, 1));
        assert_eq!(buffer.len(), 4);
    }

    #[test]
    fn same_key_is_not_collapsed() {
        let mut buffer = ChangeBuffer::new();
        buffer.capture(snap(5, Operation::Update));
        buffer.capture(snap(5, Operation::Update));

        let drained = buffer.drain();
        assert_eq!(drained.updated.len(), 2);
    }

    #[test]
    fn drain_returns_in_capture_order_and_clears() {
        let mut buffer = ChangeBuffer::new();
        for id in [3, 1, 2] {
            buffer.capture(snap(id, Operation::Insert));
        }

        let drained = buffer.drain();
        let ids: Vec<_> = drained
            .inserted
            .iter()
            .map(|s| s.primary_key().canonical())
            .collect();
        assert_eq!(ids, vec!["3", "1", "2"]);
        assert!(buffer.is_empty());
        assert!(buffer.drain().is_empty());
    }

    #[test]
    fn clear_reports_discarded_count() {
        let mut buffer = ChangeBuffer::new();
        buffer.capture(snap(1, Operation::Insert));
        buffer.capture(snap(2, Operation::Delete));
        assert_eq!(buffer.clear(), 2);
        assert!(buffer.is_empty());
    }

    #[test]
    fn push_stamps_capture_sequence() {
        let set = ChangeSet::from_snapshots(vec![
            snap(1, Operation::Update),
            snap(1, Operation::Insert),
            snap(2, Operation::Update),
        ]);
        assert_eq!(set.updated[0].sequence(), 1);
        assert_eq!(set.inserted[0].sequence(), 2);
        assert_eq!(set.updated[1].sequence(), 3);
    }

    #[test]
    fn capture_order_follows_sequence() {
        let set = ChangeSet::from_snapshots([
            snap(1, Operation::Insert),
            snap(1, Operation::Update),
            snap(2, Operation::Delete),
        ]);
        let ops: Vec<_> = set.capture_order().iter().map(|s| s.operation()).collect();
        assert_eq!(ops, vec![Operation::Insert, Operation::Update, Operation::Delete]);
    }

    #[test]
    fn replay_order_is_delete_update_insert() {
        let set = ChangeSet::from_snapshots(vec![
            snap(1, Operation::Insert),
            snap(2, Operation::Update),
            snap(3, Operation::Delete),
        ]);
        let ops: Vec<_> = set.iter_replay_order().map(|s| s.operation()).collect();
        assert_eq!(
            ops,
            vec![Operation::Delete, Operation::Update, Operation::Insert]
        );
    }
}
