//! An in-memory primary store that drives the lifecycle hooks.
//!
//! Mirrors what a real transaction wrapper does: every mutation is reported
//! to [`LifecycleHooks::on_mutation`] as it happens, the commit reports the
//! pre-commit and post-commit boundaries, and a rollback (explicit or by
//! drop) reports [`LifecycleHooks::on_rollback`].

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tandem_engine::{LifecycleHooks, ReplicationOutcome, UnitOfWork};
use tandem_model::{DynamicRecord, EntityRegistry, Operation, Record};
use thiserror::Error;

/// Errors raised by the primary store.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PrimaryError {
    /// The commit was forced to fail.
    #[error("primary commit failed")]
    CommitFailed,
}

type Table = BTreeMap<String, DynamicRecord>;

/// Primary store with committed rows held in memory.
#[derive(Clone)]
pub struct PrimaryStore {
    registry: Arc<EntityRegistry>,
    hooks: LifecycleHooks,
    tables: Arc<Mutex<HashMap<String, Table>>>,
    fail_next_commit: Arc<AtomicBool>,
}

impl PrimaryStore {
    /// Creates an empty store reporting to `hooks`.
    pub fn new(registry: Arc<EntityRegistry>, hooks: LifecycleHooks) -> Self {
        Self {
            registry,
            hooks,
            tables: Arc::new(Mutex::new(HashMap::new())),
            fail_next_commit: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Opens a transaction.
    pub fn begin(&self) -> PrimaryTransaction<'_> {
        PrimaryTransaction {
            store: self,
            unit: self.hooks.begin(),
            staged: Vec::new(),
            finished: false,
        }
    }

    /// Makes the next commit fail after the pre-commit boundary.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Returns a committed row by its key values.
    pub fn get(&self, kind: &str, key: &[&str]) -> Option<DynamicRecord> {
        self.tables.lock().get(kind)?.get(&key.join("|")).cloned()
    }

    /// Returns the number of committed rows of a kind.
    pub fn count(&self, kind: &str) -> usize {
        self.tables.lock().get(kind).map_or(0, BTreeMap::len)
    }

    fn key_of(&self, record: &DynamicRecord) -> String {
        let Some(schema) = self.registry.get(record.entity_kind()) else {
            return String::new();
        };
        schema
            .primary_key()
            .iter()
            .map(|column| record.field(column).map(|v| v.canonical()).unwrap_or_default())
            .collect::<Vec<_>>()
            .join("|")
    }

    fn apply(&self, staged: &[(DynamicRecord, Operation)]) {
        let mut tables = self.tables.lock();
        for (record, operation) in staged {
            let key = self.key_of(record);
            let table = tables.entry(record.entity_kind().to_string()).or_default();
            match operation {
                Operation::Insert | Operation::Update => {
                    table.insert(key, record.clone());
                }
                Operation::Delete => {
                    table.remove(&key);
                }
            }
        }
    }
}

/// A primary transaction carrying its own unit of work.
pub struct PrimaryTransaction<'a> {
    store: &'a PrimaryStore,
    unit: UnitOfWork,
    staged: Vec<(DynamicRecord, Operation)>,
    finished: bool,
}

impl PrimaryTransaction<'_> {
    /// Stages an insert.
    pub fn insert(&mut self, record: DynamicRecord) {
        self.mutate(record, Operation::Insert);
    }

    /// Stages an update.
    pub fn update(&mut self, record: DynamicRecord) {
        self.mutate(record, Operation::Update);
    }

    /// Stages a delete.
    pub fn delete(&mut self, record: DynamicRecord) {
        self.mutate(record, Operation::Delete);
    }

    fn mutate(&mut self, record: DynamicRecord, operation: Operation) {
        self.store.hooks.on_mutation(&mut self.unit, &record, operation);
        self.staged.push((record, operation));
    }

    /// Returns the unit of work.
    pub fn unit(&self) -> &UnitOfWork {
        &self.unit
    }

    /// Commits and reports the post-commit boundary.
    ///
    /// Returns the replication outcome when it ran inline. A forced commit
    /// failure rolls back and never reaches the target.
    pub fn commit(mut self) -> Result<Option<ReplicationOutcome>, PrimaryError> {
        self.finished = true;
        self.store.hooks.on_pre_commit(&mut self.unit, &[]);

        if self.store.fail_next_commit.swap(false, Ordering::SeqCst) {
            self.store.hooks.on_rollback(&mut self.unit);
            return Err(PrimaryError::CommitFailed);
        }

        self.store.apply(&self.staged);
        Ok(self.store.hooks.on_post_commit(&mut self.unit))
    }

    /// Rolls back.
    pub fn rollback(mut self) {
        self.finished = true;
        self.store.hooks.on_rollback(&mut self.unit);
    }
}

impl Drop for PrimaryTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.store.hooks.on_rollback(&mut self.unit);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::fixtures::{employee, TestHarness};
    use tandem_engine::UnitState;

    #[test]
    fn commit_applies_to_primary_and_target() {
        let h = TestHarness::new();
        let mut tx = h.primary.begin();
        tx.insert(employee(1, "Ada"));
        assert_eq!(tx.unit().captured(), 1);
        let outcome = tx.commit().unwrap();

        assert!(outcome.is_some_and(|o| o.is_success()));
        assert!(h.primary.get("employee", &["1"]).is_some());
        assert_eq!(h.target.row_count("employee"), 1);
    }

    #[test]
    fn dropped_transaction_rolls_back() {
        let h = TestHarness::new();
        {
            let mut tx = h.primary.begin();
            tx.insert(employee(1, "Ada"));
        }
        assert_eq!(h.primary.count("employee"), 0);
        assert_eq!(h.target.network_calls(), 0);
        assert_eq!(h.replicator.stats().pending.total(), 0);
    }

    #[test]
    fn failed_commit_discards_capture() {
        let h = TestHarness::new();
        h.primary.fail_next_commit();
        let mut tx = h.primary.begin();
        tx.insert(employee(1, "Ada"));
        assert!(tx.commit().is_err());

        assert_eq!(h.target.network_calls(), 0);
        assert_eq!(h.primary.count("employee"), 0);

        let mut tx = h.primary.begin();
        tx.insert(employee(2, "Grace"));
        assert_eq!(tx.unit().state(), UnitState::Active);
        tx.commit().unwrap();
        assert_eq!(h.target.row_count("employee"), 1);
    }
}
