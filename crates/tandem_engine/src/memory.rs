//! In-memory target store.
//!
//! This store keeps every table in memory and is suitable for:
//! - Unit and integration tests
//! - The `memory://` target scheme
//! - Rehearsing replays before pointing at a real secondary store
//!
//! Writes land in the shared tables immediately and are recorded in a
//! per-session undo log; rollback (or dropping an unfinished session)
//! replays that log backwards. Uncommitted writes are therefore visible to
//! concurrent readers, which is acceptable because the engine serializes
//! all replay batches.

use crate::target::{
    PoolStatus, Row, SessionOptions, TargetError, TargetOptions, TargetResult, TargetSession,
    TargetStore,
};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tandem_model::{EntityRegistry, FieldMap, PrimaryKey};

/// URI scheme served by [`MemoryTarget::connect`].
pub const MEMORY_SCHEME: &str = "memory://";

#[derive(Debug, Default)]
struct Table {
    key_columns: Vec<String>,
    unique_columns: Vec<String>,
    rows: BTreeMap<String, Row>,
}

impl Table {
    fn row_key(&self, row: &Row) -> Option<String> {
        let mut parts = Vec::with_capacity(self.key_columns.len());
        for column in &self.key_columns {
            parts.push(row.get(column)?.canonical());
        }
        Some(parts.join("\u{1f}"))
    }

    fn find_key(&self, filter: &FieldMap) -> Option<String> {
        if let Some(key) = self.row_key(filter) {
            if filter.len() == self.key_columns.len() {
                return self.rows.contains_key(&key).then_some(key);
            }
        }
        self.rows
            .iter()
            .find(|(_, row)| matches_filter(row, filter))
            .map(|(key, _)| key.clone())
    }
}

fn matches_filter(row: &Row, filter: &FieldMap) -> bool {
    filter.iter().all(|(column, expected)| {
        row.get(column)
            .is_some_and(|actual| actual.canonical() == expected.canonical())
    })
}

#[derive(Debug)]
struct Undo {
    kind: String,
    key: String,
    previous: Option<Row>,
}

#[derive(Debug)]
struct Inner {
    tables: RwLock<HashMap<String, Table>>,
    options: TargetOptions,
    reachable: AtomicBool,
    failing_begins: AtomicU32,
    rejected_kinds: RwLock<HashSet<String>>,
    latency: RwLock<Duration>,
    network_calls: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
    checked_out: AtomicUsize,
    disposals: AtomicU64,
}

impl Inner {
    fn round_trip(&self, statement_timeout: Duration) -> TargetResult<()> {
        self.network_calls.fetch_add(1, Ordering::SeqCst);
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(TargetError::Unreachable("connection refused".into()));
        }
        let latency = *self.latency.read();
        if latency > statement_timeout {
            std::thread::sleep(statement_timeout);
            return Err(TargetError::Timeout(statement_timeout));
        }
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }
        Ok(())
    }

    fn check_writable(&self, kind: &str) -> TargetResult<()> {
        if self.rejected_kinds.read().contains(kind) {
            return Err(TargetError::Rejected {
                entity_kind: kind.to_string(),
                message: "write rejected by store".into(),
            });
        }
        Ok(())
    }

    fn restore(&self, undo: Undo) {
        let mut tables = self.tables.write();
        if let Some(table) = tables.get_mut(&undo.kind) {
            match undo.previous {
                Some(row) => {
                    table.rows.insert(undo.key, row);
                }
                None => {
                    table.rows.remove(&undo.key);
                }
            }
        }
    }
}

/// An in-memory target store.
///
/// Cheap to clone; clones share the same tables.
///
/// # Example
///
/// ```rust
/// use tandem_engine::{MemoryTarget, TargetStore};
///
/// let target = MemoryTarget::new();
/// target.define_table("employee", ["id"]);
/// assert!(target.ping().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct MemoryTarget {
    inner: Arc<Inner>,
}

impl MemoryTarget {
    /// Creates an empty store with default options.
    pub fn new() -> Self {
        Self::with_options(TargetOptions::default())
    }

    /// Creates an empty store with the given options.
    pub fn with_options(options: TargetOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                tables: RwLock::new(HashMap::new()),
                options,
                reachable: AtomicBool::new(true),
                failing_begins: AtomicU32::new(0),
                rejected_kinds: RwLock::new(HashSet::new()),
                latency: RwLock::new(Duration::ZERO),
                network_calls: AtomicU64::new(0),
                commits: AtomicU64::new(0),
                rollbacks: AtomicU64::new(0),
                checked_out: AtomicUsize::new(0),
                disposals: AtomicU64::new(0),
            }),
        }
    }

    /// Opens a store from a `memory://<name>` URI.
    pub fn connect(uri: &str, options: TargetOptions) -> TargetResult<Self> {
        if !uri.starts_with(MEMORY_SCHEME) {
            return Err(TargetError::InvalidUri(uri.to_string()));
        }
        Ok(Self::with_options(options))
    }

    /// Creates a store with one table per registered entity kind.
    pub fn for_registry(registry: &EntityRegistry) -> Self {
        let target = Self::new();
        target.define_tables(registry);
        target
    }

    /// Defines one table per registered entity kind, keyed by its primary
    /// key columns.
    pub fn define_tables(&self, registry: &EntityRegistry) {
        for kind in registry.kinds() {
            if let Some(schema) = registry.get(&kind) {
                self.define_table(&kind, schema.primary_key().iter().cloned());
            }
        }
    }

    /// Creates (or redefines) a table keyed by the given columns.
    pub fn define_table<I, S>(&self, kind: &str, key_columns: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut tables = self.inner.tables.write();
        let table = tables.entry(kind.to_string()).or_default();
        table.key_columns = key_columns.into_iter().map(Into::into).collect();
    }

    /// Adds a unique constraint on a non-key column.
    pub fn add_unique(&self, kind: &str, column: impl Into<String>) {
        let mut tables = self.inner.tables.write();
        tables
            .entry(kind.to_string())
            .or_default()
            .unique_columns
            .push(column.into());
    }

    /// Writes a row directly, bypassing sessions and counters.
    pub fn seed(&self, kind: &str, row: Row) {
        let mut tables = self.inner.tables.write();
        if let Some(table) = tables.get_mut(kind) {
            if let Some(key) = table.row_key(&row) {
                table.rows.insert(key, row);
            }
        }
    }

    /// Reads a row by primary key, bypassing sessions and counters.
    pub fn row(&self, kind: &str, key: &PrimaryKey) -> Option<Row> {
        let tables = self.inner.tables.read();
        let table = tables.get(kind)?;
        let filter: FieldMap = key
            .columns(&table.key_columns)
            .into_iter()
            .map(|(c, v)| (c.to_string(), v.clone()))
            .collect();
        let found = table.find_key(&filter)?;
        table.rows.get(&found).cloned()
    }

    /// Returns all rows of a table ordered by key.
    pub fn rows(&self, kind: &str) -> Vec<Row> {
        self.inner
            .tables
            .read()
            .get(kind)
            .map(|t| t.rows.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the number of rows in a table.
    pub fn row_count(&self, kind: &str) -> usize {
        self.inner
            .tables
            .read()
            .get(kind)
            .map_or(0, |t| t.rows.len())
    }

    /// Toggles reachability; while unreachable every call fails.
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Makes the next `count` calls to `begin` fail as unreachable.
    pub fn fail_next_begins(&self, count: u32) {
        self.inner.failing_begins.store(count, Ordering::SeqCst);
    }

    /// Rejects every write to a kind.
    pub fn reject_writes(&self, kind: &str) {
        self.inner.rejected_kinds.write().insert(kind.to_string());
    }

    /// Simulates per-call latency.
    pub fn set_latency(&self, latency: Duration) {
        *self.inner.latency.write() = latency;
    }

    /// Returns the number of round trips made so far.
    pub fn network_calls(&self) -> u64 {
        self.inner.network_calls.load(Ordering::SeqCst)
    }

    /// Returns the number of committed sessions.
    pub fn commits(&self) -> u64 {
        self.inner.commits.load(Ordering::SeqCst)
    }

    /// Returns the number of rolled back sessions.
    pub fn rollbacks(&self) -> u64 {
        self.inner.rollbacks.load(Ordering::SeqCst)
    }

    /// Resets all counters to zero.
    pub fn reset_counters(&self) {
        self.inner.network_calls.store(0, Ordering::SeqCst);
        self.inner.commits.store(0, Ordering::SeqCst);
        self.inner.rollbacks.store(0, Ordering::SeqCst);
    }
}

impl Default for MemoryTarget {
    fn default() -> Self {
        Self::new()
    }
}

impl TargetStore for MemoryTarget {
    fn ping(&self) -> TargetResult<()> {
        self.inner.round_trip(self.inner.options.connect_timeout)
    }

    fn begin(&self, options: &SessionOptions) -> TargetResult<Box<dyn TargetSession>> {
        self.inner.round_trip(self.inner.options.connect_timeout)?;

        let pending_failures = self.inner.failing_begins.load(Ordering::SeqCst);
        if pending_failures > 0 {
            self.inner
                .failing_begins
                .store(pending_failures - 1, Ordering::SeqCst);
            return Err(TargetError::Unreachable("connection reset".into()));
        }

        self.inner.checked_out.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySession {
            inner: Arc::clone(&self.inner),
            options: *options,
            undo: Vec::new(),
            savepoints: Vec::new(),
            finished: false,
        }))
    }

    fn pool_status(&self) -> PoolStatus {
        let size = self.inner.options.pool_size;
        let checked_out = self.inner.checked_out.load(Ordering::SeqCst);
        PoolStatus {
            size,
            checked_out,
            available: size.saturating_sub(checked_out),
            disposals: self.inner.disposals.load(Ordering::SeqCst),
        }
    }

    fn dispose(&self) {
        self.inner.disposals.fetch_add(1, Ordering::SeqCst);
    }
}

struct MemorySession {
    inner: Arc<Inner>,
    options: SessionOptions,
    undo: Vec<Undo>,
    savepoints: Vec<usize>,
    finished: bool,
}

impl MemorySession {
    fn call(&self) -> TargetResult<()> {
        self.inner.round_trip(self.options.statement_timeout)
    }

    fn undo_to(&mut self, mark: usize) {
        while self.undo.len() > mark {
            if let Some(entry) = self.undo.pop() {
                self.inner.restore(entry);
            }
        }
    }

    fn finish(&mut self, commit: bool) {
        if !commit {
            self.undo_to(0);
            self.inner.rollbacks.fetch_add(1, Ordering::SeqCst);
        } else {
            self.undo.clear();
            self.inner.commits.fetch_add(1, Ordering::SeqCst);
        }
        self.savepoints.clear();
        self.finished = true;
        self.inner.checked_out.fetch_sub(1, Ordering::SeqCst);
    }
}

impl TargetSession for MemorySession {
    fn find(&mut self, kind: &str, key: &FieldMap) -> TargetResult<Option<Row>> {
        self.call()?;
        let tables = self.inner.tables.read();
        let table = tables
            .get(kind)
            .ok_or_else(|| TargetError::UnknownTable(kind.to_string()))?;
        Ok(table
            .find_key(key)
            .and_then(|found| table.rows.get(&found).cloned()))
    }

    fn insert(&mut self, kind: &str, row: &Row) -> TargetResult<()> {
        self.call()?;
        self.inner.check_writable(kind)?;

        let mut tables = self.inner.tables.write();
        let table = tables
            .get_mut(kind)
            .ok_or_else(|| TargetError::UnknownTable(kind.to_string()))?;
        let key = table.row_key(row).ok_or_else(|| TargetError::Rejected {
            entity_kind: kind.to_string(),
            message: "row is missing primary key columns".into(),
        })?;

        if table.rows.contains_key(&key) {
            return Err(TargetError::UniqueViolation {
                entity_kind: kind.to_string(),
                constraint: "primary key".into(),
            });
        }
        for column in &table.unique_columns {
            let Some(value) = row.get(column) else { continue };
            if value.is_null() {
                continue;
            }
            let taken = table.rows.values().any(|existing| {
                existing
                    .get(column)
                    .is_some_and(|v| v.canonical() == value.canonical())
            });
            if taken {
                return Err(TargetError::UniqueViolation {
                    entity_kind: kind.to_string(),
                    constraint: column.clone(),
                });
            }
        }

        table.rows.insert(key.clone(), row.clone());
        drop(tables);
        self.undo.push(Undo {
            kind: kind.to_string(),
            key,
            previous: None,
        });
        Ok(())
    }

    fn update(&mut self, kind: &str, key: &FieldMap, changes: &Row) -> TargetResult<bool> {
        self.call()?;
        self.inner.check_writable(kind)?;

        let mut tables = self.inner.tables.write();
        let table = tables
            .get_mut(kind)
            .ok_or_else(|| TargetError::UnknownTable(kind.to_string()))?;
        let Some(found) = table.find_key(key) else {
            return Ok(false);
        };
        let Some(row) = table.rows.get_mut(&found) else {
            return Ok(false);
        };

        let previous = row.clone();
        row.merge(changes);
        drop(tables);
        self.undo.push(Undo {
            kind: kind.to_string(),
            key: found,
            previous: Some(previous),
        });
        Ok(true)
    }

    fn delete(&mut self, kind: &str, key: &FieldMap) -> TargetResult<bool> {
        self.call()?;
        self.inner.check_writable(kind)?;

        let mut tables = self.inner.tables.write();
        let table = tables
            .get_mut(kind)
            .ok_or_else(|| TargetError::UnknownTable(kind.to_string()))?;
        let Some(found) = table.find_key(key) else {
            return Ok(false);
        };
        let previous = table.rows.remove(&found);
        drop(tables);
        self.undo.push(Undo {
            kind: kind.to_string(),
            key: found,
            previous,
        });
        Ok(true)
    }

    fn savepoint(&mut self) -> TargetResult<()> {
        self.savepoints.push(self.undo.len());
        Ok(())
    }

    fn rollback_to_savepoint(&mut self) -> TargetResult<()> {
        let mark = self
            .savepoints
            .pop()
            .ok_or_else(|| TargetError::Session("no open savepoint".into()))?;
        self.undo_to(mark);
        Ok(())
    }

    fn release_savepoint(&mut self) -> TargetResult<()> {
        self.savepoints
            .pop()
            .map(|_| ())
            .ok_or_else(|| TargetError::Session("no open savepoint".into()))
    }

    fn commit(mut self: Box<Self>) -> TargetResult<()> {
        if let Err(e) = self.call() {
            self.finish(false);
            return Err(e);
        }
        self.finish(true);
        Ok(())
    }

    fn rollback(mut self: Box<Self>) -> TargetResult<()> {
        self.finish(false);
        Ok(())
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        if !self.finished {
            self.finish(false);
        }
    }
}
