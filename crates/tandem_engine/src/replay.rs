//! Batch replay against the target store.
//!
//! A batch is applied inside exactly one target session in the fixed order
//! deletes, updates, inserts. Per-record failures are collected in the
//! [`ReplayResult`] and never abort the batch; connectivity failures abort
//! it (the session rolls back) so the whole batch can be retried.
//!
//! Within a batch, a snapshot whose key was already written by a
//! later-captured snapshot is skipped as superseded. For keys touched once
//! per batch this is plain delete/update/insert replay; for keys touched
//! repeatedly it keeps the last captured state.

use crate::error::{EngineError, EngineResult};
use crate::session::TargetSessionManager;
use crate::target::{Row, TargetError, TargetSession};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tandem_model::{
    ChangeSet, EntityRegistry, EntitySnapshot, FieldMap, FieldValue, ModelError, Operation,
    PrimaryKey, SchemaDescriptor,
};

/// A record that could not be applied.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordError {
    /// The snapshot that failed.
    pub snapshot: EntitySnapshot,
    /// The error message.
    pub error: String,
}

impl RecordError {
    /// Returns the operation of the failed snapshot.
    pub fn operation(&self) -> Operation {
        self.snapshot.operation()
    }

    /// Returns the entity kind of the failed snapshot.
    pub fn entity_kind(&self) -> &str {
        self.snapshot.entity_kind()
    }

    /// Returns the primary key of the failed snapshot.
    pub fn primary_key(&self) -> &PrimaryKey {
        self.snapshot.primary_key()
    }
}

/// Outcome of one replayed batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplayResult {
    /// Rows inserted.
    pub inserted: usize,
    /// Rows updated.
    pub updated: usize,
    /// Rows deleted.
    pub deleted: usize,
    /// Inserts converted to updates after a uniqueness conflict.
    pub conflicts_resolved: usize,
    /// Deletes whose row was already gone.
    pub missing: usize,
    /// Snapshots skipped because a later capture of the same key was
    /// already applied.
    pub superseded: usize,
    /// Records that failed individually.
    pub errors: Vec<RecordError>,
}

impl ReplayResult {
    /// Returns true if every record applied.
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    /// Total number of rows written.
    pub fn applied(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }
}

/// Applies change sets to the target store.
///
/// All replays share one write lock, so at most one batch touches the
/// target at a time.
#[derive(Debug)]
pub struct ReplayEngine {
    registry: Arc<EntityRegistry>,
    sessions: Arc<TargetSessionManager>,
    write_lock: Mutex<()>,
}

impl ReplayEngine {
    /// Creates a replay engine.
    pub fn new(registry: Arc<EntityRegistry>, sessions: Arc<TargetSessionManager>) -> Self {
        Self {
            registry,
            sessions,
            write_lock: Mutex::new(()),
        }
    }

    /// Returns the session manager.
    pub fn sessions(&self) -> &Arc<TargetSessionManager> {
        &self.sessions
    }

    /// Replays one batch.
    ///
    /// # Errors
    ///
    /// Returns an error only when the batch as a whole failed (target
    /// unreachable, timeout, failed commit); nothing was kept in that case.
    pub fn replay(&self, changes: &ChangeSet) -> EngineResult<ReplayResult> {
        let _guard = self.write_lock.lock();

        tracing::debug!(
            inserted = changes.inserted.len(),
            updated = changes.updated.len(),
            deleted = changes.deleted.len(),
            "replaying batch"
        );

        let result = self.sessions.with_session(|session| {
            let mut result = ReplayResult::default();
            let mut touched: HashMap<(&str, String), u64> = HashMap::new();
            let inserting: HashSet<(&str, String)> = changes
                .inserted
                .iter()
                .map(|s| (s.entity_kind(), s.primary_key().canonical()))
                .collect();
            for snapshot in changes.iter_replay_order() {
                let key = (snapshot.entity_kind(), snapshot.primary_key().canonical());
                let latest = touched.get(&key).copied().unwrap_or(0);
                if latest > snapshot.sequence() {
                    tracing::debug!(
                        entity_kind = snapshot.entity_kind(),
                        primary_key = %snapshot.primary_key(),
                        operation = %snapshot.operation(),
                        "snapshot superseded by a later capture"
                    );
                    result.superseded += 1;
                    continue;
                }
                let insert_in_batch = inserting.contains(&key);
                match self.apply(session, snapshot, insert_in_batch, &mut result) {
                    Ok(()) => {
                        touched.insert(key, latest.max(snapshot.sequence()));
                    }
                    Err(EngineError::Target(e)) if e.is_connection() => return Err(e),
                    Err(e) => {
                        tracing::error!(
                            entity_kind = snapshot.entity_kind(),
                            primary_key = %snapshot.primary_key(),
                            operation = %snapshot.operation(),
                            error = %e,
                            "failed to replay record"
                        );
                        result.errors.push(RecordError {
                            snapshot: snapshot.clone(),
                            error: e.to_string(),
                        });
                    }
                }
            }
            Ok(result)
        })?;

        tracing::debug!(
            inserted = result.inserted,
            updated = result.updated,
            deleted = result.deleted,
            errors = result.errors.len(),
            "batch replayed"
        );
        Ok(result)
    }

    fn apply(
        &self,
        session: &mut dyn TargetSession,
        snapshot: &EntitySnapshot,
        insert_in_batch: bool,
        result: &mut ReplayResult,
    ) -> EngineResult<()> {
        let schema = self
            .registry
            .get(snapshot.entity_kind())
            .ok_or_else(|| ModelError::unregistered(snapshot.entity_kind()))?;

        match snapshot.operation() {
            Operation::Insert => insert(session, &schema, snapshot, result, true),
            Operation::Update => update(
                session,
                &schema,
                snapshot,
                result,
                Fallback::for_update(insert_in_batch),
            ),
            Operation::Delete => delete(session, &schema, snapshot, result),
        }
    }
}

fn insert(
    session: &mut dyn TargetSession,
    schema: &SchemaDescriptor,
    snapshot: &EntitySnapshot,
    result: &mut ReplayResult,
    fallback: bool,
) -> EngineResult<()> {
    let kind = snapshot.entity_kind();
    let row = materialize(schema, snapshot.fields());

    session.savepoint()?;
    match session.insert(kind, &row) {
        Ok(()) => {
            session.release_savepoint()?;
            result.inserted += 1;
            Ok(())
        }
        Err(e) if e.is_unique_violation() && fallback => {
            session.rollback_to_savepoint()?;
            tracing::warn!(
                entity_kind = kind,
                primary_key = %snapshot.primary_key(),
                error = %e,
                "insert conflicted, updating existing row"
            );
            result.conflicts_resolved += 1;
            update(session, schema, snapshot, result, Fallback::Reject)
        }
        Err(e) => {
            session.rollback_to_savepoint()?;
            Err(e.into())
        }
    }
}

/// What an update does when no row has its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fallback {
    /// Insert the row.
    Insert,
    /// Insert the row; the batch also inserts this key, so a missing row is
    /// expected.
    InsertInBatch,
    /// Fail the record.
    Reject,
}

impl Fallback {
    fn for_update(insert_in_batch: bool) -> Self {
        if insert_in_batch {
            Fallback::InsertInBatch
        } else {
            Fallback::Insert
        }
    }
}

fn update(
    session: &mut dyn TargetSession,
    schema: &SchemaDescriptor,
    snapshot: &EntitySnapshot,
    result: &mut ReplayResult,
    fallback: Fallback,
) -> EngineResult<()> {
    let kind = snapshot.entity_kind();
    let key = key_filter(schema, snapshot.primary_key());

    if session.find(kind, &key)?.is_some() {
        session.update(kind, &key, &materialize(schema, snapshot.fields()))?;
        result.updated += 1;
        return Ok(());
    }

    match fallback {
        Fallback::Reject => {
            return Err(TargetError::Rejected {
                entity_kind: kind.to_string(),
                message: format!(
                    "unique conflict but no row with key {}",
                    snapshot.primary_key()
                ),
            }
            .into());
        }
        Fallback::InsertInBatch => tracing::debug!(
            entity_kind = kind,
            primary_key = %snapshot.primary_key(),
            "row is inserted later in this batch, writing it now"
        ),
        Fallback::Insert => tracing::warn!(
            entity_kind = kind,
            primary_key = %snapshot.primary_key(),
            "record not found for update, inserting instead"
        ),
    }
    insert(session, schema, snapshot, result, false)
}

fn delete(
    session: &mut dyn TargetSession,
    schema: &SchemaDescriptor,
    snapshot: &EntitySnapshot,
    result: &mut ReplayResult,
) -> EngineResult<()> {
    let key = key_filter(schema, snapshot.primary_key());
    if session.delete(snapshot.entity_kind(), &key)? {
        result.deleted += 1;
    } else {
        tracing::warn!(
            entity_kind = snapshot.entity_kind(),
            primary_key = %snapshot.primary_key(),
            "record not found for deletion"
        );
        result.missing += 1;
    }
    Ok(())
}

/// Builds the key filter for a primary key, restoring temporal columns.
fn key_filter(schema: &SchemaDescriptor, key: &PrimaryKey) -> FieldMap {
    key.columns(schema.primary_key())
        .into_iter()
        .map(|(column, value)| (column.to_string(), restore(schema, column, value)))
        .collect()
}

/// Builds a target row from snapshot fields declared by the schema.
fn materialize(schema: &SchemaDescriptor, fields: &FieldMap) -> Row {
    fields
        .iter()
        .filter(|(name, _)| schema.fields().iter().any(|f| f.name == *name))
        .map(|(name, value)| (name.to_string(), restore(schema, name, value)))
        .collect()
}

/// Parses ISO text back into the temporal type the schema declares.
///
/// Unparsable text is kept as is.
fn restore(schema: &SchemaDescriptor, column: &str, value: &FieldValue) -> FieldValue {
    let (Some(kind), Some(text)) = (schema.temporal_kind(column), value.as_text()) else {
        return value.clone();
    };
    match kind.parse(text) {
        Some(parsed) => parsed,
        None => {
            tracing::debug!(
                entity_kind = schema.kind(),
                column,
                value = text,
                "temporal value did not parse, keeping text"
            );
            value.clone()
        }
    }
}
