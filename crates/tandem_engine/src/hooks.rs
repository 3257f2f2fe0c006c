//! Unit-of-work lifecycle callbacks.
//!
//! The primary store's transaction wrapper owns a [`UnitOfWork`] per
//! transaction and reports each mutation and boundary to
//! [`LifecycleHooks`]:
//!
//! ```text
//! begin ──► Active ──on_pre_commit──► PreCommit ──on_post_commit──► Replaying ──► Idle
//!             │                          │
//!             └────────on_rollback───────┴──────────────────────────► Discarded
//! ```
//!
//! Capture only snapshots and buffers; it never touches the network and
//! never reports an error to the primary transaction.

use crate::control::SyncControl;
use crate::dispatch::Dispatcher;
use crate::retry::ReplicationOutcome;
use crate::stats::{PendingCounts, PendingTracker};
use std::sync::Arc;
use tandem_model::{ChangeBuffer, Operation, Record, Snapshotter};
use uuid::Uuid;

/// Lifecycle state of a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    /// Open; mutations are captured.
    Active,
    /// Pre-commit boundary reached; the commit may still fail.
    PreCommit,
    /// Committed; the buffer is being replicated.
    Replaying,
    /// Replication finished (or was skipped).
    Idle,
    /// Rolled back; the buffer was dropped.
    Discarded,
}

impl UnitState {
    fn accepts_mutations(self) -> bool {
        matches!(self, UnitState::Active | UnitState::PreCommit)
    }
}

/// Replication context of one primary transaction.
///
/// Owned by exactly one transaction; the change buffer inside is never
/// shared.
#[derive(Debug)]
pub struct UnitOfWork {
    id: Uuid,
    state: UnitState,
    buffer: Option<ChangeBuffer>,
}

impl UnitOfWork {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: UnitState::Active,
            buffer: None,
        }
    }

    /// Returns the unit id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the current state.
    pub fn state(&self) -> UnitState {
        self.state
    }

    /// Returns the number of captured snapshots.
    pub fn captured(&self) -> usize {
        self.buffer.as_ref().map_or(0, ChangeBuffer::len)
    }

    /// Returns captured snapshot counts per operation.
    pub fn counts(&self) -> PendingCounts {
        let (inserted, updated, deleted) = self
            .buffer
            .as_ref()
            .map_or((0, 0, 0), ChangeBuffer::counts);
        PendingCounts {
            inserted,
            updated,
            deleted,
        }
    }
}

/// Callbacks invoked by the primary store's transaction wrapper.
#[derive(Debug, Clone)]
pub struct LifecycleHooks {
    snapshotter: Snapshotter,
    control: SyncControl,
    dispatcher: Arc<Dispatcher>,
    pending: Arc<PendingTracker>,
}

impl LifecycleHooks {
    /// Creates the hooks.
    pub fn new(
        snapshotter: Snapshotter,
        control: SyncControl,
        dispatcher: Arc<Dispatcher>,
        pending: Arc<PendingTracker>,
    ) -> Self {
        Self {
            snapshotter,
            control,
            dispatcher,
            pending,
        }
    }

    /// Opens a unit of work for a new primary transaction.
    pub fn begin(&self) -> UnitOfWork {
        UnitOfWork::new()
    }

    /// Captures one mutation.
    ///
    /// Ignored while replication is disabled and for unregistered kinds.
    /// A record that cannot be snapshotted is logged and dropped.
    pub fn on_mutation(&self, unit: &mut UnitOfWork, record: &dyn Record, operation: Operation) {
        if !self.control.is_enabled() {
            return;
        }
        if !unit.state.accepts_mutations() {
            tracing::warn!(
                unit = %unit.id,
                state = ?unit.state,
                entity_kind = record.entity_kind(),
                "mutation reported outside an open unit of work"
            );
            return;
        }
        if !self.snapshotter.registry().contains(record.entity_kind()) {
            return;
        }

        match self.snapshotter.snapshot(record, operation) {
            Ok(snapshot) => {
                tracing::debug!(
                    unit = %unit.id,
                    entity_kind = snapshot.entity_kind(),
                    primary_key = %snapshot.primary_key(),
                    %operation,
                    "captured mutation"
                );
                unit.buffer
                    .get_or_insert_with(ChangeBuffer::new)
                    .capture(snapshot);
                self.pending.add(operation);
            }
            Err(e) => {
                tracing::warn!(
                    unit = %unit.id,
                    entity_kind = record.entity_kind(),
                    %operation,
                    error = %e,
                    "dropping mutation from replication"
                );
            }
        }
    }

    /// Pre-commit boundary: captures the mutations being flushed.
    ///
    /// Nothing is replicated yet; the commit may still fail.
    pub fn on_pre_commit(&self, unit: &mut UnitOfWork, mutations: &[(&dyn Record, Operation)]) {
        for (record, operation) in mutations {
            self.on_mutation(unit, *record, *operation);
        }
        if unit.state == UnitState::Active {
            unit.state = UnitState::PreCommit;
        }
    }

    /// Post-commit boundary: drains the buffer and replicates it.
    ///
    /// Returns the outcome when replication ran inline, `None` when it was
    /// skipped or queued for the background worker. Never fails.
    pub fn on_post_commit(&self, unit: &mut UnitOfWork) -> Option<ReplicationOutcome> {
        if !unit.state.accepts_mutations() {
            tracing::warn!(unit = %unit.id, state = ?unit.state, "commit reported twice");
            return None;
        }
        unit.state = UnitState::Replaying;
        let changes = unit
            .buffer
            .take()
            .map(|mut buffer| buffer.drain())
            .unwrap_or_default();

        if changes.is_empty() {
            unit.state = UnitState::Idle;
            return None;
        }
        if !self.control.is_enabled() {
            tracing::debug!(
                unit = %unit.id,
                discarded = changes.len(),
                "replication disabled, dropping committed changes"
            );
            self.pending.sub(PendingCounts::of(&changes));
            unit.state = UnitState::Idle;
            return None;
        }

        let outcome = self.dispatcher.dispatch(changes);
        unit.state = UnitState::Idle;
        outcome
    }

    /// Rollback boundary: drops everything captured.
    pub fn on_rollback(&self, unit: &mut UnitOfWork) {
        let counts = unit.counts();
        let discarded = unit.buffer.take().map_or(0, |mut b| b.clear());
        self.pending.sub(counts);
        unit.state = UnitState::Discarded;
        tracing::debug!(unit = %unit.id, discarded, "rolled back, cleared pending changes");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DispatchMode, RetryConfig};
    use crate::failure::MemoryFailureLog;
    use crate::memory::MemoryTarget;
    use crate::replay::ReplayEngine;
    use crate::retry::RetryCoordinator;
    use crate::session::TargetSessionManager;
    use crate::target::SessionOptions;
    use std::time::Duration;
    use tandem_model::{DynamicRecord, EntityRegistry, FieldValue, PrimaryKey, SchemaDescriptor};

    struct Fixture {
        target: MemoryTarget,
        control: SyncControl,
        pending: Arc<PendingTracker>,
        hooks: LifecycleHooks,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(EntityRegistry::new());
        registry
            .register_entity_kind(
                SchemaDescriptor::builder("employee")
                    .fields(["id", "name"])
                    .primary_key(["id"])
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let target = MemoryTarget::for_registry(&registry);
        let sessions = Arc::new(TargetSessionManager::new(
            Arc::new(target.clone()),
            SessionOptions {
                statement_timeout: Duration::from_secs(30),
            },
        ));
        let coordinator = Arc::new(RetryCoordinator::new(
            Arc::new(ReplayEngine::new(Arc::clone(&registry), sessions)),
            RetryConfig::no_retry(),
            Arc::new(MemoryFailureLog::new()),
        ));
        let pending = Arc::new(PendingTracker::new());
        let control = SyncControl::new(true, Duration::from_secs(600));
        let dispatcher = Arc::new(
            Dispatcher::new(
                DispatchMode::Inline,
                coordinator,
                control.clone(),
                Arc::clone(&pending),
            )
            .unwrap(),
        );
        let hooks = LifecycleHooks::new(
            Snapshotter::new(registry),
            control.clone(),
            dispatcher,
            Arc::clone(&pending),
        );
        Fixture {
            target,
            control,
            pending,
            hooks,
        }
    }

    fn employee(id: i64, name: &str) -> DynamicRecord {
        DynamicRecord::new("employee").with("id", id).with("name", name)
    }

    #[test]
    fn commit_replicates_and_goes_idle() {
        let f = fixture();
        let mut unit = f.hooks.begin();
        f.hooks
            .on_mutation(&mut unit, &employee(1, "Ada"), Operation::Insert);
        assert_eq!(f.pending.counts().inserted, 1);

        f.hooks.on_pre_commit(&mut unit, &[]);
        assert_eq!(unit.state(), UnitState::PreCommit);
        // pre-commit is only a capture point
        assert_eq!(f.target.row_count("employee"), 0);

        let outcome = f.hooks.on_post_commit(&mut unit).unwrap();
        assert!(outcome.is_success());
        assert_eq!(unit.state(), UnitState::Idle);
        assert_eq!(f.target.row_count("employee"), 1);
        assert_eq!(f.pending.counts().total(), 0);
    }

    #[test]
    fn pre_commit_captures_flushed_mutations() {
        let f = fixture();
        let mut unit = f.hooks.begin();
        let ada = employee(1, "Ada");
        let lin = employee(2, "Lin");
        f.hooks.on_pre_commit(
            &mut unit,
            &[
                (&ada as &dyn Record, Operation::Insert),
                (&lin as &dyn Record, Operation::Insert),
            ],
        );
        assert_eq!(unit.captured(), 2);
    }

    #[test]
    fn rollback_discards_without_replay() {
        let f = fixture();
        let mut unit = f.hooks.begin();
        f.hooks
            .on_mutation(&mut unit, &employee(1, "Ada"), Operation::Insert);
        f.hooks.on_rollback(&mut unit);

        assert_eq!(unit.state(), UnitState::Discarded);
        assert_eq!(unit.captured(), 0);
        assert_eq!(f.pending.counts().total(), 0);
        assert_eq!(f.target.network_calls(), 0);

        // a late commit report is ignored
        assert!(f.hooks.on_post_commit(&mut unit).is_none());
    }

    #[test]
    fn unregistered_kinds_are_ignored() {
        let f = fixture();
        let mut unit = f.hooks.begin();
        let token = DynamicRecord::new("session_token").with("id", 1);
        f.hooks.on_mutation(&mut unit, &token, Operation::Insert);
        assert_eq!(unit.captured(), 0);
    }

    #[test]
    fn unserializable_records_are_dropped() {
        let f = fixture();
        let mut unit = f.hooks.begin();
        let nameless = DynamicRecord::new("employee").with("name", "no id");
        f.hooks.on_mutation(&mut unit, &nameless, Operation::Insert);
        f.hooks
            .on_mutation(&mut unit, &employee(2, "Lin"), Operation::Insert);
        assert_eq!(unit.captured(), 1);

        f.hooks.on_post_commit(&mut unit);
        assert!(f.target.row("employee", &PrimaryKey::from(2)).is_some());
    }

    #[test]
    fn disabled_sync_captures_nothing() {
        let f = fixture();
        f.control.disable();
        let mut unit = f.hooks.begin();
        for id in 0..10 {
            f.hooks
                .on_mutation(&mut unit, &employee(id, "x"), Operation::Insert);
        }
        assert_eq!(unit.captured(), 0);
        assert!(f.hooks.on_post_commit(&mut unit).is_none());
        assert_eq!(f.target.network_calls(), 0);
    }

    #[test]
    fn disabling_before_commit_drops_the_batch() {
        let f = fixture();
        let mut unit = f.hooks.begin();
        f.hooks
            .on_mutation(&mut unit, &employee(1, "Ada"), Operation::Insert);
        f.control.disable();

        assert!(f.hooks.on_post_commit(&mut unit).is_none());
        assert_eq!(f.target.network_calls(), 0);
        assert_eq!(f.pending.counts().total(), 0);
    }

    #[test]
    fn insert_and_update_are_both_captured() {
        let f = fixture();
        let mut unit = f.hooks.begin();
        let mut record = employee(1, "Ada");
        f.hooks.on_mutation(&mut unit, &record, Operation::Insert);
        record.set("name", "Ada Lovelace");
        f.hooks.on_mutation(&mut unit, &record, Operation::Update);

        let counts = unit.counts();
        assert_eq!((counts.inserted, counts.updated), (1, 1));

        f.hooks.on_post_commit(&mut unit);
        let row = f.target.row("employee", &PrimaryKey::from(1)).unwrap();
        assert_eq!(row.get("name"), Some(&FieldValue::from("Ada Lovelace")));
    }
}
