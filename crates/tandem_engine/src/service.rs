//! The replication service facade.

use crate::config::ReplicationConfig;
use crate::control::SyncControl;
use crate::dispatch::Dispatcher;
use crate::error::{EngineError, EngineResult};
use crate::failure::{FailureSink, JsonLinesFailureLog, TracingFailureLog};
use crate::hooks::LifecycleHooks;
use crate::memory::{MemoryTarget, MEMORY_SCHEME};
use crate::replay::ReplayEngine;
use crate::retry::{ReplicationOutcome, RetryCoordinator};
use crate::session::{ResetReport, TargetSessionManager};
use crate::stats::{PendingTracker, SyncStats};
use crate::target::{SessionOptions, TargetStore};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tandem_model::{ChangeSet, EntityRegistry, Operation, Record, Snapshotter};

/// Why a bulk sync did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Replication is disabled.
    Disabled,
    /// Another bulk or manual sync is running.
    AlreadyRunning,
}

/// Totals of a completed bulk sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BulkSyncReport {
    /// Batches replayed.
    pub batches: usize,
    /// Records written to the target.
    pub synced: usize,
    /// Records that could not be written.
    pub failed: usize,
    /// Records not written because replication was disabled mid-run or a
    /// later capture of the same key superseded them.
    pub skipped: usize,
    /// Records offered.
    pub total: usize,
}

impl BulkSyncReport {
    /// Returns true if every offered record is accounted for.
    pub fn is_balanced(&self) -> bool {
        self.synced + self.failed + self.skipped == self.total
    }
}

/// Outcome of [`Replicator::bulk_sync`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum BulkSyncOutcome {
    /// Nothing was done.
    Skipped {
        /// Why.
        reason: SkipReason,
    },
    /// Every batch was attempted.
    Completed(BulkSyncReport),
}

/// The replication engine wired together.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use tandem_engine::{MemoryFailureLog, MemoryTarget, ReplicationConfig, Replicator};
/// use tandem_model::{DynamicRecord, EntityRegistry, Operation, SchemaDescriptor};
///
/// let registry = Arc::new(EntityRegistry::new());
/// registry.register_entity_kind(
///     SchemaDescriptor::builder("employee")
///         .fields(["id", "name"])
///         .primary_key(["id"])
///         .build()?,
/// )?;
///
/// let target = MemoryTarget::for_registry(&registry);
/// let replicator = Replicator::start(
///     ReplicationConfig::new("memory://hr"),
///     registry,
///     Arc::new(target.clone()),
///     Arc::new(MemoryFailureLog::new()),
/// )?;
///
/// let hooks = replicator.hooks();
/// let mut unit = hooks.begin();
/// let ada = DynamicRecord::new("employee").with("id", 1).with("name", "Ada");
/// hooks.on_mutation(&mut unit, &ada, Operation::Insert);
/// hooks.on_post_commit(&mut unit);
///
/// assert_eq!(target.row_count("employee"), 1);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct Replicator {
    config: ReplicationConfig,
    registry: Arc<EntityRegistry>,
    control: SyncControl,
    sessions: Arc<TargetSessionManager>,
    coordinator: Arc<RetryCoordinator>,
    dispatcher: Arc<Dispatcher>,
    pending: Arc<PendingTracker>,
    hooks: LifecycleHooks,
    target_reachable: AtomicBool,
}

impl Replicator {
    /// Starts the engine against a target store.
    ///
    /// When replication is enabled the target is pinged once; if it cannot
    /// be reached the engine starts disabled instead of failing.
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration or if the background worker cannot
    /// be spawned.
    pub fn start(
        config: ReplicationConfig,
        registry: Arc<EntityRegistry>,
        target: Arc<dyn TargetStore>,
        failure_sink: Arc<dyn FailureSink>,
    ) -> EngineResult<Self> {
        config.validate()?;

        let sessions = Arc::new(TargetSessionManager::new(
            target,
            SessionOptions {
                statement_timeout: config.statement_timeout,
            },
        ));
        let engine = Arc::new(ReplayEngine::new(
            Arc::clone(&registry),
            Arc::clone(&sessions),
        ));
        let coordinator = Arc::new(RetryCoordinator::new(
            engine,
            config.retry.clone(),
            failure_sink,
        ));
        let pending = Arc::new(PendingTracker::new());
        let control = SyncControl::new(config.enabled, config.operation_ttl);
        let dispatcher = Arc::new(Dispatcher::new(
            config.dispatch,
            Arc::clone(&coordinator),
            control.clone(),
            Arc::clone(&pending),
        )?);
        let hooks = LifecycleHooks::new(
            Snapshotter::new(Arc::clone(&registry)),
            control.clone(),
            Arc::clone(&dispatcher),
            Arc::clone(&pending),
        );

        let replicator = Self {
            config,
            registry,
            control,
            sessions,
            coordinator,
            dispatcher,
            pending,
            hooks,
            target_reachable: AtomicBool::new(false),
        };

        if replicator.control.is_enabled() {
            if replicator.check_target() {
                tracing::info!(
                    dispatch = ?replicator.config.dispatch,
                    "replication started"
                );
            } else {
                tracing::warn!("target unreachable at startup, replication disabled");
                replicator.control.disable();
            }
        } else {
            tracing::info!("replication disabled by configuration");
        }
        Ok(replicator)
    }

    /// Starts the engine from configuration alone.
    ///
    /// The target is resolved from `target_uri` (only `memory://` is built
    /// in) and failures go to `failure_log_path`, or to `tracing` when no
    /// path is set.
    pub fn connect(config: ReplicationConfig, registry: Arc<EntityRegistry>) -> EngineResult<Self> {
        if !config.target_uri.starts_with(MEMORY_SCHEME) {
            return Err(EngineError::config(format!(
                "no target store for uri {:?}",
                config.target_uri
            )));
        }
        let target = MemoryTarget::connect(&config.target_uri, config.target_options())?;
        target.define_tables(&registry);

        let sink: Arc<dyn FailureSink> = match &config.failure_log_path {
            Some(path) => Arc::new(JsonLinesFailureLog::open(path)?),
            None => Arc::new(TracingFailureLog),
        };
        Self::start(config, registry, Arc::new(target), sink)
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    /// Returns the entity registry.
    pub fn registry(&self) -> &Arc<EntityRegistry> {
        &self.registry
    }

    /// Returns the lifecycle hooks to wire into the primary store.
    pub fn hooks(&self) -> &LifecycleHooks {
        &self.hooks
    }

    /// Returns the control plane.
    pub fn control(&self) -> &SyncControl {
        &self.control
    }

    /// Enables replication.
    pub fn enable(&self) {
        self.control.enable();
    }

    /// Disables replication.
    pub fn disable(&self) {
        self.control.disable();
    }

    /// Returns true if replication is enabled.
    pub fn is_enabled(&self) -> bool {
        self.control.is_enabled()
    }

    /// Pings the target and records the result.
    pub fn check_target(&self) -> bool {
        let reachable = match self.sessions.ping() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "target connectivity check failed");
                false
            }
        };
        self.target_reachable.store(reachable, Ordering::SeqCst);
        reachable
    }

    /// Returns current statistics, refreshing target reachability.
    pub fn stats(&self) -> SyncStats {
        let counters = self.coordinator.counters();
        SyncStats {
            enabled: self.control.is_enabled(),
            target_reachable: self.check_target(),
            pending: self.pending.counts(),
            replayed_batches: counters.replayed_batches(),
            failed_batches: counters.failed_batches(),
            record_failures: counters.record_failures(),
            pool: self.sessions.pool_status(),
        }
    }

    /// Disposes the target pool and drops all operation registrations.
    pub fn emergency_reset(&self) -> ResetReport {
        tracing::warn!("emergency reset of target connections");
        let report = self.sessions.reset();
        self.control.clear_all();
        report
    }

    /// Replicates an explicit change set now, bypassing the hooks.
    ///
    /// Returns [`ReplicationOutcome::Disabled`] without contacting the
    /// target while replication is disabled.
    pub fn replicate(&self, changes: ChangeSet) -> ReplicationOutcome {
        if !self.control.is_enabled() {
            tracing::debug!(
                dropped = changes.len(),
                "replication disabled, skipping manual replicate"
            );
            return ReplicationOutcome::Disabled;
        }
        self.coordinator.replicate(changes)
    }

    /// Re-sends records to the target in batches.
    ///
    /// Every record is replayed as an insert, which the conflict fallback
    /// turns into an update for rows that already exist. Skipped when
    /// replication is disabled or another sync holds the registry.
    pub fn bulk_sync<I, R>(&self, operation_id: &str, records: I, batch_size: usize) -> BulkSyncOutcome
    where
        I: IntoIterator<Item = R>,
        R: Record,
    {
        if !self.control.is_enabled() {
            return BulkSyncOutcome::Skipped {
                reason: SkipReason::Disabled,
            };
        }
        let Some(_guard) = self.control.register(operation_id) else {
            return BulkSyncOutcome::Skipped {
                reason: SkipReason::AlreadyRunning,
            };
        };

        let batch_size = batch_size.max(1);
        let snapshotter = Snapshotter::new(Arc::clone(&self.registry));
        let mut report = BulkSyncReport::default();
        let mut batch = ChangeSet::new();

        tracing::info!(operation_id, batch_size, "bulk sync started");
        for record in records {
            report.total += 1;
            match snapshotter.snapshot(&record, Operation::Insert) {
                Ok(snapshot) => batch.push(snapshot),
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        operation_id,
                        entity_kind = record.entity_kind(),
                        error = %e,
                        "bulk sync skipped unserializable record"
                    );
                }
            }
            if batch.len() >= batch_size {
                self.flush_bulk_batch(std::mem::take(&mut batch), &mut report);
            }
        }
        if !batch.is_empty() {
            self.flush_bulk_batch(batch, &mut report);
        }

        tracing::info!(
            operation_id,
            batches = report.batches,
            synced = report.synced,
            failed = report.failed,
            skipped = report.skipped,
            total = report.total,
            "bulk sync finished"
        );
        BulkSyncOutcome::Completed(report)
    }

    fn flush_bulk_batch(&self, batch: ChangeSet, report: &mut BulkSyncReport) {
        let size = batch.len();
        report.batches += 1;
        match self.replicate(batch) {
            ReplicationOutcome::Replicated(result) => {
                report.synced += result.applied();
                report.failed += result.errors.len();
                report.skipped += result.superseded;
            }
            ReplicationOutcome::Failed { .. } => report.failed += size,
            ReplicationOutcome::Disabled => report.skipped += size,
            ReplicationOutcome::Empty => {}
        }
    }

    /// Stops the background worker after it drains its queue.
    pub fn shutdown(&self) -> EngineResult<()> {
        self.dispatcher.shutdown()
    }
}

impl std::fmt::Debug for Replicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replicator")
            .field("config", &self.config)
            .field("enabled", &self.control.is_enabled())
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::failure::MemoryFailureLog;
    use std::time::Duration;
    use tandem_model::{DynamicRecord, SchemaDescriptor};

    fn registry() -> Arc<EntityRegistry> {
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
        registry
    }

    fn start(target: &MemoryTarget) -> Replicator {
        let config = ReplicationConfig::new("memory://test")
            .with_retry(RetryConfig::new(2).with_base_delay(Duration::from_millis(1)));
        Replicator::start(
            config,
            registry(),
            Arc::new(target.clone()),
            Arc::new(MemoryFailureLog::new()),
        )
        .unwrap()
    }

    fn employees(count: i64) -> Vec<DynamicRecord> {
        (1..=count)
            .map(|id| {
                DynamicRecord::new("employee")
                    .with("id", id)
                    .with("name", format!("emp-{id}"))
            })
            .collect()
    }

    #[test]
    fn unreachable_target_starts_disabled() {
        let target = MemoryTarget::for_registry(&registry());
        target.set_reachable(false);
        let replicator = start(&target);

        assert!(!replicator.is_enabled());
        let stats = replicator.stats();
        assert!(!stats.enabled);
        assert!(!stats.target_reachable);
    }

    #[test]
    fn bulk_sync_batches_and_upserts() {
        let target = MemoryTarget::for_registry(&registry());
        let replicator = start(&target);
        target.seed(
            "employee",
            vec![
                ("id", tandem_model::FieldValue::Integer(1)),
                ("name", tandem_model::FieldValue::from("stale")),
            ]
            .into_iter()
            .collect(),
        );

        let outcome = replicator.bulk_sync("resync", employees(250), 100);
        assert_eq!(
            outcome,
            BulkSyncOutcome::Completed(BulkSyncReport {
                batches: 3,
                synced: 250,
                failed: 0,
                skipped: 0,
                total: 250,
            })
        );
        assert_eq!(target.row_count("employee"), 250);
        assert!(!replicator.control().is_running());
    }

    #[test]
    fn bulk_sync_skips_when_contended_or_disabled() {
        let target = MemoryTarget::for_registry(&registry());
        let replicator = start(&target);

        let _held = replicator.control().register("other").unwrap();
        assert_eq!(
            replicator.bulk_sync("resync", employees(3), 10),
            BulkSyncOutcome::Skipped {
                reason: SkipReason::AlreadyRunning
            }
        );

        replicator.disable();
        assert_eq!(
            replicator.bulk_sync("resync", employees(3), 10),
            BulkSyncOutcome::Skipped {
                reason: SkipReason::Disabled
            }
        );
        assert_eq!(target.row_count("employee"), 0);
    }

    #[test]
    fn bulk_sync_counts_unserializable_records() {
        let target = MemoryTarget::for_registry(&registry());
        let replicator = start(&target);
        let mut records = employees(2);
        records.push(DynamicRecord::new("employee").with("name", "no id"));

        match replicator.bulk_sync("resync", records, 10) {
            BulkSyncOutcome::Completed(report) => {
                assert_eq!(report.synced, 2);
                assert_eq!(report.failed, 1);
                assert_eq!(report.total, 3);
                assert!(report.is_balanced());
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn bulk_sync_accounts_for_duplicate_keys() {
        let target = MemoryTarget::for_registry(&registry());
        let replicator = start(&target);
        let mut records = employees(3);
        records.push(DynamicRecord::new("employee").with("id", 2).with("name", "renamed"));

        match replicator.bulk_sync("resync", records, 10) {
            BulkSyncOutcome::Completed(report) => {
                assert_eq!(report.synced, 4);
                assert_eq!(report.skipped, 0);
                assert_eq!(report.total, 4);
                assert!(report.is_balanced());
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        let row = target.row("employee", &tandem_model::PrimaryKey::from(2)).unwrap();
        assert_eq!(row.get("name"), Some(&tandem_model::FieldValue::from("renamed")));
    }

    #[test]
    fn bulk_sync_skips_batches_after_disable() {
        let target = MemoryTarget::for_registry(&registry());
        let replicator = start(&target);
        let records = employees(4).into_iter().inspect(|record| {
            if record.fields().get("id") == Some(&tandem_model::FieldValue::Integer(3)) {
                replicator.disable();
            }
        });

        match replicator.bulk_sync("resync", records, 2) {
            BulkSyncOutcome::Completed(report) => {
                assert_eq!(report.synced, 2);
                assert_eq!(report.skipped, 2);
                assert!(report.is_balanced());
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(target.row_count("employee"), 2);
    }

    #[test]
    fn manual_replicate_is_skipped_while_disabled() {
        let target = MemoryTarget::for_registry(&registry());
        let replicator = start(&target);
        let snapshotter = Snapshotter::new(Arc::clone(replicator.registry()));
        let changes = ChangeSet::from_snapshots(
            employees(2)
                .iter()
                .map(|r| snapshotter.snapshot(r, Operation::Insert).unwrap()),
        );
        let calls_before = target.network_calls();

        replicator.disable();
        assert_eq!(replicator.replicate(changes), ReplicationOutcome::Disabled);
        assert_eq!(target.network_calls(), calls_before);
        assert_eq!(target.row_count("employee"), 0);
    }

    #[test]
    fn emergency_reset_clears_registrations() {
        let target = MemoryTarget::for_registry(&registry());
        let replicator = start(&target);
        assert!(replicator.control().try_register("stuck"));

        let report = replicator.emergency_reset();
        assert_eq!(report.after.disposals, report.before.disposals + 1);
        assert!(!replicator.control().is_running());
    }

    #[test]
    fn stats_track_batches() {
        let target = MemoryTarget::for_registry(&registry());
        let replicator = start(&target);
        let hooks = replicator.hooks();

        let mut unit = hooks.begin();
        hooks.on_mutation(&mut unit, &employees(1)[0], Operation::Insert);
        assert_eq!(replicator.stats().pending.inserted, 1);
        hooks.on_post_commit(&mut unit);

        let stats = replicator.stats();
        assert_eq!(stats.pending.total(), 0);
        assert_eq!(stats.replayed_batches, 1);
        assert!(stats.target_reachable);
        assert_eq!(stats.pool.size, 10);
    }

    #[test]
    fn connect_resolves_memory_uri() {
        let replicator =
            Replicator::connect(ReplicationConfig::new("memory://hr"), registry()).unwrap();
        assert!(replicator.is_enabled());

        let err = Replicator::connect(ReplicationConfig::new("postgres://db"), registry())
            .unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }
}
