//! Bounded retries around batch replay.

use crate::config::RetryConfig;
use crate::failure::{FailureRecord, FailureSink};
use crate::replay::{RecordError, ReplayEngine, ReplayResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tandem_model::ChangeSet;
use uuid::Uuid;

/// Outcome of [`RetryCoordinator::replicate`].
#[derive(Debug, Clone, PartialEq)]
pub enum ReplicationOutcome {
    /// The batch committed (individual records may still have failed).
    Replicated(ReplayResult),
    /// Every attempt failed; the batch was written to the failure log.
    Failed {
        /// Attempts made.
        attempts: u32,
        /// Last error observed.
        error: String,
    },
    /// Nothing to replicate.
    Empty,
    /// Replication was disabled; the batch was dropped without contacting
    /// the target.
    Disabled,
}

impl ReplicationOutcome {
    /// Returns true if the batch committed without record errors.
    pub fn is_success(&self) -> bool {
        match self {
            ReplicationOutcome::Replicated(result) => result.is_success(),
            ReplicationOutcome::Empty => true,
            ReplicationOutcome::Failed { .. } | ReplicationOutcome::Disabled => false,
        }
    }
}

/// Counters kept by the coordinator.
#[derive(Debug, Default)]
pub struct ReplicationCounters {
    replayed: AtomicU64,
    failed: AtomicU64,
    record_failures: AtomicU64,
}

impl ReplicationCounters {
    /// Batches that committed.
    pub fn replayed_batches(&self) -> u64 {
        self.replayed.load(Ordering::SeqCst)
    }

    /// Batches that exhausted their retries.
    pub fn failed_batches(&self) -> u64 {
        self.failed.load(Ordering::SeqCst)
    }

    /// Records that failed individually inside committed batches.
    pub fn record_failures(&self) -> u64 {
        self.record_failures.load(Ordering::SeqCst)
    }
}

/// Wraps [`ReplayEngine::replay`] with bounded retries and terminal
/// failure logging.
///
/// `replicate` never returns an error; everything that could not be
/// applied is written to the failure sink.
pub struct RetryCoordinator {
    engine: Arc<ReplayEngine>,
    retry: RetryConfig,
    sink: Arc<dyn FailureSink>,
    counters: ReplicationCounters,
}

impl RetryCoordinator {
    /// Creates a coordinator.
    pub fn new(engine: Arc<ReplayEngine>, retry: RetryConfig, sink: Arc<dyn FailureSink>) -> Self {
        Self {
            engine,
            retry,
            sink,
            counters: ReplicationCounters::default(),
        }
    }

    /// Returns the replay engine.
    pub fn engine(&self) -> &Arc<ReplayEngine> {
        &self.engine
    }

    /// Returns the counters.
    pub fn counters(&self) -> &ReplicationCounters {
        &self.counters
    }

    /// Replicates one batch.
    pub fn replicate(&self, changes: ChangeSet) -> ReplicationOutcome {
        if changes.is_empty() {
            return ReplicationOutcome::Empty;
        }

        let batch_id = Uuid::new_v4();
        let max_attempts = self.retry.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                let delay = self.retry.delay_for_attempt(attempt);
                tracing::info!(%batch_id, attempt, ?delay, "retrying batch");
                std::thread::sleep(delay);
            }

            match self.engine.replay(&changes) {
                Ok(result) => {
                    self.counters.replayed.fetch_add(1, Ordering::SeqCst);
                    if !result.is_success() {
                        self.log_record_errors(batch_id, &result.errors, attempt);
                    }
                    return ReplicationOutcome::Replicated(result);
                }
                Err(e) => {
                    tracing::warn!(
                        %batch_id,
                        attempt,
                        max_attempts,
                        error = %e,
                        "batch replay failed"
                    );
                    last_error = e.to_string();
                    if !e.is_retryable() {
                        return self.fail(batch_id, &changes, attempt, last_error);
                    }
                }
            }
        }

        self.fail(batch_id, &changes, max_attempts, last_error)
    }

    fn fail(
        &self,
        batch_id: Uuid,
        changes: &ChangeSet,
        attempts: u32,
        error: String,
    ) -> ReplicationOutcome {
        self.counters.failed.fetch_add(1, Ordering::SeqCst);
        tracing::error!(
            target: "tandem::failure",
            %batch_id,
            attempts,
            snapshots = changes.len(),
            error = %error,
            "SYNC FAILURE: batch abandoned"
        );
        for snapshot in changes.capture_order() {
            self.write(&FailureRecord::from_snapshot(
                batch_id,
                snapshot,
                error.clone(),
                attempts,
            ));
        }
        ReplicationOutcome::Failed { attempts, error }
    }

    fn log_record_errors(&self, batch_id: Uuid, errors: &[RecordError], attempts: u32) {
        for failure in errors {
            self.counters.record_failures.fetch_add(1, Ordering::SeqCst);
            tracing::error!(
                target: "tandem::failure",
                %batch_id,
                entity_kind = failure.entity_kind(),
                primary_key = %failure.primary_key(),
                operation = %failure.operation(),
                error = %failure.error,
                "SYNC FAILURE: record rejected"
            );
            self.write(&FailureRecord::from_snapshot(
                batch_id,
                &failure.snapshot,
                failure.error.clone(),
                attempts,
            ));
        }
    }

    fn write(&self, record: &FailureRecord) {
        if let Err(e) = self.sink.record(record) {
            tracing::error!(
                target: "tandem::failure",
                error = %e,
                entity_kind = %record.entity_kind,
                primary_key = %record.primary_key,
                "could not persist failure record"
            );
        }
    }
}

impl std::fmt::Debug for RetryCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryCoordinator")
            .field("retry", &self.retry)
            .field("counters", &self.counters)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failure::MemoryFailureLog;
    use crate::memory::MemoryTarget;
    use crate::session::TargetSessionManager;
    use crate::target::SessionOptions;
    use std::time::Duration;
    use tandem_model::{
        EntityRegistry, EntitySnapshot, FieldMap, FieldValue, Operation, PrimaryKey,
        SchemaDescriptor,
    };

    struct Fixture {
        target: MemoryTarget,
        log: Arc<MemoryFailureLog>,
        coordinator: RetryCoordinator,
    }

    fn fixture(max_attempts: u32) -> Fixture {
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
        let log = Arc::new(MemoryFailureLog::new());
        let coordinator = RetryCoordinator::new(
            Arc::new(ReplayEngine::new(registry, sessions)),
            RetryConfig::new(max_attempts).with_base_delay(Duration::from_millis(1)),
            log.clone(),
        );
        Fixture {
            target,
            log,
            coordinator,
        }
    }

    fn batch() -> ChangeSet {
        let snaps = (1..=2).map(|id| {
            let fields: FieldMap = vec![
                ("id", FieldValue::Integer(id)),
                ("name", FieldValue::from(format!("emp-{id}"))),
            ]
            .into_iter()
            .collect();
            EntitySnapshot::from_parts("employee", fields, PrimaryKey::from(id), Operation::Insert)
        });
        ChangeSet::from_snapshots(snaps)
    }

    #[test]
    fn transient_failures_are_retried() {
        let f = fixture(3);
        f.target.fail_next_begins(2);

        let outcome = f.coordinator.replicate(batch());
        assert!(outcome.is_success());
        assert_eq!(f.target.row_count("employee"), 2);
        assert!(f.log.is_empty());
        assert_eq!(f.coordinator.counters().replayed_batches(), 1);
    }

    #[test]
    fn exhausted_retries_log_every_snapshot_once() {
        let f = fixture(3);
        f.target.set_reachable(false);

        let outcome = f.coordinator.replicate(batch());
        assert!(matches!(outcome, ReplicationOutcome::Failed { attempts: 3, .. }));

        let records = f.log.records();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.batch_id == records[0].batch_id));
        assert!(records.iter().all(|r| r.attempts == 3));
        assert_eq!(
            records[0].field_snapshot.get("name"),
            Some(&FieldValue::from("emp-1"))
        );
        assert_eq!(f.coordinator.counters().failed_batches(), 1);
        // one begin per attempt
        assert_eq!(f.target.network_calls(), 3);
    }

    #[test]
    fn record_errors_are_logged_without_retry() {
        let f = fixture(3);
        f.target.reject_writes("employee");

        let outcome = f.coordinator.replicate(batch());
        match outcome {
            ReplicationOutcome::Replicated(result) => assert_eq!(result.errors.len(), 2),
            other => panic!("expected committed batch, got {other:?}"),
        }
        assert_eq!(f.log.len(), 2);
        assert_eq!(f.coordinator.counters().record_failures(), 2);
        assert_eq!(f.target.commits(), 1);
    }

    #[test]
    fn empty_batch_is_a_no_op() {
        let f = fixture(3);
        assert_eq!(f.coordinator.replicate(ChangeSet::new()), ReplicationOutcome::Empty);
        assert_eq!(f.target.network_calls(), 0);
    }
}
