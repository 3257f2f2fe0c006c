//! Test fixtures and harness helpers.
//!
//! Provides the sample HR schemas (employee, leave request, attendance),
//! record builders, and a [`TestHarness`] wiring a replicator to an
//! in-memory target and an in-memory primary store.

use crate::primary::PrimaryStore;
use chrono::{NaiveDate, NaiveTime};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tandem_engine::{
    FailureSink, JsonLinesFailureLog, MemoryFailureLog, MemoryTarget, ReplicationConfig,
    Replicator, RetryConfig,
};
use tandem_model::{DynamicRecord, EntityRegistry, SchemaDescriptor, TemporalKind};
use tempfile::TempDir;

/// Employee schema: scalar key, one date column.
pub fn employee_schema() -> SchemaDescriptor {
    SchemaDescriptor::builder("employee")
        .fields(["id", "name", "email", "department", "active"])
        .temporal("hired_on", TemporalKind::Date)
        .primary_key(["id"])
        .build()
        .expect("employee schema is valid")
}

/// Leave request schema: scalar key, several temporal columns.
pub fn leave_request_schema() -> SchemaDescriptor {
    SchemaDescriptor::builder("leave_request")
        .fields(["id", "employee_id", "status", "reason"])
        .temporal("start_date", TemporalKind::Date)
        .temporal("end_date", TemporalKind::Date)
        .temporal("created_at", TemporalKind::DateTime)
        .primary_key(["id"])
        .build()
        .expect("leave request schema is valid")
}

/// Attendance schema: composite key over employee and day.
pub fn attendance_schema() -> SchemaDescriptor {
    SchemaDescriptor::builder("attendance")
        .field("employee_id")
        .temporal("day", TemporalKind::Date)
        .temporal("check_in", TemporalKind::Time)
        .field("status")
        .primary_key(["employee_id", "day"])
        .build()
        .expect("attendance schema is valid")
}

/// A registry holding all sample schemas.
pub fn hr_registry() -> Arc<EntityRegistry> {
    let registry = Arc::new(EntityRegistry::new());
    for schema in [employee_schema(), leave_request_schema(), attendance_schema()] {
        registry
            .register_entity_kind(schema)
            .expect("sample schemas do not collide");
    }
    registry
}

/// Builds an employee record.
pub fn employee(id: i64, name: &str) -> DynamicRecord {
    DynamicRecord::new("employee")
        .with("id", id)
        .with("name", name)
        .with("email", format!("{}@example.com", name.to_lowercase().replace(' ', ".")))
        .with("department", "operations")
        .with("active", true)
        .with("hired_on", NaiveDate::from_ymd_opt(2022, 3, 14))
}

/// Builds a leave request record.
pub fn leave_request(id: i64, employee_id: i64, status: &str) -> DynamicRecord {
    DynamicRecord::new("leave_request")
        .with("id", id)
        .with("employee_id", employee_id)
        .with("status", status)
        .with("reason", "annual leave")
        .with("start_date", NaiveDate::from_ymd_opt(2024, 7, 1))
        .with("end_date", NaiveDate::from_ymd_opt(2024, 7, 5))
        .with(
            "created_at",
            NaiveDate::from_ymd_opt(2024, 6, 20).and_then(|d| d.and_hms_opt(9, 30, 0)),
        )
}

/// Builds an attendance record.
pub fn attendance(employee_id: i64, day: NaiveDate, status: &str) -> DynamicRecord {
    DynamicRecord::new("attendance")
        .with("employee_id", employee_id)
        .with("day", day)
        .with("check_in", NaiveTime::from_hms_opt(8, 55, 0))
        .with("status", status)
}

/// Retry configuration with millisecond delays.
pub fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig::new(max_attempts)
        .with_base_delay(Duration::from_millis(1))
        .with_max_delay(Duration::from_millis(10))
}

/// Default harness configuration: in-memory target, fast retries.
pub fn test_config() -> ReplicationConfig {
    ReplicationConfig::new("memory://test").with_retry(fast_retry(3))
}

/// A replicator wired to an in-memory target and primary store.
pub struct TestHarness {
    /// Registered schemas.
    pub registry: Arc<EntityRegistry>,
    /// The secondary store.
    pub target: MemoryTarget,
    /// Failure records, when the harness logs in memory.
    pub failures: Arc<MemoryFailureLog>,
    /// The replication engine.
    pub replicator: Replicator,
    /// The primary store driving the lifecycle hooks.
    pub primary: PrimaryStore,
    failure_log: Option<(TempDir, PathBuf)>,
}

impl TestHarness {
    /// Creates a harness with [`test_config`].
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    /// Creates a harness with the given configuration.
    ///
    /// Counters on the target are reset after startup, so only traffic
    /// caused by the test is observed.
    pub fn with_config(config: ReplicationConfig) -> Self {
        let failures = Arc::new(MemoryFailureLog::new());
        Self::build(config, failures.clone(), failures, None)
    }

    /// Creates a harness whose failures go to a JSON Lines log in a
    /// temporary directory.
    pub fn with_failure_log_file(config: ReplicationConfig) -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let path = dir.path().join("sync_failures.jsonl");
        let log = Arc::new(JsonLinesFailureLog::open(&path).expect("open failure log"));
        Self::build(
            config,
            log,
            Arc::new(MemoryFailureLog::new()),
            Some((dir, path)),
        )
    }

    fn build(
        config: ReplicationConfig,
        sink: Arc<dyn FailureSink>,
        failures: Arc<MemoryFailureLog>,
        failure_log: Option<(TempDir, PathBuf)>,
    ) -> Self {
        let registry = hr_registry();
        let target = MemoryTarget::for_registry(&registry);
        let replicator = Replicator::start(
            config,
            Arc::clone(&registry),
            Arc::new(target.clone()),
            sink,
        )
        .expect("start replicator");
        target.reset_counters();
        let primary = PrimaryStore::new(Arc::clone(&registry), replicator.hooks().clone());

        Self {
            registry,
            target,
            failures,
            replicator,
            primary,
            failure_log,
        }
    }

    /// Returns the JSON Lines failure log path, if file-backed.
    pub fn failure_log_path(&self) -> Option<&std::path::Path> {
        self.failure_log.as_ref().map(|(_, path)| path.as_path())
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs a test with a fresh harness.
///
/// # Example
///
/// ```rust
/// use tandem_testkit::prelude::*;
///
/// with_harness(|h| {
///     let mut tx = h.primary.begin();
///     tx.insert(employee(1, "Ada"));
///     tx.commit().unwrap();
///     assert_eq!(h.target.row_count("employee"), 1);
/// });
/// ```
pub fn with_harness<F, R>(f: F) -> R
where
    F: FnOnce(&TestHarness) -> R,
{
    let harness = TestHarness::new();
    f(&harness)
}
