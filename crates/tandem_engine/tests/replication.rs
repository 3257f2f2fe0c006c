//! End-to-end replication through the primary store's transaction wrapper.

use std::sync::{Arc, Barrier};
use std::thread;
use tandem_engine::{
    change_set_from_failures, read_failure_log, BulkSyncOutcome, DispatchMode, ReplicationOutcome,
    SkipReason,
};
use tandem_model::{ChangeSet, FieldMap, FieldValue, Operation, PrimaryKey, Snapshotter};
use tandem_testkit::prelude::*;

fn name_of(h: &TestHarness, id: i64) -> Option<String> {
    h.target
        .row("employee", &PrimaryKey::from(id))
        .and_then(|row| row.get("name").and_then(|v| v.as_text().map(str::to_string)))
}

#[test]
fn insert_then_update_in_one_transaction_keeps_the_update() {
    let h = TestHarness::new();
    let mut tx = h.primary.begin();
    tx.insert(employee(1, "Ada"));
    tx.update(employee(1, "Ada Lovelace"));
    let outcome = tx.commit().unwrap();

    assert!(matches!(outcome, Some(ReplicationOutcome::Replicated(_))));
    assert_eq!(name_of(&h, 1).as_deref(), Some("Ada Lovelace"));
    assert_eq!(h.target.row_count("employee"), 1);
}

#[test]
fn temporal_columns_arrive_as_native_values() {
    let h = TestHarness::new();
    let mut tx = h.primary.begin();
    tx.insert(leave_request(7, 1, "approved"));
    tx.commit().unwrap();

    let row = h.target.row("leave_request", &PrimaryKey::from(7)).unwrap();
    assert_eq!(
        row.get("start_date"),
        Some(&FieldValue::from(chrono::NaiveDate::from_ymd_opt(2024, 7, 1)))
    );
    assert!(row.get("created_at").is_some_and(FieldValue::is_temporal));
}

#[test]
fn composite_keys_replicate() {
    let h = TestHarness::new();
    let day = chrono::NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
    let mut tx = h.primary.begin();
    tx.insert(attendance(1, day, "present"));
    tx.insert(attendance(2, day, "absent"));
    tx.commit().unwrap();

    let mut tx = h.primary.begin();
    tx.update(attendance(1, day, "late"));
    tx.delete(attendance(2, day, "absent"));
    tx.commit().unwrap();

    let rows = h.target.rows("attendance");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("status"), Some(&FieldValue::from("late")));
}

#[test]
fn disabled_replication_makes_no_target_calls() {
    let h = TestHarness::new();
    h.replicator.disable();

    let mut tx = h.primary.begin();
    for id in 0..10 {
        tx.insert(employee(id, "Quiet"));
    }
    assert_eq!(tx.commit().unwrap(), None);

    assert_eq!(h.primary.count("employee"), 10);
    assert_eq!(h.target.network_calls(), 0);
    assert_eq!(h.target.row_count("employee"), 0);
    assert!(h.failures.is_empty());
}

#[test]
fn disabled_replication_ignores_manual_batches() {
    let h = TestHarness::new();
    let snapshotter = Snapshotter::new(Arc::clone(&h.registry));
    let batch = ChangeSet::from_snapshots(
        [employee(1, "Ada"), employee(2, "Grace")]
            .iter()
            .map(|r| snapshotter.snapshot(r, Operation::Insert).unwrap()),
    );
    h.replicator.disable();

    assert_eq!(h.replicator.replicate(batch), ReplicationOutcome::Disabled);
    assert_eq!(
        h.replicator.bulk_sync("nightly", (0..3).map(|id| employee(id, "Bulk")), 2),
        BulkSyncOutcome::Skipped {
            reason: SkipReason::Disabled
        }
    );
    assert_eq!(h.target.network_calls(), 0);
    assert!(h.failures.is_empty());
}

#[test]
fn unreachable_target_records_one_failure_per_snapshot() {
    let h = TestHarness::new();
    h.target.set_reachable(false);

    let mut tx = h.primary.begin();
    tx.insert(employee(1, "Ada"));
    tx.insert(employee(2, "Grace"));
    tx.delete(employee(3, "Gone"));
    let outcome = tx.commit().unwrap();

    match outcome {
        Some(ReplicationOutcome::Failed { attempts, .. }) => assert_eq!(attempts, 3),
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(h.target.network_calls(), 3);
    assert_eq!(h.primary.count("employee"), 2);

    let failures = h.failures.records();
    assert_eq!(failures.len(), 3);
    assert!(failures.iter().all(|f| f.batch_id == failures[0].batch_id));
    assert!(failures.iter().all(|f| f.attempts == 3));
}

#[test]
fn failure_log_replays_after_target_recovers() {
    let h = TestHarness::with_failure_log_file(test_config());
    h.target.set_reachable(false);

    let mut tx = h.primary.begin();
    tx.insert(employee(1, "Ada"));
    tx.update(employee(1, "Ada King"));
    tx.update(employee(2, "Grace"));
    tx.commit().unwrap();

    let path = h.failure_log_path().unwrap();
    let records = read_failure_log(path).unwrap();
    assert_eq!(records.len(), 3);

    h.target.set_reachable(true);
    let outcome = h.replicator.replicate(change_set_from_failures(&records));
    assert!(outcome.is_success());
    assert_eq!(name_of(&h, 1).as_deref(), Some("Ada King"));
    assert_eq!(name_of(&h, 2).as_deref(), Some("Grace"));
}

#[test]
fn insert_of_existing_row_becomes_update() {
    let h = TestHarness::new();
    let existing: FieldMap = vec![
        ("id", FieldValue::Integer(1)),
        ("name", FieldValue::from("Stale")),
    ]
    .into_iter()
    .collect();
    h.target.seed("employee", existing);

    let mut tx = h.primary.begin();
    tx.insert(employee(1, "Fresh"));
    match tx.commit().unwrap() {
        Some(ReplicationOutcome::Replicated(result)) => {
            assert_eq!(result.conflicts_resolved, 1);
            assert_eq!(result.updated, 1);
        }
        other => panic!("expected replication, got {other:?}"),
    }
    assert_eq!(name_of(&h, 1).as_deref(), Some("Fresh"));
}

#[test]
fn rollback_discards_everything() {
    let h = TestHarness::new();
    let mut tx = h.primary.begin();
    tx.insert(employee(1, "Ada"));
    tx.update(employee(2, "Grace"));
    tx.rollback();

    assert_eq!(h.target.network_calls(), 0);
    assert_eq!(h.replicator.stats().pending.total(), 0);
}

#[test]
fn one_bad_record_does_not_block_the_rest() {
    let h = TestHarness::new();
    h.target.add_unique("employee", "email");

    let mut tx = h.primary.begin();
    tx.insert(employee(1, "Ada"));
    tx.insert(employee(2, "Ada"));
    tx.insert(employee(3, "Grace"));
    let result = match tx.commit().unwrap() {
        Some(ReplicationOutcome::Replicated(result)) => result,
        other => panic!("expected replication, got {other:?}"),
    };

    assert_eq!(result.inserted, 2);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(h.target.row_count("employee"), 2);
    assert_eq!(h.failures.len(), 1);
}

#[test]
fn only_one_bulk_operation_registers() {
    let h = TestHarness::new();
    let control = h.replicator.control().clone();
    let barrier = Arc::new(Barrier::new(8));

    let winners: usize = (0..8)
        .map(|_| {
            let control = control.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                usize::from(control.try_register("bulk"))
            })
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .sum();

    assert_eq!(winners, 1);
    assert!(control.is_running());
}

#[test]
fn bulk_sync_is_skipped_while_another_runs() {
    let h = TestHarness::new();
    let _held = h.replicator.control().register("manual").unwrap();

    let outcome = h
        .replicator
        .bulk_sync("nightly", (0..5).map(|id| employee(id, "Bulk")), 2);
    assert_eq!(
        outcome,
        BulkSyncOutcome::Skipped {
            reason: SkipReason::AlreadyRunning
        }
    );
    assert_eq!(h.target.network_calls(), 0);
}

#[test]
fn bulk_sync_overwrites_existing_rows() {
    let h = TestHarness::new();
    let mut tx = h.primary.begin();
    tx.insert(employee(1, "Old"));
    tx.commit().unwrap();

    let records = (0..5).map(|id| employee(id, "Bulk"));
    let BulkSyncOutcome::Completed(report) = h.replicator.bulk_sync("nightly", records, 2) else {
        panic!("bulk sync skipped");
    };

    assert_eq!(report.batches, 3);
    assert_eq!(report.synced, 5);
    assert_eq!(report.failed, 0);
    assert_eq!(name_of(&h, 1).as_deref(), Some("Bulk"));
    assert!(!h.replicator.control().is_running());
}

#[test]
fn background_dispatch_replicates_off_thread() {
    let h = TestHarness::with_config(test_config().with_dispatch(DispatchMode::Background));

    for id in 0..5 {
        let mut tx = h.primary.begin();
        tx.insert(employee(id, "Async"));
        assert_eq!(tx.commit().unwrap(), None);
    }
    h.replicator.shutdown().unwrap();

    assert_eq!(h.target.row_count("employee"), 5);
    assert_eq!(h.replicator.stats().pending.total(), 0);
}

#[test]
fn emergency_reset_releases_registrations() {
    let h = TestHarness::new();
    let guard = h.replicator.control().register("stuck");
    assert!(guard.is_some());
    std::mem::forget(guard);

    let report = h.replicator.emergency_reset();
    assert_eq!(report.after.checked_out, 0);
    assert!(!h.replicator.control().is_running());
}
