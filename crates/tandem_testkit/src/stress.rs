//! Concurrent-writer stress helpers.
//!
//! Runs many primary transactions from several threads against one
//! harness, so replay serialization and pending accounting can be checked
//! under contention.

use crate::fixtures::{employee, TestHarness};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Committed transactions.
    pub committed: usize,
    /// Transactions whose replication did not succeed inline.
    pub failed: usize,
    /// Wall time.
    pub duration: Duration,
}

impl StressTestResult {
    /// Transactions per second.
    pub fn throughput(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            (self.committed + self.failed) as f64 / secs
        } else {
            0.0
        }
    }
}

/// Configuration for a stress run.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Writer threads.
    pub threads: usize,
    /// Transactions per thread.
    pub transactions_per_thread: usize,
    /// Inserts per transaction.
    pub records_per_transaction: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            transactions_per_thread: 25,
            records_per_transaction: 4,
        }
    }
}

/// Commits inserts of distinct employees from several threads.
///
/// Ids are disjoint across threads, so the target must end up with exactly
/// `threads * transactions_per_thread * records_per_transaction` rows.
pub fn concurrent_writers(harness: &TestHarness, config: &StressConfig) -> StressTestResult {
    let committed = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    let per_thread = config.transactions_per_thread * config.records_per_transaction;
    let start = Instant::now();

    thread::scope(|scope| {
        for worker in 0..config.threads {
            let committed = &committed;
            let failed = &failed;
            scope.spawn(move || {
                let base = (worker * per_thread) as i64;
                for tx_index in 0..config.transactions_per_thread {
                    let mut tx = harness.primary.begin();
                    for r in 0..config.records_per_transaction {
                        let id = base + (tx_index * config.records_per_transaction + r) as i64;
                        tx.insert(employee(id, &format!("Worker{worker} Row{id}")));
                    }
                    match tx.commit() {
                        Ok(Some(outcome)) if !outcome.is_success() => {
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(_) => {
                            committed.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(_) => {
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            });
        }
    });

    StressTestResult {
        committed: committed.into_inner(),
        failed: failed.into_inner(),
        duration: start.elapsed(),
    }
}
