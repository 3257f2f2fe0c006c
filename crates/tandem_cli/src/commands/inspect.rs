//! Inspect command implementation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tandem_engine::{read_failure_log, FailureRecord};
use tandem_model::Operation;

/// Failure log summary.
#[derive(Debug, Default, Serialize)]
pub struct InspectResult {
    /// Log path.
    pub path: String,
    /// Number of failure records.
    pub total: usize,
    /// Distinct batches.
    pub batches: usize,
    /// Oldest record.
    pub first: Option<DateTime<Utc>>,
    /// Newest record.
    pub last: Option<DateTime<Utc>>,
    /// Per entity kind totals.
    pub kinds: BTreeMap<String, KindStats>,
}

/// Failures of one entity kind.
#[derive(Debug, Default, Serialize, PartialEq, Eq)]
pub struct KindStats {
    /// Failed inserts.
    pub inserted: usize,
    /// Failed updates.
    pub updated: usize,
    /// Failed deletes.
    pub deleted: usize,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No failure log found at {:?}", path).into());
    }
    let records = read_failure_log(path)?;
    let mut result = summarize(&records);
    result.path = path.display().to_string();

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }
    Ok(())
}

/// Builds the summary of a set of failure records.
pub fn summarize(records: &[FailureRecord]) -> InspectResult {
    let mut result = InspectResult {
        total: records.len(),
        ..InspectResult::default()
    };
    let mut batches = BTreeSet::new();

    for record in records {
        batches.insert(record.batch_id);
        result.first = Some(result.first.map_or(record.timestamp, |t| t.min(record.timestamp)));
        result.last = Some(result.last.map_or(record.timestamp, |t| t.max(record.timestamp)));

        let stats = result.kinds.entry(record.entity_kind.clone()).or_default();
        match record.operation {
            Operation::Insert => stats.inserted += 1,
            Operation::Update => stats.updated += 1,
            Operation::Delete => stats.deleted += 1,
        }
    }
    result.batches = batches.len();
    result
}

fn print_text_output(result: &InspectResult) {
    println!("Failure log: {}", result.path);
    println!();
    println!("Records:  {}", result.total);
    println!("Batches:  {}", result.batches);
    if let (Some(first), Some(last)) = (result.first, result.last) {
        println!("First:    {}", first.to_rfc3339());
        println!("Last:     {}", last.to_rfc3339());
    }

    if !result.kinds.is_empty() {
        println!();
        println!("{:<24} {:>8} {:>8} {:>8}", "Entity kind", "Insert", "Update", "Delete");
        println!("{}", "-".repeat(51));
        for (kind, stats) in &result.kinds {
            println!(
                "{:<24} {:>8} {:>8} {:>8}",
                kind, stats.inserted, stats.updated, stats.deleted
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_model::{EntitySnapshot, FieldMap, PrimaryKey};
    use uuid::Uuid;

    fn batch(snapshots: &[EntitySnapshot]) -> Vec<FailureRecord> {
        let batch_id = Uuid::new_v4();
        snapshots
            .iter()
            .map(|s| FailureRecord::from_snapshot(batch_id, s, "target unreachable", 3))
            .collect()
    }

    fn snapshot(kind: &str, id: i64, operation: Operation) -> EntitySnapshot {
        EntitySnapshot::from_parts(kind, FieldMap::new(), PrimaryKey::from(id), operation)
    }

    #[test]
    fn summary_counts_per_kind_and_batch() {
        let mut records = batch(&[
            snapshot("employee", 1, Operation::Insert),
            snapshot("employee", 2, Operation::Delete),
        ]);
        records.extend(batch(&[snapshot("leave_request", 9, Operation::Update)]));

        let summary = summarize(&records);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.batches, 2);
        assert_eq!(
            summary.kinds["employee"],
            KindStats {
                inserted: 1,
                updated: 0,
                deleted: 1
            }
        );
        assert_eq!(summary.kinds["leave_request"].updated, 1);
        assert!(summary.first <= summary.last);
    }

    #[test]
    fn empty_log_has_no_range() {
        let summary = summarize(&[]);
        assert_eq!(summary.total, 0);
        assert!(summary.first.is_none());
    }
}
