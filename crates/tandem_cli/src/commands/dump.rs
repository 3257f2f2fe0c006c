//! Dump command implementation.

use serde::Serialize;
use std::path::Path;
use tandem_engine::{read_failure_log, FailureRecord};

/// Failure record representation for output.
#[derive(Debug, Serialize)]
pub struct FailureInfo<'a> {
    /// Position in the log, starting at 1.
    pub line: usize,
    /// The record.
    #[serde(flatten)]
    pub record: &'a FailureRecord,
}

/// Runs the dump command.
pub fn run(
    path: &Path,
    kind: Option<&str>,
    limit: Option<usize>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err("Failure log not found".into());
    }

    let records = read_failure_log(path)?;
    let selected = select(&records, kind, limit);

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&selected)?);
        }
        _ => {
            print_text_output(&selected);
        }
    }

    Ok(())
}

/// Filters records by entity kind and truncates to `limit`.
pub fn select<'a>(
    records: &'a [FailureRecord],
    kind: Option<&str>,
    limit: Option<usize>,
) -> Vec<FailureInfo<'a>> {
    records
        .iter()
        .enumerate()
        .filter(|(_, r)| kind.map_or(true, |k| r.entity_kind == k))
        .take(limit.unwrap_or(usize::MAX))
        .map(|(index, record)| FailureInfo {
            line: index + 1,
            record,
        })
        .collect()
}

fn print_text_output(records: &[FailureInfo<'_>]) {
    println!(
        "{:>6}  {:<25}  {:<6}  {:<20}  {:<16}  {:>3}  Error",
        "Line", "Timestamp", "Op", "Entity kind", "Key", "Try"
    );
    println!("{}", "-".repeat(100));

    for info in records {
        let r = info.record;
        println!(
            "{:>6}  {:<25}  {:<6}  {:<20}  {:<16}  {:>3}  {}",
            info.line,
            r.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            r.operation,
            r.entity_kind,
            r.primary_key,
            r.attempts,
            r.error
        );
    }

    println!();
    println!("Total: {} records", records.len());
}
