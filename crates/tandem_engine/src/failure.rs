//! Durable failure trail.
//!
//! Every snapshot that could not be replicated ends up here as one
//! [`FailureRecord`]. The JSON Lines log is the recovery interface: the CLI
//! reads it back and regroups it into change sets for manual replay.

use crate::error::EngineResult;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tandem_model::{ChangeSet, EntitySnapshot, FieldMap, Operation, PrimaryKey};
use uuid::Uuid;

/// One permanently failed replication of one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// When the failure was recorded.
    pub timestamp: DateTime<Utc>,
    /// Batch the record belonged to.
    pub batch_id: Uuid,
    /// Operation that failed.
    pub operation: Operation,
    /// Entity kind.
    pub entity_kind: String,
    /// Primary key.
    pub primary_key: PrimaryKey,
    /// Every captured field.
    pub field_snapshot: FieldMap,
    /// Last error observed.
    pub error: String,
    /// Attempts made for the batch.
    pub attempts: u32,
}

impl FailureRecord {
    /// Builds a record from a snapshot.
    pub fn from_snapshot(
        batch_id: Uuid,
        snapshot: &EntitySnapshot,
        error: impl Into<String>,
        attempts: u32,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            batch_id,
            operation: snapshot.operation(),
            entity_kind: snapshot.entity_kind().to_string(),
            primary_key: snapshot.primary_key().clone(),
            field_snapshot: snapshot.fields().clone(),
            error: error.into(),
            attempts,
        }
    }

    /// Rebuilds the snapshot this record was made from.
    pub fn to_snapshot(&self) -> EntitySnapshot {
        EntitySnapshot::from_parts(
            self.entity_kind.clone(),
            self.field_snapshot.clone(),
            self.primary_key.clone(),
            self.operation,
        )
    }
}

/// Destination for failure records.
pub trait FailureSink: Send + Sync {
    /// Persists one record.
    fn record(&self, failure: &FailureRecord) -> EngineResult<()>;
}

/// Append-only JSON Lines failure log.
#[derive(Debug)]
pub struct JsonLinesFailureLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonLinesFailureLog {
    /// Opens (creating if needed) a log for appending.
    pub fn open<P: AsRef<Path>>(path: P) -> EngineResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Returns the log path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FailureSink for JsonLinesFailureLog {
    fn record(&self, failure: &FailureRecord) -> EngineResult<()> {
        let mut line = serde_json::to_vec(failure)?;
        line.push(b'\n');

        let mut file = self.file.lock();
        file.write_all(&line)?;
        file.flush()?;
        Ok(())
    }
}

/// Failure sink that keeps records in memory.
#[derive(Debug, Default)]
pub struct MemoryFailureLog {
    records: Mutex<Vec<FailureRecord>>,
}

impl MemoryFailureLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of all records.
    pub fn records(&self) -> Vec<FailureRecord> {
        self.records.lock().clone()
    }

    /// Returns the number of records.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns true if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl FailureSink for MemoryFailureLog {
    fn record(&self, failure: &FailureRecord) -> EngineResult<()> {
        self.records.lock().push(failure.clone());
        Ok(())
    }
}

/// Failure sink that only emits `tracing` events.
///
/// Used when no failure log path is configured; the full record is
/// rendered as JSON on the `tandem::failure` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingFailureLog;

impl FailureSink for TracingFailureLog {
    fn record(&self, failure: &FailureRecord) -> EngineResult<()> {
        let record = serde_json::to_string(failure)?;
        tracing::error!(target: "tandem::failure", %record, "SYNC FAILURE record");
        Ok(())
    }
}

/// Regroups failure records into a change set for manual replay.
///
/// Records keep their log order, so capture sequence follows the log.
pub fn change_set_from_failures(records: &[FailureRecord]) -> ChangeSet {
    ChangeSet::from_snapshots(records.iter().map(FailureRecord::to_snapshot))
}

/// Reads a JSON Lines failure log.
///
/// Blank lines are skipped. A final line that does not parse (a write torn
/// by a crash) is ignored with a warning; malformed lines elsewhere are
/// errors.
pub fn read_failure_log<P: AsRef<Path>>(path: P) -> EngineResult<Vec<FailureRecord>> {
    let reader = BufReader::new(File::open(path.as_ref())?);
    let lines: Vec<String> = reader.lines().collect::<Result<_, _>>()?;
    let last = lines.iter().rposition(|l| !l.trim().is_empty());

    let mut records = Vec::with_capacity(lines.len());
    for (index, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(record) => records.push(record),
            Err(e) if Some(index) == last => {
                tracing::warn!(
                    line = index + 1,
                    error = %e,
                    "ignoring torn final line in failure log"
                );
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(records)
}
