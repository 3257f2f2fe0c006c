//! Export command implementation.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tandem_engine::{change_set_from_failures, read_failure_log};

/// Runs the export command.
///
/// Writes the failure records regrouped into inserted/updated/deleted
/// buckets, ready to be fed back through `Replicator::replicate`.
pub fn run(path: &Path, out: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err("Failure log not found".into());
    }

    let records = read_failure_log(path)?;
    let changes = change_set_from_failures(&records);

    if let Some(parent) = out.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut writer = BufWriter::new(File::create(out)?);
    serde_json::to_writer_pretty(&mut writer, &changes)?;
    writer.write_all(b"\n")?;
    writer.flush()?;

    tracing::info!(
        records = records.len(),
        inserted = changes.inserted.len(),
        updated = changes.updated.len(),
        deleted = changes.deleted.len(),
        out = %out.display(),
        "exported change set"
    );
    Ok(())
}
