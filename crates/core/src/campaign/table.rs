//! Persisted work-item table.
//!
//! The table is a plain-text JSON Lines file, one row per work item. The
//! only durability primitive is the whole-file atomic rewrite: rows are
//! never updated in place, the full table is written to a temporary file
//! and swapped over the old one so a concurrent reader can never observe a
//! partial write.

use std::fs;
use std::path::Path;

use serde_json::Value;

use super::store::CampaignError;
use super::types::WorkItem;

/// Loads the full table from `path`.
///
/// Returns the rows plus a flag telling the caller whether the one-time
/// schema migration fired: rows written before the `end` field existed are
/// upgraded in memory and must be rewritten immediately. The migration is
/// idempotent and applies on every load until the file carries the field.
pub fn load_table(path: &Path) -> Result<(Vec<WorkItem>, bool), CampaignError> {
    let raw = fs::read_to_string(path).map_err(|e| {
        CampaignError::CorruptStore(format!("cannot read table {}: {}", path.display(), e))
    })?;

    let mut items = Vec::new();
    let mut migrated = false;

    for (lineno, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let row: Value = serde_json::from_str(line).map_err(|e| {
            CampaignError::CorruptStore(format!(
                "unparsable table row {} line {}: {}",
                path.display(),
                lineno + 1,
                e
            ))
        })?;
        if row.get("end").is_none() {
            migrated = true;
        }
        let item: WorkItem = serde_json::from_value(row).map_err(|e| {
            CampaignError::CorruptStore(format!(
                "invalid table row {} line {}: {}",
                path.display(),
                lineno + 1,
                e
            ))
        })?;
        items.push(item);
    }

    Ok((items, migrated))
}

/// Atomically replaces the table file with the given rows.
pub fn rewrite_table(path: &Path, items: &[WorkItem]) -> Result<(), CampaignError> {
    let mut buf = String::new();
    for item in items {
        let line = serde_json::to_string(item).map_err(|e| {
            CampaignError::CorruptStore(format!("cannot encode table row: {}", e))
        })?;
        buf.push_str(&line);
        buf.push('\n');
    }

    let tmp = path.with_extension("jsonl.tmp");
    fs::write(&tmp, buf)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
