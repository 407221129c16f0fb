//! JSON output formatting for medsync.

use serde::Serialize;
use serde_json::json;

use crate::error::SyncError;
use crate::features::sync::{MedicalRecord, SyncQueueEntry};

/// Format records as JSON
///
/// # Errors
///
/// Returns `SyncError::Json` if JSON serialization fails.
pub fn format_records_json(records: &[MedicalRecord], title: &str) -> Result<String, SyncError> {
    let output = json!({
        "list": title,
        "count": records.len(),
        "items": records
    });
    Ok(serde_json::to_string_pretty(&output)?)
}

/// Format queue entries as JSON
///
/// # Errors
///
/// Returns `SyncError::Json` if JSON serialization fails.
pub fn format_entries_json(entries: &[SyncQueueEntry]) -> Result<String, SyncError> {
    let output = json!({
        "count": entries.len(),
        "items": entries
    });
    Ok(serde_json::to_string_pretty(&output)?)
}

/// Generic JSON formatter for any serializable type
///
/// # Errors
///
/// Returns `SyncError::Json` if JSON serialization fails.
pub fn to_json<T: Serialize>(value: &T) -> Result<String, SyncError> {
    Ok(serde_json::to_string_pretty(value)?)
}
