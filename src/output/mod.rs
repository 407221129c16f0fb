//! Output formatting for medsync.
//!
//! This module renders records, queue entries and sync results either as
//! colored text or as JSON.

mod json;
mod pretty;

use crate::cli::args::OutputFormat;
use crate::error::SyncError;
use crate::features::sync::{MedicalRecord, SyncPassSummary, SyncQueueEntry, SyncStatus};

pub use json::*;
pub use pretty::*;

/// Format records based on output format
///
/// # Errors
///
/// Returns `SyncError::Json` if JSON serialization fails.
pub fn format_records(
    records: &[MedicalRecord],
    title: &str,
    format: OutputFormat,
) -> Result<String, SyncError> {
    match format {
        OutputFormat::Pretty => Ok(format_records_pretty(records, title)),
        OutputFormat::Json => format_records_json(records, title),
    }
}

/// Format a single record based on output format
///
/// # Errors
///
/// Returns `SyncError::Json` if JSON serialization fails.
pub fn format_record(record: &MedicalRecord, format: OutputFormat) -> Result<String, SyncError> {
    match format {
        OutputFormat::Pretty => Ok(format_record_pretty(record)),
        OutputFormat::Json => to_json(record),
    }
}

/// Format queue entries based on output format
///
/// # Errors
///
/// Returns `SyncError::Json` if JSON serialization fails.
pub fn format_entries(entries: &[SyncQueueEntry], format: OutputFormat) -> Result<String, SyncError> {
    match format {
        OutputFormat::Pretty => Ok(format_entries_pretty(entries)),
        OutputFormat::Json => format_entries_json(entries),
    }
}

/// Format delivery status based on output format
///
/// # Errors
///
/// Returns `SyncError::Json` if JSON serialization fails.
pub fn format_status(status: &SyncStatus, format: OutputFormat) -> Result<String, SyncError> {
    match format {
        OutputFormat::Pretty => Ok(format_status_pretty(status)),
        OutputFormat::Json => to_json(status),
    }
}

/// Format a pass summary based on output format
///
/// # Errors
///
/// Returns `SyncError::Json` if JSON serialization fails.
pub fn format_pass_summary(
    summary: &SyncPassSummary,
    format: OutputFormat,
) -> Result<String, SyncError> {
    match format {
        OutputFormat::Pretty => Ok(format_pass_summary_pretty(summary)),
        OutputFormat::Json => to_json(summary),
    }
}
