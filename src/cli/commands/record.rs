//! Record command implementation.

use std::path::Path;

use crate::cli::args::{OutputFormat, RecordCommands};
use crate::error::SyncError;
use crate::features::sync::{NewRecord, RecordIndex, SyncService, TriageLevel};
use crate::output::{format_record, format_records, to_json};

/// Execute record subcommands.
///
/// # Errors
///
/// Returns an error if input is invalid, the database fails or output
/// formatting fails.
pub fn record(
    service: &SyncService,
    cmd: RecordCommands,
    format: OutputFormat,
) -> Result<String, SyncError> {
    match cmd {
        RecordCommands::Add {
            triage,
            emergency,
            owner,
            payload_file,
        } => add_record(
            service,
            triage.as_deref(),
            emergency,
            owner,
            payload_file.as_deref(),
            format,
        ),
        RecordCommands::Show { id } => {
            let record = service.record(&id)?;
            format_record(&record, format)
        },
        RecordCommands::List {
            owner,
            unsynced,
            limit,
        } => list_records(service, owner, unsynced, limit, format),
    }
}

fn add_record(
    service: &SyncService,
    triage: Option<&str>,
    emergency: bool,
    owner: Option<String>,
    payload_file: Option<&Path>,
    format: OutputFormat,
) -> Result<String, SyncError> {
    let triage_level = triage.map(str::parse::<TriageLevel>).transpose()?;
    let payload = match payload_file {
        Some(path) => std::fs::read(path).map_err(|e| {
            SyncError::InvalidInput(format!("Failed to read payload {}: {e}", path.display()))
        })?,
        None => Vec::new(),
    };

    let id = service.queue_for_sync(NewRecord {
        owner_id: owner,
        payload,
        triage_level,
        emergency_actions_present: emergency,
    })?;
    let record = service.record(&id)?;

    match format {
        OutputFormat::Json => to_json(&record),
        OutputFormat::Pretty => Ok(format!(
            "Queued record {} (priority {})",
            record.id, record.sync_state.priority
        )),
    }
}

fn list_records(
    service: &SyncService,
    owner: Option<String>,
    unsynced: bool,
    limit: usize,
    format: OutputFormat,
) -> Result<String, SyncError> {
    let (mut records, title) = match owner {
        Some(owner) => {
            let mut records = service.records(&RecordIndex::Owner(owner.clone()))?;
            if unsynced {
                records.retain(|r| !r.sync_state.synced);
            }
            (records, format!("Records for {owner}"))
        },
        None if unsynced => (
            service.records(&RecordIndex::Synced(false))?,
            "Unsynced records".to_string(),
        ),
        None => {
            let mut records = service.records(&RecordIndex::Synced(false))?;
            records.extend(service.records(&RecordIndex::Synced(true))?);
            records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
            (records, "Records".to_string())
        },
    };

    records.truncate(limit);
    format_records(&records, &title, format)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::config::SyncConfig;
    use crate::features::sync::{MedicalRecord, RemoteAcceptance, RemoteOutcome};
    use crate::storage::Database;

    struct Offline;

    #[async_trait]
    impl RemoteAcceptance for Offline {
        async fn submit(&self, _record: &MedicalRecord) -> RemoteOutcome {
            RemoteOutcome::RejectedTransient("offline".to_string())
        }
    }

    fn create_test_service() -> SyncService {
        let db = Arc::new(Database::open_in_memory().unwrap());
        SyncService::with_remote(db, Arc::new(Offline), &SyncConfig::default()).unwrap()
    }

    #[test]
    fn test_add_record_rejects_unknown_triage() {
        let service = create_test_service();
        let result = add_record(&service, Some("purple"), false, None, None, OutputFormat::Pretty);
        assert!(matches!(result, Err(SyncError::InvalidInput(_))));
    }

    #[test]
    fn test_add_and_list() {
        let service = create_test_service();
        add_record(
            &service,
            Some("immediate"),
            false,
            Some("patient-1".to_string()),
            None,
            OutputFormat::Pretty,
        )
        .unwrap();
        add_record(&service, None, true, None, None, OutputFormat::Pretty).unwrap();

        let all = list_records(&service, None, false, 50, OutputFormat::Json).unwrap();
        assert!(all.contains("\"count\": 2"));

        let owned = list_records(
            &service,
            Some("patient-1".to_string()),
            true,
            50,
            OutputFormat::Json,
        )
        .unwrap();
        assert!(owned.contains("\"count\": 1"));

        let limited = list_records(&service, None, true, 1, OutputFormat::Json).unwrap();
        assert!(limited.contains("\"count\": 1"));
    }

    #[test]
    fn test_add_reads_payload_file() {
        let service = create_test_service();
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("payload.bin");
        std::fs::write(&path, b"ciphertext").unwrap();

        let json = add_record(
            &service,
            Some("minor"),
            false,
            None,
            Some(&path),
            OutputFormat::Json,
        )
        .unwrap();
        assert!(json.contains("\"payload\": \"Y2lwaGVydGV4dA==\""));
        assert!(json.contains("\"owner_id\": \"anonymous-emergency\""));
    }
}
