//! Sync command implementation.
//!
//! Handles delivery runs, queue inspection and manual recovery.

use colored::Colorize;
use tracing::info;

use crate::cli::args::{OutputFormat, SyncCommands};
use crate::error::SyncError;
use crate::features::sync::{EntryStatus, SyncService};
use crate::output::{format_entries, format_pass_summary, format_status, to_json};

/// Execute sync subcommands.
///
/// # Errors
///
/// Returns an error if the database fails, input is invalid or output
/// formatting fails. Delivery failures are reported in the output instead.
pub async fn sync(
    service: &SyncService,
    cmd: SyncCommands,
    format: OutputFormat,
) -> Result<String, SyncError> {
    match cmd {
        SyncCommands::Status => format_status(&service.get_sync_status()?, format),
        SyncCommands::Run => {
            let summary = service.force_sync().await?;
            format_pass_summary(&summary, format)
        },
        SyncCommands::List { status, limit } => list_entries(service, status.as_deref(), limit, format),
        SyncCommands::Escalate => escalate(service, format),
        SyncCommands::Retry { all, id } => retry_failed(service, all, id.as_deref(), format),
        SyncCommands::Watch => watch(service, format).await,
    }
}

fn list_entries(
    service: &SyncService,
    status: Option<&str>,
    limit: usize,
    format: OutputFormat,
) -> Result<String, SyncError> {
    let status = status
        .map(|s| {
            EntryStatus::parse(s)
                .ok_or_else(|| SyncError::InvalidInput(format!("unknown entry status: {s}")))
        })
        .transpose()?;

    let mut entries = service.queue().entries(status)?;
    entries.truncate(limit);
    format_entries(&entries, format)
}

fn escalate(service: &SyncService, format: OutputFormat) -> Result<String, SyncError> {
    let count = service.emergency_escalate_all()?;

    match format {
        OutputFormat::Json => to_json(&serde_json::json!({ "escalated": count })),
        OutputFormat::Pretty => Ok(format!(
            "{} {} pending records raised to P1",
            "Emergency escalation:".red().bold(),
            count
        )),
    }
}

fn retry_failed(
    service: &SyncService,
    all: bool,
    id: Option<&str>,
    format: OutputFormat,
) -> Result<String, SyncError> {
    let count = if let Some(id) = id {
        if !service.queue().retry_failed(id)? {
            return Err(SyncError::NotFound(format!("failed queue entry for record {id}")));
        }
        1
    } else if all {
        service.queue().retry_all_failed()?
    } else {
        return Err(SyncError::InvalidInput(
            "Specify --all or provide a record id".to_string(),
        ));
    };

    match format {
        OutputFormat::Json => to_json(&serde_json::json!({ "reset": count })),
        OutputFormat::Pretty => Ok(format!("Reset {count} failed records for retry")),
    }
}

async fn watch(service: &SyncService, format: OutputFormat) -> Result<String, SyncError> {
    service.start();
    if format == OutputFormat::Pretty {
        eprintln!("{}", "Delivering in the background, press Ctrl-C to stop".dimmed());
    }

    tokio::signal::ctrl_c().await?;
    info!("interrupt received");
    service.stop().await;

    format_status(&service.get_sync_status()?, format)
}
