use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use colored::{ColoredString, Colorize};

use crate::features::sync::{
    EntryStatus, ItemOutcome, MedicalRecord, Priority, SyncPassSummary, SyncQueueEntry,
    SyncStatus,
};

fn priority_label(priority: Priority) -> ColoredString {
    match priority.value() {
        1 => priority.to_string().red().bold(),
        2 => priority.to_string().yellow(),
        _ => priority.to_string().normal(),
    }
}

fn status_label(status: EntryStatus) -> ColoredString {
    match status {
        EntryStatus::Queued => status.as_str().white(),
        EntryStatus::InFlight => status.as_str().cyan(),
        EntryStatus::Retrying => status.as_str().yellow(),
        EntryStatus::FailedPermanent => status.as_str().red(),
    }
}

fn relative_age(t: DateTime<Utc>) -> String {
    let age = Utc::now().signed_duration_since(t);
    if age.num_hours() > 0 {
        format!("{} hours ago", age.num_hours())
    } else if age.num_minutes() > 0 {
        format!("{} minutes ago", age.num_minutes())
    } else {
        "just now".to_string()
    }
}

/// Format a list of records as a pretty table
pub fn format_records_pretty(records: &[MedicalRecord], title: &str) -> String {
    if records.is_empty() {
        return format!("{title} (0 records)\n  No records");
    }

    let mut output = format!("{title} ({} records)\n", records.len());
    output.push_str(&"─".repeat(60));
    output.push('\n');

    for record in records {
        let icon = if record.sync_state.synced {
            "[✓]".green()
        } else if record.sync_state.last_error.is_some() {
            "[!]".red()
        } else {
            "[ ]".white()
        };

        let triage = record
            .triage_level
            .map_or_else(|| "untriaged".to_string(), |t| t.to_string());

        let _ = writeln!(
            output,
            "{} {}  {}  {}  {}",
            icon,
            record.id.bold(),
            priority_label(record.sync_state.priority),
            triage.dimmed(),
            record.owner_id.cyan()
        );
    }

    output
}

/// Format a single record as pretty output
pub fn format_record_pretty(record: &MedicalRecord) -> String {
    let state = &record.sync_state;
    let mut output = format!("{}\n", record.id.bold());

    let _ = writeln!(output, "  {}: {}", "Owner".dimmed(), record.owner_id);
    let _ = writeln!(
        output,
        "  {}: {}",
        "Triage".dimmed(),
        record
            .triage_level
            .map_or_else(|| "none".to_string(), |t| t.to_string())
    );
    if record.emergency_actions_present {
        let _ = writeln!(output, "  {}: {}", "Emergency".dimmed(), "yes".red().bold());
    }
    let _ = writeln!(output, "  {}: {}", "Priority".dimmed(), priority_label(state.priority));
    let _ = writeln!(
        output,
        "  {}: {}",
        "Synced".dimmed(),
        if state.synced { "yes".green() } else { "no".yellow() }
    );
    let _ = writeln!(output, "  {}: {}", "Attempts".dimmed(), state.attempts);
    if let Some(at) = state.last_attempt_at {
        let _ = writeln!(
            output,
            "  {}: {}",
            "Last attempt".dimmed(),
            at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    if let Some(error) = &state.last_error {
        let _ = writeln!(output, "  {}: {}", "Last error".dimmed(), error.red());
    }
    let _ = writeln!(output, "  {}: {} bytes", "Payload".dimmed(), record.payload.len());
    let _ = writeln!(
        output,
        "  {}: {}",
        "Created".dimmed(),
        record.created_at.format("%Y-%m-%d %H:%M")
    );

    output
}

/// Format queue entries as pretty output
pub fn format_entries_pretty(entries: &[SyncQueueEntry]) -> String {
    if entries.is_empty() {
        return "No queue entries.".to_string();
    }

    let mut output = format!("Sync Queue ({} entries)\n", entries.len());
    output.push_str(&"─".repeat(60));
    output.push('\n');

    for entry in entries {
        let _ = write!(
            output,
            "{}  {}  {}  {}",
            priority_label(entry.priority),
            status_label(entry.status),
            entry.record_id,
            relative_age(entry.enqueued_at).dimmed()
        );
        if entry.attempts > 0 {
            let _ = write!(output, "  {}", format!("attempts: {}", entry.attempts).dimmed());
        }
        if let Some(error) = &entry.last_error {
            let _ = write!(output, "  {}", error.red());
        }
        output.push('\n');
    }

    output
}

/// Format delivery status as pretty output
pub fn format_status_pretty(status: &SyncStatus) -> String {
    let mut lines = Vec::new();

    lines.push("Sync Status".bold().to_string());
    lines.push("─".repeat(40));

    lines.push(format!(
        "  Pending:    {} {}",
        status.queued_count,
        if status.queued_count > 0 {
            "records waiting".dimmed()
        } else {
            "".dimmed()
        }
    ));
    lines.push(format!(
        "  Urgent:     {}",
        if status.high_priority_count > 0 {
            status.high_priority_count.to_string().red().bold()
        } else {
            status.high_priority_count.to_string().normal()
        }
    ));
    if status.retrying_count > 0 {
        lines.push(format!(
            "  Retrying:   {} {}",
            status.retrying_count,
            "in backoff".dimmed()
        ));
    }
    lines.push(format!(
        "  Failed:     {} {}",
        status.failed_count,
        if status.failed_count > 0 {
            "records need attention".red()
        } else {
            "".normal()
        }
    ));
    lines.push(format!("  Driver:     {}", status.driver_state.as_str()));
    lines.push(format!(
        "  Network:    {}",
        if status.online { "online".green() } else { "offline".yellow() }
    ));

    if let Some(oldest) = status.oldest_pending_at {
        lines.push(format!("  Oldest:     {}", relative_age(oldest).dimmed()));
    }
    if let Some(last) = status.last_sync_at {
        lines.push(format!("  Last sync:  {}", relative_age(last).dimmed()));
    }

    if status.queued_count > 0 {
        lines.push(String::new());
        lines.push(
            "Run 'medsync sync run' to deliver pending records"
                .dimmed()
                .to_string(),
        );
    }

    lines.join("\n")
}

/// Format a pass summary as pretty output
pub fn format_pass_summary_pretty(summary: &SyncPassSummary) -> String {
    if summary.attempted() == 0 {
        return "No pending records to sync.".to_string();
    }

    let mut lines = Vec::new();

    let header = if summary.is_clean() {
        "Sync completed".green().bold()
    } else {
        "Sync completed with errors".yellow().bold()
    };
    lines.push(header.to_string());

    lines.push(format!("  {} {}", summary.succeeded, "delivered".green()));
    if summary.retried > 0 {
        lines.push(format!("  {} {}", summary.retried, "will retry".yellow()));
    }
    if summary.failed_permanent > 0 {
        lines.push(format!("  {} {}", summary.failed_permanent, "failed".red()));
    }
    if summary.orphaned > 0 {
        lines.push(format!(
            "  {} {}",
            summary.orphaned,
            "orphaned queue entries".red().bold()
        ));
    }

    let failures: Vec<_> = summary
        .results
        .iter()
        .filter_map(|r| match &r.outcome {
            ItemOutcome::Retrying { reason, .. } | ItemOutcome::FailedPermanent { reason, .. } => {
                Some(format!("    {}: {}", r.record_id, reason))
            },
            ItemOutcome::Orphaned => Some(format!("    {}: missing record", r.record_id)),
            ItemOutcome::Synced | ItemOutcome::AlreadyResolved => None,
        })
        .collect();
    if !failures.is_empty() {
        lines.push(String::new());
        lines.push("Failures:".red().to_string());
        lines.extend(failures);
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::sync::{NewRecord, PassTrigger, TriageLevel};

    fn make_record(triage: TriageLevel) -> MedicalRecord {
        MedicalRecord::create(NewRecord {
            owner_id: Some("user-1".to_string()),
            payload: vec![0; 16],
            triage_level: Some(triage),
            emergency_actions_present: false,
        })
    }

    #[test]
    fn test_format_records_pretty_empty() {
        let result = format_records_pretty(&[], "Records");
        assert!(result.contains("Records (0 records)"));
        assert!(result.contains("No records"));
    }

    #[test]
    fn test_format_records_pretty() {
        let record = make_record(TriageLevel::Immediate);
        let result = format_records_pretty(std::slice::from_ref(&record), "Records");

        assert!(result.contains("Records (1 records)"));
        assert!(result.contains(&record.id));
        assert!(result.contains("P1"));
        assert!(result.contains("immediate"));
    }

    #[test]
    fn test_format_record_pretty_shows_error() {
        let mut record = make_record(TriageLevel::Minor);
        record.sync_state.attempts = 2;
        record.sync_state.last_error = Some("HTTP 503".to_string());

        let result = format_record_pretty(&record);
        assert!(result.contains("Attempts"));
        assert!(result.contains("HTTP 503"));
        assert!(result.contains("16 bytes"));
    }

    #[test]
    fn test_format_pass_summary_empty() {
        let summary = SyncPassSummary {
            trigger: PassTrigger::Forced,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            succeeded: 0,
            retried: 0,
            failed_permanent: 0,
            orphaned: 0,
            coalesced: false,
            results: Vec::new(),
        };
        assert_eq!(format_pass_summary_pretty(&summary), "No pending records to sync.");
    }
}
