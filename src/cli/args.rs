use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

#[derive(Parser)]
#[command(name = "medsync")]
#[command(about = "Offline-first sync queue for medical records")]
#[command(long_about = "medsync - offline-first medical record sync

Records are stored locally first and delivered to the remote records
service in order of clinical urgency, with retry and backoff when the
network is unavailable.

QUICK START:
  medsync record add --triage immediate      Capture an urgent record
  medsync sync status                        Show pending work
  medsync sync run                           Deliver pending records now
  medsync sync watch                         Deliver in the background until Ctrl-C

OUTPUT FORMATS:
  --output pretty    Human-readable colored output (default)
  --output json      Machine-readable JSON for scripting

For more information on a specific command, run:
  medsync <command> --help")]
#[command(version, propagate_version = true)]
pub struct Cli {
    /// Output format for command results
    ///
    /// Use 'pretty' for human-readable colored output,
    /// or 'json' for machine-readable output suitable for scripting.
    /// Defaults to `general.default_output` from the config file.
    #[arg(short, long, value_enum, global = true)]
    pub output: Option<OutputFormat>,

    /// Data directory holding config.yaml and medsync.db
    #[arg(long, global = true, env = "MEDSYNC_HOME")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for command results.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable colored output.
    #[default]
    Pretty,
    /// Machine-readable JSON output.
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create and inspect medical records
    ///
    /// Records are persisted locally and queued for delivery in one step,
    /// so they survive crashes and long offline periods.
    ///
    /// # Examples
    ///
    ///   medsync record add --triage immediate --owner patient-17
    ///   medsync record add --triage minor --payload-file sealed.bin
    ///   medsync record list --unsynced
    ///   medsync record show <id>
    #[command(alias = "r")]
    Record(RecordArgs),

    /// Sync queue and delivery
    ///
    /// Inspect the queue, run delivery passes and recover failed records.
    ///
    /// # Examples
    ///
    ///   medsync sync status                 Pending and failed counts
    ///   medsync sync run                    Deliver pending records now
    ///   medsync sync list --status failed   Records needing attention
    ///   medsync sync escalate               Mass-casualty mode: everything urgent
    ///   medsync sync retry --all            Re-arm permanently failed records
    ///   medsync sync watch                  Background delivery until Ctrl-C
    #[command(alias = "s")]
    Sync(SyncArgs),

    /// Generate shell completions
    ///
    /// # Examples
    ///
    ///   medsync completions bash > /etc/bash_completion.d/medsync
    ///   medsync completions zsh > ~/.zfunc/_medsync
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Arguments for record commands.
#[derive(Args)]
pub struct RecordArgs {
    #[command(subcommand)]
    pub command: RecordCommands,
}

/// Record subcommands.
#[derive(Subcommand)]
pub enum RecordCommands {
    /// Create a record and queue it for delivery
    Add {
        /// Triage level (immediate, delayed, minor, expectant)
        #[arg(long, short = 't')]
        triage: Option<String>,

        /// Emergency actions were recommended for this record
        #[arg(long, short = 'e')]
        emergency: bool,

        /// Owner id; omit for anonymous emergency capture
        #[arg(long)]
        owner: Option<String>,

        /// File holding the encrypted payload (stdin is not read)
        #[arg(long, short = 'f')]
        payload_file: Option<PathBuf>,
    },

    /// Show a record and its sync state
    Show {
        /// Record id
        id: String,
    },

    /// List records
    List {
        /// Only records for this owner
        #[arg(long)]
        owner: Option<String>,

        /// Only records not yet delivered
        #[arg(long)]
        unsynced: bool,

        /// Maximum records to show
        #[arg(long, short = 'n', default_value = "50")]
        limit: usize,
    },
}

/// Arguments for sync commands.
#[derive(Args)]
pub struct SyncArgs {
    #[command(subcommand)]
    pub command: SyncCommands,
}

/// Sync subcommands.
#[derive(Subcommand)]
pub enum SyncCommands {
    /// Show delivery status
    ///
    /// Displays pending, urgent and failed counts.
    Status,

    /// Run one delivery pass now
    ///
    /// Delivers every pending record once, ignoring retry backoff.
    Run,

    /// List queue entries
    List {
        /// Filter by status (queued, in-flight, retrying, failed)
        #[arg(long, short = 's')]
        status: Option<String>,

        /// Maximum entries to show
        #[arg(long, short = 'n', default_value = "20")]
        limit: usize,
    },

    /// Raise every pending record to the most urgent priority
    Escalate,

    /// Re-arm permanently failed records
    ///
    /// Failed records get a fresh retry budget and rejoin the queue.
    Retry {
        /// Retry all failed records
        #[arg(long)]
        all: bool,

        /// Specific record id to retry
        id: Option<String>,
    },

    /// Run the background delivery loop until Ctrl-C
    Watch,
}
