//! Command implementations for medsync.
//!
//! Each command returns the text to print; `main` owns stdout.

mod record;
mod sync;

use std::io::Write;

use clap::CommandFactory;

pub use record::record;
pub use sync::sync;

use crate::cli::args::Cli;
use crate::error::SyncError;

/// Execute completions command
///
/// # Errors
///
/// Returns an error if writing the script to stdout fails.
pub fn completions(shell: clap_complete::Shell) -> Result<String, SyncError> {
    let mut cmd = Cli::command();
    let mut buf = Vec::new();
    clap_complete::generate(shell, &mut cmd, "medsync", &mut buf);
    std::io::stdout().write_all(&buf)?;
    Ok(String::new())
}
