//! medsync - offline-first sync engine for medical records
//!
//! Records created on a disconnected client are persisted locally together
//! with a sync queue entry, prioritised by clinical urgency, and delivered
//! to a remote store by a background driver with retry and backoff.

#![deny(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod error;
pub mod features;
pub mod output;
pub mod storage;

pub use cli::args::{Cli, Commands, OutputFormat};
pub use error::SyncError;
pub use features::sync::SyncService;
