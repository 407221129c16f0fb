//! Configuration management for medsync.
//!
//! This module handles loading and saving configuration from `~/.medsync/`.

mod paths;
mod settings;

pub use paths::{Paths, HOME_ENV};
pub use settings::{Config, GeneralConfig, RemoteConfig, SyncConfig};
