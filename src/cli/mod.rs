//! Command-line interface for medsync.

pub mod args;
pub mod commands;
