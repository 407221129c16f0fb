//! Storage layer for medsync.
//!
//! This module provides SQLite-based persistence for:
//! - Medical records and their sync metadata
//! - The sync queue

mod database;
mod migrations;
pub mod timestamp;

pub use database::Database;
