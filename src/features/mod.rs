//! Feature implementations for medsync.

pub mod sync;
