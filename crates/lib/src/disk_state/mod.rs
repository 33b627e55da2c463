//! Disk state snapshots and the scanner that produces them.
//!
//! A [`DiskState`] records what was observed on disk for one installation at
//! one transaction. States are never mutated; each rescan that observes a
//! change is committed as a new state.

pub mod scanner;
pub mod types;

pub use scanner::{ScanError, ScanOptions, ScanOutput, ScanWarning, ScannedFile, scan_locations};
pub use types::{DiskState, DiskStateEntry};
