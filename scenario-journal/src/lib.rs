//! # scenario-journal
//!
//! Append-only journal of conversation history changes.
//!
//! This crate provides:
//! - Per-record checksums for corruption detection
//! - Configurable fsync policies
//! - Recovery from torn writes at the tail
//! - Whole-file rewrite for compaction

pub mod entry;
pub mod error;
pub mod journal;
pub mod recovery;

pub use entry::{JournalEntry, JournalEntryType, JournalRecord};
pub use error::JournalError;
pub use journal::{FsyncPolicy, Journal, JournalConfig, JournalStats};
pub use recovery::RecoveryReport;

/// Journal record header size in bytes.
pub const RECORD_HEADER_SIZE: usize = 24;

/// Default journal file name inside a data directory.
pub const DEFAULT_JOURNAL_FILE: &str = "histories.journal";
