//! # scenario-storage
//!
//! Storage layer for scenario conversation histories.
//!
//! This crate provides:
//! - Backend selection from configuration
//! - A journal-backed history store with replay and compaction

pub mod config;
pub mod error;
pub mod store;

pub use config::{StorageBackend, StorageConfig};
pub use error::StorageError;
pub use scenario_journal::FsyncPolicy;
pub use store::{create_history_store, CompactionResult, JournalHistoryStore};
