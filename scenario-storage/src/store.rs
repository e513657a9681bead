//! Durable conversation history store.
//!
//! Every save or remove is one journal record. The live histories are kept in
//! memory and rebuilt by replaying the journal on open. Once enough records
//! pile up, the journal is rewritten with one record per live conversation.

use crate::config::{StorageBackend, StorageConfig};
use crate::error::StorageError;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use scenario_core::{ConversationKey, HistoryEntry, HistoryStore, MemoryHistoryStore, StoreError};
use scenario_journal::{FsyncPolicy, Journal, JournalConfig, JournalEntry};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Result of a compaction run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionResult {
    /// Records in the journal before the rewrite.
    pub records_before: u64,
    /// Conversations written by the rewrite.
    pub conversations: u64,
}

/// History store backed by a [`Journal`].
pub struct JournalHistoryStore {
    journal: Journal,
    histories: DashMap<ConversationKey, Vec<HistoryEntry>>,
    /// Serializes journal appends with the matching cache update.
    write_lock: Mutex<()>,
    records: AtomicU64,
    /// Record count that triggers the next automatic compaction.
    next_compaction: AtomicU64,
    compaction_threshold: u64,
}

impl JournalHistoryStore {
    /// Opens the journal at `path` and replays it.
    pub fn open(
        path: impl AsRef<Path>,
        fsync_policy: FsyncPolicy,
        compaction_threshold: u64,
    ) -> Result<Self, StorageError> {
        let config = JournalConfig::new(path.as_ref()).with_fsync_policy(fsync_policy);
        let journal = Journal::open(config)?;

        let histories = DashMap::new();
        let entries = journal.read_all()?;
        let records = entries.len() as u64;
        for (_, entry) in entries {
            match entry {
                JournalEntry::SaveHistory {
                    chat_id,
                    user_id,
                    entries,
                } => {
                    histories.insert(ConversationKey::new(chat_id, user_id), entries);
                }
                JournalEntry::RemoveHistory { chat_id, user_id } => {
                    histories.remove(&ConversationKey::new(chat_id, user_id));
                }
                JournalEntry::Checkpoint { .. } => {}
            }
        }

        tracing::info!(
            "History journal replayed: {} records, {} conversations",
            records,
            histories.len()
        );

        Ok(Self {
            journal,
            histories,
            write_lock: Mutex::new(()),
            records: AtomicU64::new(records),
            next_compaction: AtomicU64::new(compaction_threshold),
            compaction_threshold,
        })
    }

    /// Opens the store described by a journal-backed configuration.
    pub fn from_config(config: &StorageConfig) -> Result<Self, StorageError> {
        config.validate()?;
        Self::open(
            config.journal_path(),
            config.fsync_policy,
            config.compaction_threshold,
        )
    }

    /// Number of live conversations.
    pub fn len(&self) -> usize {
        self.histories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histories.is_empty()
    }

    /// Number of records currently in the journal.
    pub fn record_count(&self) -> u64 {
        self.records.load(Ordering::SeqCst)
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    fn record(&self, entry: JournalEntry) -> Result<(), StorageError> {
        let _write = self.write_lock.lock();
        self.journal.append(&entry)?;

        match entry {
            JournalEntry::SaveHistory {
                chat_id,
                user_id,
                entries,
            } => {
                self.histories
                    .insert(ConversationKey::new(chat_id, user_id), entries);
            }
            JournalEntry::RemoveHistory { chat_id, user_id } => {
                self.histories.remove(&ConversationKey::new(chat_id, user_id));
            }
            JournalEntry::Checkpoint { .. } => {}
        }

        // The record is durable at this point; a failed compaction only
        // postpones the next attempt
        let records = self.records.fetch_add(1, Ordering::SeqCst) + 1;
        if self.compaction_threshold > 0 && records >= self.next_compaction.load(Ordering::SeqCst)
        {
            if let Err(e) = self.compact_locked() {
                tracing::warn!(
                    "History journal compaction failed at {} records: {}",
                    records,
                    e
                );
                self.next_compaction
                    .store(records + self.compaction_threshold, Ordering::SeqCst);
            }
        }
        Ok(())
    }

    /// Rewrites the journal with one record per live conversation.
    pub fn compact(&self) -> Result<CompactionResult, StorageError> {
        let _write = self.write_lock.lock();
        self.compact_locked()
    }

    fn compact_locked(&self) -> Result<CompactionResult, StorageError> {
        let records_before = self.records.load(Ordering::SeqCst);

        let mut live: Vec<(ConversationKey, Vec<HistoryEntry>)> = self
            .histories
            .iter()
            .map(|r| (*r.key(), r.value().clone()))
            .collect();
        live.sort_by_key(|(key, _)| *key);

        let mut entries = Vec::with_capacity(live.len() + 1);
        entries.push(JournalEntry::Checkpoint {
            conversations: live.len() as u64,
        });
        entries.extend(live.into_iter().map(|(key, entries)| JournalEntry::SaveHistory {
            chat_id: key.chat_id,
            user_id: key.user_id,
            entries,
        }));

        self.journal.rewrite(&entries)?;
        self.records.store(entries.len() as u64, Ordering::SeqCst);
        self.next_compaction.store(
            entries.len() as u64 + self.compaction_threshold,
            Ordering::SeqCst,
        );

        let result = CompactionResult {
            records_before,
            conversations: entries.len() as u64 - 1,
        };
        tracing::info!(
            "History journal compacted: {} records -> {} conversations",
            result.records_before,
            result.conversations
        );
        Ok(result)
    }
}

#[async_trait]
impl HistoryStore for JournalHistoryStore {
    async fn load(&self, key: &ConversationKey) -> Result<Vec<HistoryEntry>, StoreError> {
        Ok(self
            .histories
            .get(key)
            .map(|r| r.value().clone())
            .unwrap_or_default())
    }

    async fn save(
        &self,
        key: &ConversationKey,
        entries: &[HistoryEntry],
    ) -> Result<(), StoreError> {
        self.record(JournalEntry::SaveHistory {
            chat_id: key.chat_id,
            user_id: key.user_id,
            entries: entries.to_vec(),
        })?;
        Ok(())
    }

    async fn remove(&self, key: &ConversationKey) -> Result<(), StoreError> {
        if !self.histories.contains_key(key) {
            return Ok(());
        }
        self.record(JournalEntry::RemoveHistory {
            chat_id: key.chat_id,
            user_id: key.user_id,
        })?;
        Ok(())
    }
}

/// Builds the history store selected by `config`.
pub fn create_history_store(config: &StorageConfig) -> Result<Arc<dyn HistoryStore>, StorageError> {
    match config.backend {
        StorageBackend::Memory => Ok(Arc::new(MemoryHistoryStore::new())),
        StorageBackend::Journal => Ok(Arc::new(JournalHistoryStore::from_config(config)?)),
    }
}
