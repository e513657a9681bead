//! Persistence seams for conversation history and transition locks.
//!
//! The engine only talks to [`HistoryStore`] and [`LockStore`]; the in-memory
//! implementations here back tests and single-process deployments. Durable
//! backends live in `scenario-storage`.

use crate::error::StoreError;
use crate::key::ConversationKey;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Serialized history entry: a state name, or null.
pub type HistoryEntry = Option<String>;

/// Per-conversation history persistence.
///
/// `save` replaces the whole list for the key; readers never observe a
/// partially written history.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Loads the stored entries. An unknown key yields an empty list.
    async fn load(&self, key: &ConversationKey) -> Result<Vec<HistoryEntry>, StoreError>;

    /// Replaces the stored entries.
    async fn save(&self, key: &ConversationKey, entries: &[HistoryEntry])
        -> Result<(), StoreError>;

    /// Drops the stored entries.
    async fn remove(&self, key: &ConversationKey) -> Result<(), StoreError>;
}

/// Per-conversation mutual exclusion.
///
/// Synchronous so that a guard can release from `Drop`, which is the only
/// exit path guaranteed to run when a transition future is cancelled.
pub trait LockStore: Send + Sync {
    /// Takes the lock if it is free. Never blocks.
    fn try_acquire(&self, key: &ConversationKey) -> bool;

    /// Releases a held lock.
    ///
    /// Releasing a key that is not held is a bug in the caller.
    fn release(&self, key: &ConversationKey);

    fn is_locked(&self, key: &ConversationKey) -> bool;
}

/// In-memory history store.
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    histories: DashMap<ConversationKey, Vec<HistoryEntry>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored conversations.
    pub fn len(&self) -> usize {
        self.histories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histories.is_empty()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
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
        self.histories.insert(*key, entries.to_vec());
        Ok(())
    }

    async fn remove(&self, key: &ConversationKey) -> Result<(), StoreError> {
        self.histories.remove(key);
        Ok(())
    }
}

/// In-memory lock store.
#[derive(Debug, Default)]
pub struct MemoryLockStore {
    locks: DashMap<ConversationKey, ()>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of held locks.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl LockStore for MemoryLockStore {
    fn try_acquire(&self, key: &ConversationKey) -> bool {
        match self.locks.entry(*key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(());
                true
            }
        }
    }

    fn release(&self, key: &ConversationKey) {
        let removed = self.locks.remove(key);
        assert!(
            removed.is_some(),
            "released a transition lock that was not held ({})",
            key
        );
    }

    fn is_locked(&self, key: &ConversationKey) -> bool {
        self.locks.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ConversationKey {
        ConversationKey::new(1, 2)
    }

    #[tokio::test]
    async fn test_memory_history_unknown_key() {
        let store = MemoryHistoryStore::new();
        assert!(store.load(&key()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_history_save_and_load() {
        let store = MemoryHistoryStore::new();
        let entries = vec![Some("Initial".to_string()), Some("Foo".to_string())];
        store.save(&key(), &entries).await.unwrap();

        assert_eq!(store.load(&key()).await.unwrap(), entries);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_memory_history_is_copied() {
        let store = MemoryHistoryStore::new();
        let mut entries = vec![Some("Initial".to_string()), None];
        store.save(&key(), &entries).await.unwrap();
        entries.clear();

        let mut loaded = store.load(&key()).await.unwrap();
        loaded.push(Some("Bar".to_string()));

        assert_eq!(
            store.load(&key()).await.unwrap(),
            vec![Some("Initial".to_string()), None]
        );
    }

    #[tokio::test]
    async fn test_memory_history_remove() {
        let store = MemoryHistoryStore::new();
        store
            .save(&key(), &[Some("Initial".to_string())])
            .await
            .unwrap();
        store.remove(&key()).await.unwrap();
        assert!(store.load(&key()).await.unwrap().is_empty());
    }

    #[test]
    fn test_memory_lock() {
        let locks = MemoryLockStore::new();
        assert!(locks.try_acquire(&key()));
        assert!(locks.is_locked(&key()));
        assert!(!locks.try_acquire(&key()));

        // Other conversations are independent
        assert!(locks.try_acquire(&ConversationKey::new(1, 3)));

        locks.release(&key());
        assert!(!locks.is_locked(&key()));
        assert!(locks.try_acquire(&key()));
    }

    #[test]
    #[should_panic(expected = "not held")]
    fn test_release_unheld_lock_panics() {
        let locks = MemoryLockStore::new();
        locks.release(&key());
    }
}
