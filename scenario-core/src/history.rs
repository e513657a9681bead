//! Per-conversation state history.
//!
//! A history is the stack of state names a conversation has visited. Its first
//! entry is always the initial state. Moving to a state that is already on the
//! stack cuts everything recorded after it:
//!
//! ```text
//! [Initial, Menu, Detail, Settings]  set(Menu)  -> [Initial, Menu]
//! [Initial, Menu]                    set(Help)  -> [Initial, Menu, Help]
//! [Initial, Menu, Help]              pop()      -> [Initial, Menu]
//! ```
//!
//! All mutation happens in memory; [`StateHistory::commit`] writes the whole
//! list back to the store.

use crate::error::CoreError;
use crate::key::ConversationKey;
use crate::store::{HistoryEntry, HistoryStore};
use std::sync::Arc;

/// Loaded view of one conversation's history.
pub struct StateHistory {
    key: ConversationKey,
    store: Arc<dyn HistoryStore>,
    entries: Option<Vec<HistoryEntry>>,
}

impl StateHistory {
    /// Creates an unloaded history handle.
    pub fn new(key: ConversationKey, store: Arc<dyn HistoryStore>) -> Self {
        Self {
            key,
            store,
            entries: None,
        }
    }

    pub fn key(&self) -> ConversationKey {
        self.key
    }

    pub fn is_loaded(&self) -> bool {
        self.entries.is_some()
    }

    /// Fetches the stored entries.
    ///
    /// A conversation that has never been initialised has no stored record
    /// and fails with [`CoreError::HistoryNotInitialized`].
    pub async fn load(&mut self) -> Result<(), CoreError> {
        let entries = self.store.load(&self.key).await?;
        if entries.is_empty() {
            return Err(CoreError::HistoryNotInitialized { key: self.key });
        }
        tracing::debug!("History loaded ({}): {:?}", self.key, entries);
        self.entries = Some(entries);
        Ok(())
    }

    /// Writes a single-entry history `[initial]` and marks it loaded.
    pub async fn initialize(&mut self, initial: &str) -> Result<(), CoreError> {
        let entries = vec![Some(initial.to_string())];
        self.store.save(&self.key, &entries).await?;
        tracing::debug!("History initialized ({}): {:?}", self.key, entries);
        self.entries = Some(entries);
        Ok(())
    }

    pub fn entries(&self) -> Result<&[HistoryEntry], CoreError> {
        self.entries
            .as_deref()
            .ok_or(CoreError::HistoryNotLoaded { key: self.key })
    }

    /// Returns the last entry.
    pub fn current_state(&self) -> Result<Option<&str>, CoreError> {
        let entries = self.entries()?;
        entries
            .last()
            .map(|entry| entry.as_deref())
            .ok_or(CoreError::HistoryNotLoaded { key: self.key })
    }

    /// Returns the entry before the current one.
    pub fn penultimate_state(&self) -> Result<Option<&str>, CoreError> {
        let entries = self.entries()?;
        if entries.len() < 2 {
            return Err(CoreError::NoPenultimateState {
                key: self.key,
                entries: entries.to_vec(),
            });
        }
        Ok(entries[entries.len() - 2].as_deref())
    }

    /// Moves to `state` in memory, truncating on revisit.
    pub fn set(&mut self, state: Option<&str>) -> Result<(), CoreError> {
        let key = self.key;
        let entries = self
            .entries
            .as_mut()
            .ok_or(CoreError::HistoryNotLoaded { key })?;

        match entries.iter().position(|entry| entry.as_deref() == state) {
            Some(index) => entries.truncate(index + 1),
            None => entries.push(state.map(str::to_string)),
        }
        tracing::debug!("History set ({}): {:?}", key, entries);
        Ok(())
    }

    /// Removes and returns the last entry in memory.
    pub fn pop(&mut self) -> Result<HistoryEntry, CoreError> {
        let key = self.key;
        let entries = self
            .entries
            .as_mut()
            .ok_or(CoreError::HistoryNotLoaded { key })?;

        if entries.len() < 2 {
            return Err(CoreError::CannotPopInitial { key });
        }
        let popped = entries.pop().flatten();
        tracing::debug!("History pop ({}): {:?}", key, entries);
        Ok(popped)
    }

    /// Replaces the whole in-memory list.
    pub fn replace(&mut self, entries: Vec<HistoryEntry>) {
        self.entries = Some(entries);
    }

    /// Persists the in-memory entries.
    pub async fn commit(&self) -> Result<(), CoreError> {
        let entries = self.entries()?;
        self.store.save(&self.key, entries).await?;
        tracing::debug!("History committed ({})", self.key);
        Ok(())
    }

    /// `set` followed by `commit`.
    pub async fn push(&mut self, state: Option<&str>) -> Result<(), CoreError> {
        self.set(state)?;
        self.commit().await
    }
}
