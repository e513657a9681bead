//! Per-conversation transition lock.

use crate::error::CoreError;
use crate::key::ConversationKey;
use crate::store::LockStore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// What to do when a transition finds its conversation already locked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockPolicy {
    /// Fail with [`CoreError::TransitionLockActive`].
    #[default]
    Error,
    /// Drop the attempt and report it as not applied.
    Suppress,
}

impl FromStr for LockPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LockPolicy::Error),
            "suppress" => Ok(LockPolicy::Suppress),
            other => Err(format!("unknown lock policy: {}", other)),
        }
    }
}

impl fmt::Display for LockPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockPolicy::Error => f.write_str("error"),
            LockPolicy::Suppress => f.write_str("suppress"),
        }
    }
}

/// Fail-fast mutual exclusion over a [`LockStore`].
#[derive(Clone)]
pub struct TransitionLock {
    store: Arc<dyn LockStore>,
}

impl TransitionLock {
    pub fn new(store: Arc<dyn LockStore>) -> Self {
        Self { store }
    }

    /// Takes the lock for `key`, or fails if a transition is already running.
    ///
    /// `source` and `destination` only feed the error.
    pub fn acquire(
        &self,
        key: ConversationKey,
        source: &str,
        destination: &str,
    ) -> Result<LockGuard, CoreError> {
        if !self.store.try_acquire(&key) {
            return Err(CoreError::TransitionLockActive {
                key,
                source_state: source.to_string(),
                destination_state: destination.to_string(),
            });
        }
        tracing::debug!("Transition lock set ({})", key);
        Ok(LockGuard {
            store: Arc::clone(&self.store),
            key,
        })
    }

    pub fn is_locked(&self, key: &ConversationKey) -> bool {
        self.store.is_locked(key)
    }
}

/// Holds a conversation lock until dropped.
///
/// Dropping runs on success, on error returns and when the owning future is
/// cancelled, so the lock can never outlive its transition.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard {
    store: Arc<dyn LockStore>,
    key: ConversationKey,
}

impl LockGuard {
    pub fn key(&self) -> ConversationKey {
        self.key
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.store.release(&self.key);
        tracing::debug!("Transition lock unset ({})", self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryLockStore;

    fn lock() -> TransitionLock {
        TransitionLock::new(Arc::new(MemoryLockStore::new()))
    }

    #[test]
    fn test_acquire_and_release() {
        let lock = lock();
        let key = ConversationKey::new(1, 1);

        let guard = lock.acquire(key, "Initial", "Menu").unwrap();
        assert_eq!(guard.key(), key);
        assert!(lock.is_locked(&key));

        drop(guard);
        assert!(!lock.is_locked(&key));
        assert!(lock.acquire(key, "Initial", "Menu").is_ok());
    }

    #[test]
    fn test_contention_fails_fast() {
        let lock = lock();
        let key = ConversationKey::new(1, 1);
        let _guard = lock.acquire(key, "Initial", "Menu").unwrap();

        let err = lock.acquire(key, "Initial", "Menu").err().unwrap();
        match err {
            CoreError::TransitionLockActive {
                key: k,
                source_state,
                destination_state,
            } => {
                assert_eq!(k, key);
                assert_eq!(source_state, "Initial");
                assert_eq!(destination_state, "Menu");
            }
            other => panic!("unexpected error: {:?}", other),
        }

        // A different conversation is not affected
        assert!(lock.acquire(ConversationKey::new(1, 2), "A", "B").is_ok());
    }

    #[test]
    fn test_released_on_unwind() {
        let lock = lock();
        let key = ConversationKey::new(5, 5);
        let cloned = lock.clone();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = cloned.acquire(key, "A", "B").unwrap();
            panic!("callback blew up");
        }));

        assert!(result.is_err());
        assert!(!lock.is_locked(&key));
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!("error".parse::<LockPolicy>().unwrap(), LockPolicy::Error);
        assert_eq!("SUPPRESS".parse::<LockPolicy>().unwrap(), LockPolicy::Suppress);
        assert!("ignore".parse::<LockPolicy>().is_err());
        assert_eq!(LockPolicy::default(), LockPolicy::Error);
    }
}
