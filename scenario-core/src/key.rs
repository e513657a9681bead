//! Conversation addressing.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one conversation: a user inside a chat.
///
/// Both the history store and the lock store are keyed by this type. When the
/// transport only knows one of the two identifiers, [`ConversationKey::resolve`]
/// uses it for both halves, so a private chat with a single id is still a
/// valid key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationKey {
    pub chat_id: i64,
    pub user_id: i64,
}

impl ConversationKey {
    pub fn new(chat_id: i64, user_id: i64) -> Self {
        Self { chat_id, user_id }
    }

    /// Builds a key from optional ids, filling the missing half from the other.
    pub fn resolve(chat_id: Option<i64>, user_id: Option<i64>) -> Result<Self, CoreError> {
        match (chat_id, user_id) {
            (Some(chat_id), Some(user_id)) => Ok(Self { chat_id, user_id }),
            (Some(id), None) | (None, Some(id)) => Ok(Self {
                chat_id: id,
                user_id: id,
            }),
            (None, None) => Err(CoreError::MissingAddress),
        }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chat_id={}, user_id={}", self.chat_id, self.user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_both() {
        let key = ConversationKey::resolve(Some(1), Some(2)).unwrap();
        assert_eq!(key, ConversationKey::new(1, 2));
    }

    #[test]
    fn test_resolve_single_id() {
        assert_eq!(
            ConversationKey::resolve(Some(7), None).unwrap(),
            ConversationKey::new(7, 7)
        );
        assert_eq!(
            ConversationKey::resolve(None, Some(9)).unwrap(),
            ConversationKey::new(9, 9)
        );
    }

    #[test]
    fn test_resolve_missing() {
        assert!(matches!(
            ConversationKey::resolve(None, None),
            Err(CoreError::MissingAddress)
        ));
    }

    #[test]
    fn test_display() {
        assert_eq!(
            ConversationKey::new(-100, 5).to_string(),
            "chat_id=-100, user_id=5"
        );
    }
}
