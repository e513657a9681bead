//! Core error types.

use crate::key::ConversationKey;
use thiserror::Error;

/// Error returned by application-defined state callbacks.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Which side of a transition a callback ran on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackPhase {
    Exit,
    Enter,
}

impl std::fmt::Display for CallbackPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallbackPhase::Exit => f.write_str("exit"),
            CallbackPhase::Enter => f.write_str("enter"),
        }
    }
}

/// Errors from history store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store backend error: {0}")]
    Backend(Box<dyn std::error::Error + Send + Sync>),
}

/// Errors from the dialog state machine.
#[derive(Debug, Error)]
pub enum CoreError {
    // Configuration
    #[error("initial state not set")]
    InitialStateNotSet,

    #[error("initial state has already been set to '{existing}'")]
    InitialStateAlreadySet { existing: String },

    #[error("state '{state}' is not flagged as initial")]
    NotInitialState { state: String },

    #[error("state '{state}' is flagged as initial but '{existing}' is the initial state")]
    DuplicateInitialState { existing: String, state: String },

    #[error("a different state object named '{state}' is already registered")]
    StateConflict { state: String },

    #[error("'chat_id' or 'user_id' is required but neither was provided")]
    MissingAddress,

    // Transition table
    #[error("transition (source='{source_state}', handler='{handler}', direction={direction:?}) already exists with destination '{existing}'")]
    DuplicateTransition {
        source_state: String,
        handler: String,
        direction: Option<String>,
        existing: String,
    },

    #[error("transition (source='{source_state}', handler='{handler}') has an empty direction")]
    EmptyDirection {
        source_state: String,
        handler: String,
    },

    #[error("transition (source='{source_state}', handler='{handler}', direction={direction:?}) not found")]
    TransitionNotFound {
        source_state: String,
        handler: String,
        direction: Option<String>,
    },

    #[error("state '{state}' not found ({key})")]
    StateNotFound { key: ConversationKey, state: String },

    // History
    #[error("history not initialized ({key})")]
    HistoryNotInitialized { key: ConversationKey },

    #[error("history not loaded ({key})")]
    HistoryNotLoaded { key: ConversationKey },

    #[error("no penultimate state in history ({key}, entries={entries:?})")]
    NoPenultimateState {
        key: ConversationKey,
        entries: Vec<Option<String>>,
    },

    #[error("cannot pop the initial state from history ({key})")]
    CannotPopInitial { key: ConversationKey },

    // Engine
    #[error("next transition not found from '{source_state}' on handler '{handler}' (direction={direction:?}, {key})")]
    NextTransitionNotFound {
        key: ConversationKey,
        source_state: String,
        handler: String,
        direction: Option<String>,
    },

    #[error("back transition not found from '{source_state}' ({key})")]
    BackTransitionNotFound {
        key: ConversationKey,
        source_state: String,
    },

    #[error("transition lock is active, cannot move '{source_state}' -> '{destination_state}' ({key})")]
    TransitionLockActive {
        key: ConversationKey,
        source_state: String,
        destination_state: String,
    },

    #[error("history conflict: expected current state '{expected}', actual '{actual}' ({key})")]
    HistoryConflict {
        key: ConversationKey,
        expected: String,
        actual: String,
    },

    #[error("{phase} callback of '{state}' failed ({key}): {source}")]
    Callback {
        key: ConversationKey,
        phase: CallbackPhase,
        state: String,
        #[source]
        source: CallbackError,
    },

    #[error("chronology is not realizable: no transition from '{source_state}' to '{destination_state}' ({key})")]
    Chronology {
        key: ConversationKey,
        source_state: String,
        destination_state: String,
    },

    #[error("chronology must contain at least one state ({key})")]
    EmptyChronology { key: ConversationKey },

    #[error("chronology must start at the initial state '{initial}', got '{state}' ({key})")]
    ChronologyStart {
        key: ConversationKey,
        initial: String,
        state: String,
    },

    // Import/export
    #[error("failed to import transitions: {reason}")]
    Import { reason: String },

    #[error("failed to export transitions: {reason}")]
    Export { reason: String },

    #[error("transition file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl CoreError {
    /// Returns whether this error indicates the operation can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Store(StoreError::Io(_)))
    }

    /// Returns true for the routine "nothing to do from here" outcomes.
    ///
    /// A handler pressed in a state that has no edge for it, or "back" on a
    /// fresh conversation, is expected traffic rather than a fault.
    pub fn is_navigation_miss(&self) -> bool {
        matches!(
            self,
            CoreError::NextTransitionNotFound { .. } | CoreError::BackTransitionNotFound { .. }
        )
    }

    /// Returns the conversation this error concerns, if any.
    pub fn key(&self) -> Option<ConversationKey> {
        match self {
            CoreError::StateNotFound { key, .. }
            | CoreError::HistoryNotInitialized { key }
            | CoreError::HistoryNotLoaded { key }
            | CoreError::NoPenultimateState { key, .. }
            | CoreError::CannotPopInitial { key }
            | CoreError::NextTransitionNotFound { key, .. }
            | CoreError::BackTransitionNotFound { key, .. }
            | CoreError::TransitionLockActive { key, .. }
            | CoreError::HistoryConflict { key, .. }
            | CoreError::Callback { key, .. }
            | CoreError::Chronology { key, .. }
            | CoreError::EmptyChronology { key }
            | CoreError::ChronologyStart { key, .. } => Some(*key),
            _ => None,
        }
    }

    /// Returns a stable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::InitialStateNotSet => "INITIAL_STATE_NOT_SET",
            CoreError::InitialStateAlreadySet { .. } => "INITIAL_STATE_ALREADY_SET",
            CoreError::NotInitialState { .. } => "INVALID_INITIAL_STATE",
            CoreError::DuplicateInitialState { .. } => "DUPLICATE_INITIAL_STATE",
            CoreError::StateConflict { .. } => "STATE_CONFLICT",
            CoreError::MissingAddress => "MISSING_ADDRESS",
            CoreError::DuplicateTransition { .. } => "DUPLICATE_TRANSITION",
            CoreError::EmptyDirection { .. } => "EMPTY_DIRECTION",
            CoreError::TransitionNotFound { .. } => "TRANSITION_NOT_FOUND",
            CoreError::StateNotFound { .. } => "STATE_NOT_FOUND",
            CoreError::HistoryNotInitialized { .. } => "HISTORY_NOT_INITIALIZED",
            CoreError::HistoryNotLoaded { .. } => "HISTORY_NOT_LOADED",
            CoreError::NoPenultimateState { .. } => "NO_PENULTIMATE_STATE",
            CoreError::CannotPopInitial { .. } => "CANNOT_POP_INITIAL",
            CoreError::NextTransitionNotFound { .. } => "NEXT_TRANSITION_NOT_FOUND",
            CoreError::BackTransitionNotFound { .. } => "BACK_TRANSITION_NOT_FOUND",
            CoreError::TransitionLockActive { .. } => "TRANSITION_LOCK_ACTIVE",
            CoreError::HistoryConflict { .. } => "CONFLICT",
            CoreError::Callback { .. } => "CALLBACK_FAILED",
            CoreError::Chronology { .. } => "CHRONOLOGY",
            CoreError::EmptyChronology { .. } => "CHRONOLOGY",
            CoreError::ChronologyStart { .. } => "CHRONOLOGY",
            CoreError::Import { .. } => "IMPORT",
            CoreError::Export { .. } => "EXPORT",
            CoreError::Io(_) => "IO_ERROR",
            CoreError::Json(_) => "BAD_FORMAT",
            CoreError::Yaml(_) => "BAD_FORMAT",
            CoreError::Store(_) => "STORE_ERROR",
        }
    }
}
