//! # scenario-core
//!
//! Dialog state machine for chat conversations.
//!
//! This crate provides:
//! - The transition table and state callback contract
//! - Per-conversation state history with truncate-on-revisit
//! - The per-conversation transition lock
//! - Store seams with in-memory implementations
//! - JSON/YAML transition adapters
//! - The engine tying them together

pub mod adapter;
pub mod engine;
pub mod error;
pub mod history;
pub mod key;
pub mod lock;
pub mod state;
pub mod store;
pub mod table;

pub use adapter::{
    FileAdapter, FileFormat, JsonAdapter, MemoryAdapter, NameRewrite, RawTransitions,
    TransitionAdapter, YamlAdapter,
};
pub use engine::{EngineConfig, ScenarioEngine, TransitionResult};
pub use error::{CallbackError, CallbackPhase, CoreError, StoreError};
pub use history::StateHistory;
pub use key::ConversationKey;
pub use lock::{LockGuard, LockPolicy, TransitionLock};
pub use state::{NamedState, State, StateRef, TransitionContext, TransitionKind};
pub use store::{HistoryEntry, HistoryStore, LockStore, MemoryHistoryStore, MemoryLockStore};
pub use table::{Edge, TransitionTable};
