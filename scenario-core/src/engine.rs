//! Scenario engine - coordinates the transition table, histories and locks.

use crate::adapter::TransitionAdapter;
use crate::error::{CallbackPhase, CoreError};
use crate::history::StateHistory;
use crate::key::ConversationKey;
use crate::lock::{LockPolicy, TransitionLock};
use crate::state::{StateRef, TransitionContext, TransitionKind};
use crate::store::{HistoryEntry, HistoryStore, LockStore, MemoryHistoryStore, MemoryLockStore};
use crate::table::TransitionTable;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Engine behaviour switches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Reaction to a transition arriving while another one runs.
    pub lock_policy: LockPolicy,

    /// Start unknown conversations at the initial state instead of failing.
    pub auto_initialize: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_policy: LockPolicy::Error,
            auto_initialize: true,
        }
    }
}

/// Outcome of a transition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionResult {
    pub from_state: String,
    pub to_state: String,
    /// History after the attempt.
    pub history: Vec<HistoryEntry>,
    /// False when the attempt was dropped by [`LockPolicy::Suppress`].
    pub applied: bool,
}

/// The dialog state machine.
///
/// One engine serves any number of conversations. The table is shared and
/// read-mostly; everything per conversation lives in the history store.
pub struct ScenarioEngine {
    table: RwLock<TransitionTable>,
    histories: Arc<dyn HistoryStore>,
    locks: TransitionLock,
    config: EngineConfig,
}

impl ScenarioEngine {
    pub fn new(
        config: EngineConfig,
        histories: Arc<dyn HistoryStore>,
        locks: Arc<dyn LockStore>,
    ) -> Self {
        Self {
            table: RwLock::new(TransitionTable::new()),
            histories,
            locks: TransitionLock::new(locks),
            config,
        }
    }

    /// Creates an engine backed by in-memory stores.
    pub fn in_memory(config: EngineConfig) -> Self {
        Self::new(
            config,
            Arc::new(MemoryHistoryStore::new()),
            Arc::new(MemoryLockStore::new()),
        )
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // =========================================================================
    // Transition Table
    // =========================================================================

    pub fn set_initial_state(&self, state: StateRef) -> Result<(), CoreError> {
        let name = state.name().to_string();
        self.table.write().set_initial(state)?;
        tracing::debug!("Initial state set to '{}'", name);
        Ok(())
    }

    pub fn initial_state(&self) -> Result<StateRef, CoreError> {
        self.table
            .read()
            .initial()
            .cloned()
            .ok_or(CoreError::InitialStateNotSet)
    }

    pub fn add_transition(
        &self,
        source: &StateRef,
        handler: &str,
        destination: &StateRef,
        direction: Option<&str>,
    ) -> Result<(), CoreError> {
        self.table
            .write()
            .add_transition(source, handler, destination, direction)
    }

    /// Applies one handler/destination pair to several sources.
    ///
    /// Not atomic; see [`TransitionTable::add_transitions`].
    pub fn add_transitions(
        &self,
        sources: &[StateRef],
        handler: &str,
        destination: &StateRef,
        direction: Option<&str>,
    ) -> Result<(), CoreError> {
        self.table
            .write()
            .add_transitions(sources, handler, destination, direction)
    }

    pub fn remove_transition(
        &self,
        source: &str,
        handler: &str,
        direction: Option<&str>,
    ) -> Result<StateRef, CoreError> {
        self.table.write().remove_transition(source, handler, direction)
    }

    pub fn check_transition(
        &self,
        source: &str,
        destination: &str,
        handler: &str,
        direction: Option<&str>,
    ) -> bool {
        self.table
            .read()
            .check_transition(source, destination, handler, direction)
    }

    /// Live states, sorted by name.
    pub fn states(&self) -> Vec<StateRef> {
        self.table.read().states()
    }

    /// Copy of the current table.
    pub fn table(&self) -> TransitionTable {
        self.table.read().clone()
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Follows the edge `(current, handler, direction)`.
    pub async fn execute_next_transition(
        &self,
        key: ConversationKey,
        handler: &str,
        direction: Option<&str>,
        event: Value,
    ) -> Result<TransitionResult, CoreError> {
        let history = self.load_history(key).await?;
        let source = self.current_state_of(&history)?;

        let destination = self
            .table
            .read()
            .get_destination(source.name(), handler, direction)
            .map_err(|_| CoreError::NextTransitionNotFound {
                key,
                source_state: source.name().to_string(),
                handler: handler.to_string(),
                direction: direction.map(str::to_string),
            })?;

        let ctx = TransitionContext {
            key,
            kind: TransitionKind::Next,
            source: source.name().to_string(),
            destination: destination.name().to_string(),
            handler: Some(handler.to_string()),
            direction: direction.map(str::to_string),
            event,
        };
        self.run_transition(history, source, destination, ctx).await
    }

    /// Returns to the penultimate history entry.
    pub async fn execute_back_transition(
        &self,
        key: ConversationKey,
        event: Value,
    ) -> Result<TransitionResult, CoreError> {
        let history = self.load_history(key).await?;
        let source = self.current_state_of(&history)?;

        let destination_name = match history.penultimate_state() {
            Ok(name) => name.map(str::to_string),
            Err(CoreError::NoPenultimateState { .. }) => {
                return Err(CoreError::BackTransitionNotFound {
                    key,
                    source_state: source.name().to_string(),
                })
            }
            Err(e) => return Err(e),
        };
        let destination = self.resolve_entry(key, destination_name.as_deref())?;

        let ctx = TransitionContext {
            key,
            kind: TransitionKind::Back,
            source: source.name().to_string(),
            destination: destination.name().to_string(),
            handler: None,
            direction: None,
            event,
        };
        self.run_transition(history, source, destination, ctx).await
    }

    /// Moves to any registered state without a table edge.
    ///
    /// Callbacks run and the history is updated with `set` semantics, so
    /// migrating to a state already on the stack truncates it.
    pub async fn migrate_to_state(
        &self,
        key: ConversationKey,
        state: &str,
        event: Value,
    ) -> Result<TransitionResult, CoreError> {
        let history = self.load_history(key).await?;
        let source = self.current_state_of(&history)?;
        let destination = self.resolve_entry(key, Some(state))?;

        let ctx = TransitionContext {
            key,
            kind: TransitionKind::Migrate,
            source: source.name().to_string(),
            destination: destination.name().to_string(),
            handler: None,
            direction: None,
            event,
        };
        self.run_transition(history, source, destination, ctx).await
    }

    async fn run_transition(
        &self,
        mut history: StateHistory,
        source: StateRef,
        destination: StateRef,
        ctx: TransitionContext,
    ) -> Result<TransitionResult, CoreError> {
        let key = ctx.key;

        let _guard = match self.locks.acquire(key, source.name(), destination.name()) {
            Ok(guard) => guard,
            Err(e) => match self.config.lock_policy {
                LockPolicy::Error => return Err(e),
                LockPolicy::Suppress => {
                    tracing::warn!(
                        "Transition '{}' -> '{}' suppressed, lock is active ({})",
                        source.name(),
                        destination.name(),
                        key
                    );
                    return Ok(TransitionResult {
                        from_state: source.name().to_string(),
                        to_state: destination.name().to_string(),
                        history: history.entries()?.to_vec(),
                        applied: false,
                    });
                }
            },
        };

        // The history may have moved between the first load and the lock
        let fresh = self.fill_history(&mut history).await?;
        let actual = history.current_state()?.unwrap_or("null");
        if actual != source.name() {
            return Err(CoreError::HistoryConflict {
                key,
                expected: source.name().to_string(),
                actual: actual.to_string(),
            });
        }
        if matches!(ctx.kind, TransitionKind::Back) {
            let previous = history.penultimate_state().ok().map(|p| p.unwrap_or("null"));
            if previous != Some(destination.name()) {
                return Err(CoreError::HistoryConflict {
                    key,
                    expected: destination.name().to_string(),
                    actual: previous.unwrap_or("null").to_string(),
                });
            }
        }

        source
            .process_exit(&ctx)
            .await
            .map_err(|e| CoreError::Callback {
                key,
                phase: CallbackPhase::Exit,
                state: source.name().to_string(),
                source: e,
            })?;
        destination
            .process_enter(&ctx)
            .await
            .map_err(|e| CoreError::Callback {
                key,
                phase: CallbackPhase::Enter,
                state: destination.name().to_string(),
                source: e,
            })?;

        match ctx.kind {
            TransitionKind::Back => {
                history.pop()?;
                history.commit().await?;
            }
            TransitionKind::Next | TransitionKind::Migrate => {
                // Self-loops leave the history as it is
                if source.name() != destination.name() {
                    history.push(Some(destination.name())).await?;
                } else if fresh {
                    history.commit().await?;
                }
            }
        }

        tracing::debug!(
            "Transition '{}' -> '{}' ({:?}) done ({})",
            source.name(),
            destination.name(),
            ctx.kind,
            key
        );

        Ok(TransitionResult {
            from_state: source.name().to_string(),
            to_state: destination.name().to_string(),
            history: history.entries()?.to_vec(),
            applied: true,
        })
    }

    // =========================================================================
    // History
    // =========================================================================

    /// Returns the state the conversation is in.
    pub async fn get_current_state(&self, key: ConversationKey) -> Result<StateRef, CoreError> {
        let history = self.load_history(key).await?;
        self.current_state_of(&history)
    }

    /// Returns the stored history.
    pub async fn get_history(&self, key: ConversationKey) -> Result<Vec<HistoryEntry>, CoreError> {
        let history = self.load_history(key).await?;
        Ok(history.entries()?.to_vec())
    }

    /// Drops the stored history; the next access starts over.
    pub async fn reset_history(&self, key: ConversationKey) -> Result<(), CoreError> {
        self.histories.remove(&key).await?;
        tracing::debug!("History reset ({})", key);
        Ok(())
    }

    /// Overwrites a conversation's history without running callbacks.
    ///
    /// With `check`, the list must start at the initial state and every
    /// consecutive pair must be joined by some edge of the table.
    pub async fn set_transitions_chronology(
        &self,
        key: ConversationKey,
        states: &[&str],
        check: bool,
    ) -> Result<(), CoreError> {
        let (first, last) = match (states.first(), states.last()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => return Err(CoreError::EmptyChronology { key }),
        };

        {
            let table = self.table.read();
            for name in states {
                if !table.contains_state(name) {
                    return Err(CoreError::StateNotFound {
                        key,
                        state: name.to_string(),
                    });
                }
            }

            if check {
                let initial = table.initial().ok_or(CoreError::InitialStateNotSet)?;
                if initial.name() != first {
                    return Err(CoreError::ChronologyStart {
                        key,
                        initial: initial.name().to_string(),
                        state: first.to_string(),
                    });
                }
                for pair in states.windows(2) {
                    if !table.connects(pair[0], pair[1]) {
                        return Err(CoreError::Chronology {
                            key,
                            source_state: pair[0].to_string(),
                            destination_state: pair[1].to_string(),
                        });
                    }
                }
            }
        }

        let _guard = self.locks.acquire(key, first, last)?;
        let mut history = StateHistory::new(key, Arc::clone(&self.histories));
        history.replace(states.iter().map(|s| Some(s.to_string())).collect());
        history.commit().await?;

        tracing::debug!("Chronology set ({}): {:?}", key, states);
        Ok(())
    }

    /// Loads a history, starting it at the initial state if allowed.
    ///
    /// Nothing is written here; a started history reaches the store with the
    /// first transition that commits under the lock.
    async fn load_history(&self, key: ConversationKey) -> Result<StateHistory, CoreError> {
        let mut history = StateHistory::new(key, Arc::clone(&self.histories));
        self.fill_history(&mut history).await?;
        Ok(history)
    }

    /// Reads the stored history into `history`. Returns true when the store
    /// had none and the history was started in memory.
    async fn fill_history(&self, history: &mut StateHistory) -> Result<bool, CoreError> {
        match history.load().await {
            Ok(()) => Ok(false),
            Err(CoreError::HistoryNotInitialized { .. }) if self.config.auto_initialize => {
                let initial = self.initial_state()?;
                history.replace(vec![Some(initial.name().to_string())]);
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }

    fn current_state_of(&self, history: &StateHistory) -> Result<StateRef, CoreError> {
        let current = history.current_state()?;
        self.resolve_entry(history.key(), current)
    }

    fn resolve_entry(&self, key: ConversationKey, name: Option<&str>) -> Result<StateRef, CoreError> {
        let name = name.unwrap_or("null");
        self.table
            .read()
            .get_state(name)
            .ok_or_else(|| CoreError::StateNotFound {
                key,
                state: name.to_string(),
            })
    }

    // =========================================================================
    // Import / Export
    // =========================================================================

    /// Loads edges from an adapter, binding names to the given states and
    /// handler keys. Returns the number of edges added.
    ///
    /// Either every edge is added or the table is left untouched.
    pub fn import_transitions(
        &self,
        adapter: &dyn TransitionAdapter,
        states: &[StateRef],
        handlers: &[&str],
    ) -> Result<usize, CoreError> {
        let raw = adapter.read()?;

        let states: HashMap<&str, &StateRef> = states.iter().map(|s| (s.name(), s)).collect();
        let handlers: HashSet<&str> = handlers.iter().copied().collect();
        let lookup = |name: &str| {
            states.get(name).copied().ok_or_else(|| CoreError::Import {
                reason: format!("state '{}' was not provided", name),
            })
        };

        let mut table = self.table.write();
        let mut staged = table.clone();
        let mut added = 0;

        for (source, by_handler) in &raw {
            let source = lookup(source.as_str())?;
            for (handler, directions) in by_handler {
                if !handlers.contains(handler.as_str()) {
                    return Err(CoreError::Import {
                        reason: format!("handler '{}' was not provided", handler),
                    });
                }
                for (direction, destination) in directions {
                    let destination = lookup(destination.as_str())?;
                    staged
                        .add_transition(source, handler, destination, direction.as_deref())
                        .map_err(|e| CoreError::Import {
                            reason: e.to_string(),
                        })?;
                    added += 1;
                }
            }
        }

        *table = staged;
        tracing::info!("Imported {} transitions", added);
        Ok(added)
    }

    /// Writes the table through an adapter.
    pub fn export_transitions(&self, adapter: &dyn TransitionAdapter) -> Result<(), CoreError> {
        let raw = {
            let table = self.table.read();
            if table.is_empty() {
                return Err(CoreError::Export {
                    reason: "transition table is empty".to_string(),
                });
            }
            table.to_raw()
        };
        adapter.write(&raw)?;
        tracing::info!("Exported transitions of {} source states", raw.len());
        Ok(())
    }
}
