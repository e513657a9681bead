//! Transition table.
//!
//! Edges are keyed by `(source, handler, direction)`:
//!
//! ```text
//! Initial --start--------------> Menu
//! Menu    --select[details]----> Detail
//! Menu    --select[settings]---> Settings
//! ```
//!
//! Handlers are matched by the string key they were registered with, never
//! by callback identity. Renaming a handler's key without updating the table
//! silently disconnects its edges.

use crate::adapter::RawTransitions;
use crate::error::CoreError;
use crate::state::{same_object, StateRef};
use std::collections::{BTreeSet, HashMap};

type Directions = HashMap<Option<String>, String>;

/// A single edge, as returned by [`TransitionTable::edges`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Edge {
    pub source: String,
    pub handler: String,
    pub direction: Option<String>,
    pub destination: String,
}

/// Transition table with a live-state index.
#[derive(Clone, Default)]
pub struct TransitionTable {
    /// source -> handler -> direction -> destination (all by name).
    edges: HashMap<String, HashMap<String, Directions>>,

    /// Every state that appears in `edges`, plus the initial state.
    states: HashMap<String, StateRef>,

    initial: Option<StateRef>,
}

impl TransitionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the initial state, if set.
    pub fn initial(&self) -> Option<&StateRef> {
        self.initial.as_ref()
    }

    /// Pins the initial state. It stays live even without edges.
    pub fn set_initial(&mut self, state: StateRef) -> Result<(), CoreError> {
        if let Some(existing) = &self.initial {
            return Err(CoreError::InitialStateAlreadySet {
                existing: existing.name().to_string(),
            });
        }
        if !state.is_initial() {
            return Err(CoreError::NotInitialState {
                state: state.name().to_string(),
            });
        }
        if let Some(other) = self
            .states
            .values()
            .find(|s| s.is_initial() && s.name() != state.name())
        {
            return Err(CoreError::DuplicateInitialState {
                existing: other.name().to_string(),
                state: state.name().to_string(),
            });
        }
        self.check_identity(&state)?;

        self.states
            .insert(state.name().to_string(), state.clone());
        self.initial = Some(state);
        Ok(())
    }

    /// Registers an edge.
    pub fn add_transition(
        &mut self,
        source: &StateRef,
        handler: &str,
        destination: &StateRef,
        direction: Option<&str>,
    ) -> Result<(), CoreError> {
        self.check_identity(source)?;
        self.check_identity(destination)?;
        self.check_initial_flag(source)?;
        self.check_initial_flag(destination)?;
        // An empty direction reads back as "no direction" from files
        if direction == Some("") {
            return Err(CoreError::EmptyDirection {
                source_state: source.name().to_string(),
                handler: handler.to_string(),
            });
        }

        let existing = self
            .edges
            .get(source.name())
            .and_then(|handlers| handlers.get(handler))
            .and_then(|directions| directions.get(&direction.map(str::to_string)));
        if let Some(existing) = existing {
            return Err(CoreError::DuplicateTransition {
                source_state: source.name().to_string(),
                handler: handler.to_string(),
                direction: direction.map(str::to_string),
                existing: existing.clone(),
            });
        }

        self.edges
            .entry(source.name().to_string())
            .or_default()
            .entry(handler.to_string())
            .or_default()
            .insert(
                direction.map(str::to_string),
                destination.name().to_string(),
            );
        self.states
            .insert(source.name().to_string(), source.clone());
        self.states
            .insert(destination.name().to_string(), destination.clone());

        tracing::debug!(
            "Added transition '{}' --{}[{:?}]--> '{}'",
            source.name(),
            handler,
            direction,
            destination.name()
        );

        Ok(())
    }

    /// Applies one handler/destination pair to several sources.
    ///
    /// Not atomic: edges added before a failing source stay in the table.
    pub fn add_transitions(
        &mut self,
        sources: &[StateRef],
        handler: &str,
        destination: &StateRef,
        direction: Option<&str>,
    ) -> Result<(), CoreError> {
        for source in sources {
            self.add_transition(source, handler, destination, direction)?;
        }
        Ok(())
    }

    /// Removes an edge and returns its destination.
    pub fn remove_transition(
        &mut self,
        source: &str,
        handler: &str,
        direction: Option<&str>,
    ) -> Result<StateRef, CoreError> {
        let not_found = || CoreError::TransitionNotFound {
            source_state: source.to_string(),
            handler: handler.to_string(),
            direction: direction.map(str::to_string),
        };

        let handlers = self.edges.get_mut(source).ok_or_else(not_found)?;
        let directions = handlers.get_mut(handler).ok_or_else(not_found)?;
        let destination = directions
            .remove(&direction.map(str::to_string))
            .ok_or_else(not_found)?;

        if directions.is_empty() {
            handlers.remove(handler);
        }
        if handlers.is_empty() {
            self.edges.remove(source);
        }

        let destination_ref = self
            .states
            .get(&destination)
            .cloned()
            .ok_or_else(not_found)?;

        self.forget_if_unused(source);
        self.forget_if_unused(&destination);

        tracing::debug!(
            "Removed transition '{}' --{}[{:?}]--> '{}'",
            source,
            handler,
            direction,
            destination
        );

        Ok(destination_ref)
    }

    /// Looks up the destination of an edge.
    pub fn get_destination(
        &self,
        source: &str,
        handler: &str,
        direction: Option<&str>,
    ) -> Result<StateRef, CoreError> {
        self.edges
            .get(source)
            .and_then(|handlers| handlers.get(handler))
            .and_then(|directions| directions.get(&direction.map(str::to_string)))
            .and_then(|destination| self.states.get(destination))
            .cloned()
            .ok_or_else(|| CoreError::TransitionNotFound {
                source_state: source.to_string(),
                handler: handler.to_string(),
                direction: direction.map(str::to_string),
            })
    }

    /// Returns true if exactly this edge exists.
    pub fn check_transition(
        &self,
        source: &str,
        destination: &str,
        handler: &str,
        direction: Option<&str>,
    ) -> bool {
        self.get_destination(source, handler, direction)
            .map(|d| d.name() == destination)
            .unwrap_or(false)
    }

    /// Returns true if any handler/direction leads from `source` to `destination`.
    pub fn connects(&self, source: &str, destination: &str) -> bool {
        self.edges
            .get(source)
            .map(|handlers| {
                handlers
                    .values()
                    .flat_map(|directions| directions.values())
                    .any(|d| d == destination)
            })
            .unwrap_or(false)
    }

    /// Live states, sorted by name.
    pub fn states(&self) -> Vec<StateRef> {
        let mut states: Vec<StateRef> = self.states.values().cloned().collect();
        states.sort_by(|a, b| a.name().cmp(b.name()));
        states
    }

    /// Looks up a live state by name.
    pub fn get_state(&self, name: &str) -> Option<StateRef> {
        self.states.get(name).cloned()
    }

    pub fn contains_state(&self, name: &str) -> bool {
        self.states.contains_key(name)
    }

    /// All handler keys used by at least one edge.
    pub fn handlers(&self) -> BTreeSet<String> {
        self.edges
            .values()
            .flat_map(|handlers| handlers.keys().cloned())
            .collect()
    }

    /// Handlers usable from the given state.
    pub fn handlers_from(&self, source: &str) -> Vec<&str> {
        let mut handlers: Vec<&str> = self
            .edges
            .get(source)
            .map(|h| h.keys().map(String::as_str).collect())
            .unwrap_or_default();
        handlers.sort_unstable();
        handlers
    }

    /// All edges in a stable order.
    pub fn edges(&self) -> Vec<Edge> {
        let mut edges = Vec::new();
        for (source, handlers) in &self.edges {
            for (handler, directions) in handlers {
                for (direction, destination) in directions {
                    edges.push(Edge {
                        source: source.clone(),
                        handler: handler.clone(),
                        direction: direction.clone(),
                        destination: destination.clone(),
                    });
                }
            }
        }
        edges.sort();
        edges
    }

    /// Number of edges.
    pub fn len(&self) -> usize {
        self.edges
            .values()
            .flat_map(|handlers| handlers.values())
            .map(|directions| directions.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Name-level view of the table, as written by adapters.
    pub fn to_raw(&self) -> RawTransitions {
        let mut raw = RawTransitions::new();
        for edge in self.edges() {
            raw.entry(edge.source)
                .or_default()
                .entry(edge.handler)
                .or_default()
                .insert(edge.direction, edge.destination);
        }
        raw
    }

    /// Rejects a second object claiming a name already bound here.
    fn check_identity(&self, state: &StateRef) -> Result<(), CoreError> {
        match self.states.get(state.name()) {
            Some(existing) if !same_object(existing, state) => Err(CoreError::StateConflict {
                state: state.name().to_string(),
            }),
            _ => Ok(()),
        }
    }

    fn check_initial_flag(&self, state: &StateRef) -> Result<(), CoreError> {
        if !state.is_initial() {
            return Ok(());
        }
        let existing = self.initial.as_ref().map(|s| s.name()).or_else(|| {
            self.states
                .values()
                .find(|s| s.is_initial())
                .map(|s| s.name())
        });
        match existing {
            Some(existing) if existing != state.name() => Err(CoreError::DuplicateInitialState {
                existing: existing.to_string(),
                state: state.name().to_string(),
            }),
            _ => Ok(()),
        }
    }

    fn forget_if_unused(&mut self, name: &str) {
        if self.initial.as_ref().map(|s| s.name()) == Some(name) {
            return;
        }
        let used_as_source = self.edges.contains_key(name);
        let used_as_destination = self
            .edges
            .values()
            .flat_map(|handlers| handlers.values())
            .flat_map(|directions| directions.values())
            .any(|d| d == name);
        if !used_as_source && !used_as_destination {
            self.states.remove(name);
        }
    }
}
