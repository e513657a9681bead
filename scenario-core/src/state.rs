//! Dialog states and the callback contract.

use crate::error::CallbackError;
use crate::key::ConversationKey;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Shared handle to an application-defined state.
pub type StateRef = Arc<dyn State>;

/// How a transition was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    /// Forward along a table edge.
    Next,
    /// Back to the penultimate history entry.
    Back,
    /// Direct move to a state, bypassing the table.
    Migrate,
}

/// Everything a callback may need to know about the running transition.
///
/// Callbacks always receive the full context and ignore what they do not use.
#[derive(Debug, Clone)]
pub struct TransitionContext {
    pub key: ConversationKey,
    pub kind: TransitionKind,
    pub source: String,
    pub destination: String,
    pub handler: Option<String>,
    pub direction: Option<String>,
    /// Inbound event that triggered the transition.
    pub event: Value,
}

/// One point of a dialog.
///
/// A state's identity is its name: the table, the history and the
/// serialized form all refer to it by [`State::name`]. States are created by
/// the embedding application and shared with the engine as [`StateRef`].
#[async_trait]
pub trait State: Send + Sync + 'static {
    /// Stable identity, also the value written to conversation history.
    fn name(&self) -> &str;

    /// Whether this is the entry point of the dialog.
    fn is_initial(&self) -> bool {
        false
    }

    /// Runs when a conversation moves into this state.
    async fn process_enter(&self, _ctx: &TransitionContext) -> Result<(), CallbackError> {
        Ok(())
    }

    /// Runs when a conversation leaves this state.
    async fn process_exit(&self, _ctx: &TransitionContext) -> Result<(), CallbackError> {
        Ok(())
    }
}

impl fmt::Debug for dyn State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("name", &self.name())
            .field("is_initial", &self.is_initial())
            .finish()
    }
}

/// Returns true if both handles point at the same state object.
pub fn same_object(a: &StateRef, b: &StateRef) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// A state with no-op callbacks.
#[derive(Debug, Clone)]
pub struct NamedState {
    name: String,
    initial: bool,
}

impl NamedState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            initial: false,
        }
    }

    pub fn initial(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            initial: true,
        }
    }

    pub fn into_ref(self) -> StateRef {
        Arc::new(self)
    }
}

impl State for NamedState {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_initial(&self) -> bool {
        self.initial
    }
}
