//! Scripted conversations.
//!
//! A script is one step per line:
//!
//! ```text
//! # comments and blank lines are skipped
//! next start
//! next select left
//! back
//! migrate Menu
//! reset
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use scenario_core::{
    CallbackError, ConversationKey, CoreError, HistoryEntry, ScenarioEngine, State, StateRef,
    TransitionContext,
};
use serde_json::json;
use std::fmt;
use std::sync::Arc;

/// One script instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Next {
        handler: String,
        direction: Option<String>,
    },
    Back,
    Migrate(String),
    Reset,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Next {
                handler,
                direction: Some(direction),
            } => write!(f, "next {} {}", handler, direction),
            Step::Next { handler, .. } => write!(f, "next {}", handler),
            Step::Back => f.write_str("back"),
            Step::Migrate(state) => write!(f, "migrate {}", state),
            Step::Reset => f.write_str("reset"),
        }
    }
}

/// A malformed script line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptError {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "script line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ScriptError {}

/// Parses a script into `(line number, step)` pairs.
pub fn parse_script(source: &str) -> Result<Vec<(usize, Step)>, ScriptError> {
    let mut steps = Vec::new();

    for (idx, raw) in source.lines().enumerate() {
        let line = idx + 1;
        let text = raw.trim();
        if text.is_empty() || text.starts_with('#') {
            continue;
        }

        let words: Vec<&str> = text.split_whitespace().collect();
        let error = |message: &str| ScriptError {
            line,
            message: message.to_string(),
        };
        let step = match words.as_slice() {
            ["next", handler] => Step::Next {
                handler: handler.to_string(),
                direction: None,
            },
            ["next", handler, direction] => Step::Next {
                handler: handler.to_string(),
                direction: Some(direction.to_string()),
            },
            ["next", ..] => return Err(error("usage: next <handler> [direction]")),
            ["back"] => Step::Back,
            ["migrate", state] => Step::Migrate(state.to_string()),
            ["migrate", ..] => return Err(error("usage: migrate <state>")),
            ["reset"] => Step::Reset,
            [other, ..] => return Err(error(&format!("unknown command '{}'", other))),
            [] => continue,
        };
        steps.push((line, step));
    }

    Ok(steps)
}

/// Callbacks fired during one step, in order.
pub type Trail = Arc<Mutex<Vec<String>>>;

/// A state that records its callbacks into a shared [`Trail`].
pub struct ReplayState {
    name: String,
    initial: bool,
    trail: Trail,
}

impl ReplayState {
    pub fn new(name: impl Into<String>, initial: bool, trail: Trail) -> Self {
        Self {
            name: name.into(),
            initial,
            trail,
        }
    }

    pub fn into_ref(self) -> StateRef {
        Arc::new(self)
    }
}

#[async_trait]
impl State for ReplayState {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_initial(&self) -> bool {
        self.initial
    }

    async fn process_enter(&self, _ctx: &TransitionContext) -> Result<(), CallbackError> {
        self.trail.lock().push(format!("enter {}", self.name));
        Ok(())
    }

    async fn process_exit(&self, _ctx: &TransitionContext) -> Result<(), CallbackError> {
        self.trail.lock().push(format!("exit {}", self.name));
        Ok(())
    }
}

/// What a step did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Moved { from: String, to: String },
    /// Dropped because another transition held the lock.
    Suppressed,
    /// No matching edge or nothing to go back to.
    Missed(String),
    Reset,
}

/// Result of one script step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub line: usize,
    pub step: Step,
    pub outcome: Outcome,
    pub callbacks: Vec<String>,
    pub history: Vec<HistoryEntry>,
}

/// Runs `steps` against one conversation.
///
/// Navigation misses are reported and the script goes on; any other error
/// stops it.
pub async fn run_script(
    engine: &ScenarioEngine,
    key: ConversationKey,
    steps: &[(usize, Step)],
    trail: &Trail,
) -> Result<Vec<StepReport>, CoreError> {
    let mut reports = Vec::with_capacity(steps.len());

    for (line, step) in steps {
        trail.lock().clear();
        let event = json!({ "line": line, "step": step.to_string() });

        let result = match step {
            Step::Next { handler, direction } => {
                engine
                    .execute_next_transition(key, handler, direction.as_deref(), event)
                    .await
            }
            Step::Back => engine.execute_back_transition(key, event).await,
            Step::Migrate(state) => engine.migrate_to_state(key, state, event).await,
            Step::Reset => {
                engine.reset_history(key).await?;
                reports.push(StepReport {
                    line: *line,
                    step: step.clone(),
                    outcome: Outcome::Reset,
                    callbacks: Vec::new(),
                    history: engine.get_history(key).await?,
                });
                continue;
            }
        };

        let outcome = match result {
            Ok(result) if result.applied => Outcome::Moved {
                from: result.from_state,
                to: result.to_state,
            },
            Ok(_) => Outcome::Suppressed,
            Err(e) if e.is_navigation_miss() => Outcome::Missed(e.to_string()),
            Err(e) => return Err(e),
        };

        let callbacks = std::mem::take(&mut *trail.lock());
        reports.push(StepReport {
            line: *line,
            step: step.clone(),
            outcome,
            callbacks,
            history: engine.get_history(key).await?,
        });
    }

    Ok(reports)
}

/// Renders a history as `A > B > C`.
pub fn format_history(history: &[HistoryEntry]) -> String {
    history
        .iter()
        .map(|entry| entry.as_deref().unwrap_or("null"))
        .collect::<Vec<_>>()
        .join(" > ")
}
