//! Command implementations.

use crate::replay::{format_history, Outcome, ReplayState, StepReport, Trail};
use colored::Colorize;
use scenario_core::{
    CoreError, FileAdapter, MemoryAdapter, NameRewrite, RawTransitions, ScenarioEngine, StateRef,
    TransitionAdapter,
};
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::path::Path;

fn state_names(raw: &RawTransitions) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    for (source, by_handler) in raw {
        names.insert(source.clone());
        for directions in by_handler.values() {
            names.extend(directions.values().cloned());
        }
    }
    names
}

fn handler_names(raw: &RawTransitions) -> BTreeSet<String> {
    raw.values()
        .flat_map(|by_handler| by_handler.keys().cloned())
        .collect()
}

/// Loads a transitions file into `engine`, creating one state per name.
///
/// With `initial`, that state is flagged initial and pinned first; it need not
/// appear in the file. Returns the number of edges imported.
pub fn load_transitions(
    engine: &ScenarioEngine,
    path: &Path,
    initial: Option<&str>,
    trail: &Trail,
) -> Result<usize, CoreError> {
    let raw = FileAdapter::for_path(path)?.read()?;

    let mut names = state_names(&raw);
    if let Some(initial) = initial {
        names.insert(initial.to_string());
    }
    let states: Vec<StateRef> = names
        .iter()
        .map(|name| {
            ReplayState::new(name.as_str(), Some(name.as_str()) == initial, trail.clone())
                .into_ref()
        })
        .collect();

    if let Some(initial) = initial {
        if let Some(state) = states.iter().find(|s| s.name() == initial) {
            engine.set_initial_state(state.clone())?;
        }
    }

    let handlers = handler_names(&raw);
    let handlers: Vec<&str> = handlers.iter().map(String::as_str).collect();
    engine.import_transitions(&MemoryAdapter::new(raw), &states, &handlers)
}

/// Summary of a transitions file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckReport {
    pub states: Vec<String>,
    pub edges: usize,
    pub handlers: Vec<String>,
    /// States with no path from the initial state; `None` without one.
    pub unreachable: Option<Vec<String>>,
}

impl CheckReport {
    pub fn render(&self, path: &Path) -> String {
        let mut out = format!("{}\n", format!("Transitions {}", path.display()).bold());
        out.push_str(&format!(
            "  {:<12} {}\n",
            "States:",
            self.states.join(", ").cyan()
        ));
        out.push_str(&format!("  {:<12} {}\n", "Edges:", self.edges));
        out.push_str(&format!(
            "  {:<12} {}\n",
            "Handlers:",
            self.handlers.join(", ")
        ));
        match &self.unreachable {
            Some(states) if states.is_empty() => {
                out.push_str(&format!("  {:<12} {}\n", "Unreachable:", "none".green()));
            }
            Some(states) => {
                out.push_str(&format!(
                    "  {:<12} {}\n",
                    "Unreachable:",
                    states.join(", ").yellow()
                ));
            }
            None => {}
        }
        out
    }
}

/// Validates a transitions file and reports its shape.
pub fn check(path: &Path, initial: Option<&str>) -> Result<CheckReport, CoreError> {
    let engine = ScenarioEngine::in_memory(Default::default());
    let edges = load_transitions(&engine, path, initial, &Trail::default())?;
    let table = engine.table();

    let states: Vec<String> = table.states().iter().map(|s| s.name().to_string()).collect();
    let unreachable = initial.map(|initial| {
        let mut seen: HashSet<String> = HashSet::new();
        let mut queue = VecDeque::from([initial.to_string()]);
        let all_edges = table.edges();
        while let Some(name) = queue.pop_front() {
            if !seen.insert(name.clone()) {
                continue;
            }
            for edge in all_edges.iter().filter(|e| e.source == name) {
                queue.push_back(edge.destination.clone());
            }
        }
        states
            .iter()
            .filter(|name| !seen.contains(*name))
            .cloned()
            .collect()
    });

    Ok(CheckReport {
        states,
        edges,
        handlers: table.handlers().into_iter().collect(),
        unreachable,
    })
}

/// Rewrites a transitions file in the format of `output`.
///
/// Returns the number of source states written.
pub fn convert(input: &Path, output: &Path, rewrite: NameRewrite) -> Result<usize, CoreError> {
    let raw = FileAdapter::for_path(input)?.with_rewrite(rewrite).read()?;
    FileAdapter::for_path(output)?.write(&raw)?;
    Ok(raw.len())
}

/// Renders one replay step.
pub fn render_step(report: &StepReport) -> String {
    let status = match &report.outcome {
        Outcome::Moved { from, to } => format!("{} {} -> {}", "moved".green(), from, to.cyan()),
        Outcome::Suppressed => "suppressed".yellow().to_string(),
        Outcome::Missed(reason) => format!("{} {}", "missed".yellow(), reason),
        Outcome::Reset => "reset".green().to_string(),
    };

    let mut out = format!(
        "{:>4}  {:<24} {}\n",
        report.line,
        report.step.to_string().bold(),
        status
    );
    if !report.callbacks.is_empty() {
        out.push_str(&format!("      {}\n", report.callbacks.join(", ").dimmed()));
    }
    out.push_str(&format!("      history: {}\n", format_history(&report.history)));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const DIALOG: &str = r#"{
        "Initial": {"start": "Menu"},
        "Menu": {"select": {"left": "Detail", "right": "Settings"}},
        "Detail": {"back_to_menu": "Menu"},
        "Orphan": {"start": "Menu"}
    }"#;

    fn write_dialog(dir: &TempDir) -> std::path::PathBuf {
        let path = dir.path().join("dialog.json");
        std::fs::write(&path, DIALOG).unwrap();
        path
    }

    #[test]
    fn test_check_reports_unreachable() {
        let dir = TempDir::new().unwrap();
        let path = write_dialog(&dir);

        let report = check(&path, Some("Initial")).unwrap();
        assert_eq!(
            report.states,
            vec!["Detail", "Initial", "Menu", "Orphan", "Settings"]
        );
        assert_eq!(report.edges, 5);
        assert_eq!(report.handlers, vec!["back_to_menu", "select", "start"]);
        assert_eq!(report.unreachable, Some(vec!["Orphan".to_string()]));
        assert!(report.render(&path).contains("Orphan"));
    }

    #[test]
    fn test_check_without_initial() {
        let dir = TempDir::new().unwrap();
        let path = write_dialog(&dir);

        let report = check(&path, None).unwrap();
        assert_eq!(report.unreachable, None);
        assert_eq!(report.states.len(), 5);
    }

    #[test]
    fn test_check_rejects_bad_names() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{"Initial": {"go on": "Menu"}}"#).unwrap();
        assert!(matches!(
            check(&path, Some("Initial")),
            Err(CoreError::Import { .. })
        ));
    }

    #[test]
    fn test_convert_json_to_yaml() {
        let dir = TempDir::new().unwrap();
        let input = write_dialog(&dir);
        let output = dir.path().join("dialog.yaml");

        let rewrite = NameRewrite {
            states_prefix: Some("Bot".to_string()),
            ..Default::default()
        };
        assert_eq!(convert(&input, &output, rewrite).unwrap(), 4);

        let raw = FileAdapter::for_path(&output).unwrap().read().unwrap();
        assert!(raw.contains_key("BotInitial"));
        assert_eq!(raw["BotInitial"]["start"][&None::<String>], "BotMenu");
    }

    #[test]
    fn test_convert_unknown_extension() {
        let dir = TempDir::new().unwrap();
        let input = write_dialog(&dir);
        let output = dir.path().join("dialog.csv");
        assert!(convert(&input, &output, NameRewrite::default()).is_err());
    }
}
