//! Import and export of transition tables.
//!
//! On disk a table is a three-level map `source -> handler -> destination`.
//! A handler without directions maps straight to a destination name; a handler
//! with directions maps to a `direction -> destination` object, where the
//! empty key `""` stands for "no direction":
//!
//! ```json
//! {
//!   "Initial": { "start": "Menu" },
//!   "Menu": { "select": { "details": "Detail", "": "Help" } }
//! }
//! ```
//!
//! Both forms are accepted on read. On write, a handler whose only edge has
//! no direction is written as a bare string.

use crate::error::CoreError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Name-level transition table: source -> handler -> direction -> destination.
pub type RawTransitions = BTreeMap<String, BTreeMap<String, BTreeMap<Option<String>, String>>>;

/// Key used on disk for edges without a direction.
const NO_DIRECTION: &str = "";

/// Reads and writes transition tables in some external representation.
pub trait TransitionAdapter: Send + Sync {
    fn read(&self) -> Result<RawTransitions, CoreError>;

    fn write(&self, transitions: &RawTransitions) -> Result<(), CoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
enum RawDestination {
    Bare(String),
    Directed(BTreeMap<String, String>),
}

type Document = BTreeMap<String, BTreeMap<String, RawDestination>>;

fn from_document(document: Document) -> RawTransitions {
    document
        .into_iter()
        .map(|(source, handlers)| {
            let handlers = handlers
                .into_iter()
                .map(|(handler, destination)| {
                    let directions = match destination {
                        RawDestination::Bare(name) => BTreeMap::from([(None, name)]),
                        RawDestination::Directed(map) => map
                            .into_iter()
                            .map(|(direction, name)| {
                                let direction = (direction != NO_DIRECTION).then_some(direction);
                                (direction, name)
                            })
                            .collect(),
                    };
                    (handler, directions)
                })
                .collect();
            (source, handlers)
        })
        .collect()
}

fn to_document(transitions: &RawTransitions) -> Document {
    transitions
        .iter()
        .map(|(source, handlers)| {
            let handlers = handlers
                .iter()
                .map(|(handler, directions)| {
                    let destination = match directions.get(&None::<String>) {
                        Some(name) if directions.len() == 1 => RawDestination::Bare(name.clone()),
                        _ => RawDestination::Directed(
                            directions
                                .iter()
                                .map(|(direction, name)| {
                                    let key = direction.as_deref().unwrap_or(NO_DIRECTION);
                                    (key.to_string(), name.clone())
                                })
                                .collect(),
                        ),
                    };
                    (handler.clone(), destination)
                })
                .collect();
            (source.clone(), handlers)
        })
        .collect()
}

/// Returns true for `[A-Za-z_][A-Za-z0-9_]*`.
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Rejects state and handler names that are not identifiers.
pub fn validate_names(transitions: &RawTransitions) -> Result<(), CoreError> {
    for (source, handlers) in transitions {
        check_name("state", source)?;
        for (handler, directions) in handlers {
            check_name("handler", handler)?;
            if directions.is_empty() {
                return Err(CoreError::Import {
                    reason: format!("handler '{}' of state '{}' has no destination", handler, source),
                });
            }
            for destination in directions.values() {
                check_name("state", destination)?;
            }
        }
    }
    Ok(())
}

fn check_name(kind: &str, name: &str) -> Result<(), CoreError> {
    if is_valid_name(name) {
        Ok(())
    } else {
        Err(CoreError::Import {
            reason: format!("{} '{}' has an invalid name", kind, name),
        })
    }
}

/// Prefix/postfix rewriting applied to names after reading.
///
/// Lets one file describe a dialog that the application registered under
/// namespaced names, e.g. `Menu` in the file and `order_Menu` in code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameRewrite {
    pub states_prefix: Option<String>,
    pub states_postfix: Option<String>,
    pub handlers_prefix: Option<String>,
    pub handlers_postfix: Option<String>,
}

impl NameRewrite {
    pub fn is_identity(&self) -> bool {
        self.states_prefix.is_none()
            && self.states_postfix.is_none()
            && self.handlers_prefix.is_none()
            && self.handlers_postfix.is_none()
    }

    pub fn apply(&self, transitions: RawTransitions) -> RawTransitions {
        if self.is_identity() {
            return transitions;
        }
        transitions
            .into_iter()
            .map(|(source, handlers)| {
                let handlers = handlers
                    .into_iter()
                    .map(|(handler, directions)| {
                        let directions = directions
                            .into_iter()
                            .map(|(direction, destination)| (direction, self.state(&destination)))
                            .collect();
                        (self.handler(&handler), directions)
                    })
                    .collect();
                (self.state(&source), handlers)
            })
            .collect()
    }

    fn state(&self, name: &str) -> String {
        affix(name, &self.states_prefix, &self.states_postfix)
    }

    fn handler(&self, name: &str) -> String {
        affix(name, &self.handlers_prefix, &self.handlers_postfix)
    }
}

fn affix(name: &str, prefix: &Option<String>, postfix: &Option<String>) -> String {
    format!(
        "{}{}{}",
        prefix.as_deref().unwrap_or_default(),
        name,
        postfix.as_deref().unwrap_or_default()
    )
}

/// Serialization format of a transitions file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Json,
    Yaml,
}

impl FileFormat {
    /// Picks the format from the file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "json" => Some(FileFormat::Json),
            "yaml" | "yml" => Some(FileFormat::Yaml),
            _ => None,
        }
    }

    pub fn parse(self, content: &str) -> Result<RawTransitions, CoreError> {
        let document: Document = match self {
            FileFormat::Json => serde_json::from_str(content)?,
            FileFormat::Yaml => serde_yaml::from_str(content)?,
        };
        Ok(from_document(document))
    }

    pub fn render(self, transitions: &RawTransitions) -> Result<String, CoreError> {
        let document = to_document(transitions);
        Ok(match self {
            FileFormat::Json => serde_json::to_string_pretty(&document)?,
            FileFormat::Yaml => serde_yaml::to_string(&document)?,
        })
    }
}

/// File-backed adapter shared by the JSON and YAML front ends.
#[derive(Debug, Clone)]
pub struct FileAdapter {
    path: PathBuf,
    format: FileFormat,
    rewrite: NameRewrite,
}

impl FileAdapter {
    pub fn new(path: impl Into<PathBuf>, format: FileFormat) -> Self {
        Self {
            path: path.into(),
            format,
            rewrite: NameRewrite::default(),
        }
    }

    /// Builds an adapter whose format follows the file extension.
    pub fn for_path(path: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let path = path.into();
        let format = FileFormat::from_path(&path).ok_or_else(|| CoreError::Import {
            reason: format!("unsupported transitions file: {}", path.display()),
        })?;
        Ok(Self::new(path, format))
    }

    pub fn with_rewrite(mut self, rewrite: NameRewrite) -> Self {
        self.rewrite = rewrite;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> FileFormat {
        self.format
    }
}

impl TransitionAdapter for FileAdapter {
    fn read(&self) -> Result<RawTransitions, CoreError> {
        let content = std::fs::read_to_string(&self.path)?;
        let transitions = self.format.parse(&content)?;
        validate_names(&transitions)?;
        Ok(self.rewrite.apply(transitions))
    }

    fn write(&self, transitions: &RawTransitions) -> Result<(), CoreError> {
        let content = self.format.render(transitions)?;
        std::fs::write(&self.path, content)?;
        tracing::debug!(
            "Wrote {} source states to {}",
            transitions.len(),
            self.path.display()
        );
        Ok(())
    }
}

/// JSON transitions file.
pub struct JsonAdapter;

impl JsonAdapter {
    #[allow(clippy::new_ret_no_self)]
    pub fn new(path: impl Into<PathBuf>) -> FileAdapter {
        FileAdapter::new(path, FileFormat::Json)
    }
}

/// YAML transitions file.
pub struct YamlAdapter;

impl YamlAdapter {
    #[allow(clippy::new_ret_no_self)]
    pub fn new(path: impl Into<PathBuf>) -> FileAdapter {
        FileAdapter::new(path, FileFormat::Yaml)
    }
}

/// Adapter holding the table in memory.
#[derive(Debug, Default)]
pub struct MemoryAdapter {
    transitions: Mutex<RawTransitions>,
}

impl MemoryAdapter {
    pub fn new(transitions: RawTransitions) -> Self {
        Self {
            transitions: Mutex::new(transitions),
        }
    }

    /// Returns a copy of the held table.
    pub fn snapshot(&self) -> RawTransitions {
        self.transitions.lock().clone()
    }
}

impl TransitionAdapter for MemoryAdapter {
    fn read(&self) -> Result<RawTransitions, CoreError> {
        let transitions = self.snapshot();
        validate_names(&transitions)?;
        Ok(transitions)
    }

    fn write(&self, transitions: &RawTransitions) -> Result<(), CoreError> {
        *self.transitions.lock() = transitions.clone();
        Ok(())
    }
}
