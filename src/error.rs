use thiserror::Error;

use crate::graph::Ident;
use crate::key::Key;

/// Errors of the [`Key`] algebra.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("Malformed key '{input}': {reason}")]
    Malformed { input: String, reason: &'static str },

    #[error("Cannot reorder dimensions of '{key}' as [{}]: not a permutation", .order.join(", "))]
    DimensionMismatch { key: Key, order: Vec<String> },
}

impl KeyError {
    pub(crate) fn malformed(input: impl Into<String>, reason: &'static str) -> Self {
        KeyError::Malformed {
            input: input.into(),
            reason,
        }
    }
}

/// Structural errors raised while building or resolving the graph.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Key '{0}' already exists in the graph; pass `overwrite` to replace it")]
    Collision(Ident),

    #[error("{}", not_found(.ident, .needed_by.as_ref()))]
    NotFound {
        ident: Ident,
        needed_by: Option<Ident>,
    },

    #[error("Key '{ident}' is ambiguous, candidates: {}", join(.candidates))]
    Ambiguous { ident: Ident, candidates: Vec<Key> },

    #[error("Cycle in graph: {}", cycle(.0))]
    Cycle(Vec<Ident>),

    #[error("Cannot store a task as data under '{0}'; use `add` instead")]
    TaskAsData(Ident),

    #[error("No default key is set")]
    NoDefault,

    #[error(transparent)]
    Key(#[from] KeyError),
}

fn not_found(ident: &Ident, needed_by: Option<&Ident>) -> String {
    match needed_by {
        Some(parent) => format!("Key '{ident}' not found in graph (required by '{parent}')"),
        None => format!("Key '{ident}' not found in graph"),
    }
}

fn join(keys: &[Key]) -> String {
    keys.iter()
        .map(|key| format!("'{key}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn cycle(path: &[Ident]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Errors raised by [`Computer::get`](crate::Computer::get).
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// The operation of `ident` failed; `source` is the operation's own error.
    #[error("Computing '{ident}' using {op}:\n{source}")]
    Task {
        ident: Ident,
        op: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Computing '{ident}': task panicked: {message}")]
    Panic { ident: Ident, message: String },

    #[error("Value of '{ident}' has type {found}, expected {expected}")]
    Type {
        ident: Ident,
        expected: &'static str,
        found: &'static str,
    },
}

impl ExecutionError {
    /// The identifier of the node that failed, if the failure came from a node.
    pub fn ident(&self) -> Option<&Ident> {
        match self {
            ExecutionError::Task { ident, .. }
            | ExecutionError::Panic { ident, .. }
            | ExecutionError::Type { ident, .. } => Some(ident),
            ExecutionError::Graph(_) => None,
        }
    }
}

/// Errors of the content-addressed cache.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error(
        "Argument '{param}' of '{function}' has type {type_name}, which has no registered encoder; \
         register one or ignore the parameter"
    )]
    Unencodable {
        function: String,
        param: String,
        type_name: &'static str,
    },

    #[error("Cache I/O error:\n{0}")]
    Io(#[from] std::io::Error),

    #[error("Couldn't encode cache entry for '{0}':\n{1}")]
    Encode(String, String),

    #[error("Couldn't decode cache entry {0}:\n{1}")]
    Decode(String, String),

    #[error(transparent)]
    Function(anyhow::Error),
}

/// Errors of [`Computer::configure`](crate::Computer::configure).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration section '{section}' must be {expected}")]
    Shape {
        section: String,
        expected: &'static str,
    },

    #[error("Configuration section '{section}' failed on {fragment}:\n{source}")]
    Handler {
        section: String,
        fragment: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Umbrella error for callers who do not care which layer failed.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
