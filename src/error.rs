//! Error taxonomy shared across the runtime
//!
//! Only `ConfigurationError` is fatal. Everything else is recovered close to
//! where it happens: knowledge errors become diagnostics, tool and validation
//! errors become text fed back to the model, recursion errors become the
//! result text of the offending agent tool.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Bad construction parameters. Returned from constructors, never from a run.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("invalid agent name '{0}': use letters, digits, '_' or '-'")]
    InvalidName(String),

    #[error("invalid value for '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("knowledge file not found: {}", .0.display())]
    MissingKnowledge(PathBuf),

    #[error("cannot prepare directory {}: {source}", path.display())]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to load {}: {reason}", path.display())]
    Load { path: PathBuf, reason: String },

    #[error("prompt template error: {0}")]
    Template(String),

    #[error(transparent)]
    Provider(#[from] crate::provider::ProviderError),
}

/// A knowledge heading that could not be turned into an item.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{}:{line}: {reason} (heading: {heading:?})", path.display())]
pub struct KnowledgeParseError {
    pub path: PathBuf,
    pub line: usize,
    pub heading: String,
    pub reason: String,
}

/// Failure inside a tool body.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("exited with code {code}: {output}")]
    NonZeroExit { code: i32, output: String },

    #[error("cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

/// A decision or a parameter set the loop cannot act on.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("response named no action; call one of the available tools or finish")]
    MissingAction,

    #[error("unknown tool '{name}'; available: {}", available.join(", "))]
    UnknownTool { name: String, available: Vec<String> },

    #[error("arguments for '{tool}' must be a JSON object: {reason}")]
    MalformedArguments { tool: String, reason: String },

    #[error("missing required parameter '{param}' for '{tool}'")]
    MissingParameter { tool: String, param: String },

    #[error("parameter '{param}' for '{tool}' must be {expected}, got {found}")]
    TypeMismatch {
        tool: String,
        param: String,
        expected: &'static str,
        found: String,
    },
}

/// Raised by agent tools before entering a nested loop.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecursionError {
    #[error("recursive call refused: agent '{agent}' is already running ({stack})")]
    Cycle { agent: String, stack: String },

    #[error("call depth {depth} reached the limit of {max} at agent '{agent}'")]
    DepthExceeded {
        agent: String,
        depth: usize,
        max: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_tool_lists_available() {
        let err = ValidationError::UnknownTool {
            name: "nope".into(),
            available: vec!["read_file".into(), "shell".into()],
        };
        assert_eq!(
            err.to_string(),
            "unknown tool 'nope'; available: read_file, shell"
        );
    }

    #[test]
    fn test_parse_error_display() {
        let err = KnowledgeParseError {
            path: PathBuf::from("k/a.md"),
            line: 7,
            heading: "## function".into(),
            reason: "missing @name".into(),
        };
        assert!(err.to_string().starts_with("k/a.md:7: missing @name"));
    }
}
