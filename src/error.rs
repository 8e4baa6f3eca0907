//! Error taxonomy and source location tracking.
//!
//! Every front-end error carries a [`SourceLoc`]; runtime errors carry
//! whatever context is available. Each variant maps to a stable kind string
//! used in `error.json`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::path::PathBuf;
use thiserror::Error;

/// Position of a construct within a WDL source document.
///
/// Lines and columns are one-based; `uri` is the import spelling while
/// `abspath` is the resolved location.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceLoc {
    pub uri: String,
    pub abspath: String,
    pub line: u32,
    pub column: u32,
    pub end_line: u32,
    pub end_column: u32,
}

impl SourceLoc {
    pub fn new(
        uri: impl Into<String>,
        line: u32,
        column: u32,
        end_line: u32,
        end_column: u32,
    ) -> Self {
        let uri = uri.into();
        Self {
            abspath: uri.clone(),
            uri,
            line,
            column,
            end_line,
            end_column,
        }
    }

    /// A placeholder location for errors synthesized outside any document.
    pub fn unknown() -> Self {
        Self::default()
    }
}

impl std::fmt::Display for SourceLoc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.uri, self.line, self.column)
    }
}

/// Sub-kinds of static type errors. The kind string of the overall error is
/// the variant name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeIssue {
    StaticTypeMismatch,
    NoSuchFunction,
    NoSuchMember,
    IncompatibleOperand,
    NameCollision,
    ForwardReference,
    QuantityCoercion,
    NoSuchName,
    CircularDefinition,
}

impl TypeIssue {
    pub fn kind(&self) -> &'static str {
        match self {
            TypeIssue::StaticTypeMismatch => "StaticTypeMismatch",
            TypeIssue::NoSuchFunction => "NoSuchFunction",
            TypeIssue::NoSuchMember => "NoSuchMember",
            TypeIssue::IncompatibleOperand => "IncompatibleOperand",
            TypeIssue::NameCollision => "NameCollision",
            TypeIssue::ForwardReference => "ForwardReference",
            TypeIssue::QuantityCoercion => "QuantityCoercion",
            TypeIssue::NoSuchName => "NoSuchName",
            TypeIssue::CircularDefinition => "CircularDefinition",
        }
    }
}

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Lexing failure (malformed token, unterminated string).
    #[error("({loc}) Lexical error: {message}")]
    Lexical { loc: SourceLoc, message: String },

    /// Parse failure after successful lexing.
    #[error("({loc}) Syntax error: {message}")]
    Syntax { loc: SourceLoc, message: String },

    /// Import cycle, unknown URI, or failure parsing an imported document.
    #[error("({loc}) Failed to import {uri}: {message}")]
    Import {
        loc: SourceLoc,
        uri: String,
        message: String,
    },

    /// Static type error; `issue` selects the reported kind string.
    #[error("({loc}) {message}")]
    Static {
        loc: SourceLoc,
        issue: TypeIssue,
        message: String,
    },

    /// Bad or missing run inputs.
    #[error("Input error: {message}")]
    Input { message: String },

    /// Runtime failure evaluating an expression.
    #[error("({loc}) Evaluation error: {message}")]
    Eval { loc: SourceLoc, message: String },

    /// Missing file, or a task output escaping its working directory.
    #[error("Filesystem error: {message}")]
    Filesystem {
        message: String,
        path: Option<PathBuf>,
    },

    /// Task command exited with a non-accepted status.
    #[error("task failed with exit status {exit_status} (attempt {attempt})")]
    TaskFailure {
        exit_status: i64,
        stderr_path: PathBuf,
        attempt: u32,
    },

    /// Command placeholder value rejected by the configured guard regex.
    #[error("({loc}) Command error: {message}")]
    Command { loc: SourceLoc, message: String },

    /// User cancellation.
    #[error("interrupted")]
    Interrupted,

    /// Malformed configuration or unsupported backend.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Internal runtime failure that fits no other variant.
    #[error("Runtime error: {message}")]
    Runtime { message: String },
}

impl Error {
    pub fn syntax(loc: SourceLoc, message: impl Into<String>) -> Self {
        Error::Syntax {
            loc,
            message: message.into(),
        }
    }

    pub fn lexical(loc: SourceLoc, message: impl Into<String>) -> Self {
        Error::Lexical {
            loc,
            message: message.into(),
        }
    }

    pub fn import(loc: SourceLoc, uri: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Import {
            loc,
            uri: uri.into(),
            message: message.into(),
        }
    }

    pub fn type_mismatch(loc: SourceLoc, expected: &str, actual: &str) -> Self {
        let mut message = format!("Expected {} instead of {}", expected, actual);
        if expected == "Int" && actual == "Float" {
            message.push_str("; perhaps try floor() or round()");
        } else if actual.trim_end_matches('?') == expected {
            message.push_str(
                "; to coerce T? into T, try select_first([x, default]) or select_first([x])",
            );
        }
        Error::Static {
            loc,
            issue: TypeIssue::StaticTypeMismatch,
            message,
        }
    }

    pub fn static_issue(loc: SourceLoc, issue: TypeIssue, message: impl Into<String>) -> Self {
        Error::Static {
            loc,
            issue,
            message: message.into(),
        }
    }

    pub fn input(message: impl Into<String>) -> Self {
        Error::Input {
            message: message.into(),
        }
    }

    pub fn eval(loc: SourceLoc, message: impl Into<String>) -> Self {
        Error::Eval {
            loc,
            message: message.into(),
        }
    }

    pub fn filesystem(message: impl Into<String>, path: Option<PathBuf>) -> Self {
        Error::Filesystem {
            message: message.into(),
            path,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Error::Configuration {
            message: message.into(),
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Error::Runtime {
            message: message.into(),
        }
    }

    /// Stable kind string for `error.json`.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Lexical { .. } => "LexicalError",
            Error::Syntax { .. } => "SyntaxError",
            Error::Import { .. } => "ImportError",
            Error::Static { issue, .. } => issue.kind(),
            Error::Input { .. } => "InputError",
            Error::Eval { .. } => "EvalError",
            Error::Filesystem { .. } => "FilesystemError",
            Error::TaskFailure { .. } => "TaskFailure",
            Error::Command { .. } => "CommandError",
            Error::Interrupted => "Interrupted",
            Error::Configuration { .. } => "ConfigurationError",
            Error::Runtime { .. } => "RuntimeError",
        }
    }

    /// Source location, when the error is anchored to one.
    pub fn loc(&self) -> Option<&SourceLoc> {
        match self {
            Error::Lexical { loc, .. }
            | Error::Syntax { loc, .. }
            | Error::Import { loc, .. }
            | Error::Static { loc, .. }
            | Error::Eval { loc, .. }
            | Error::Command { loc, .. } => Some(loc),
            _ => None,
        }
    }

    /// The `error.json` wire form: `{"error": KIND, "pos": {...}, "cause": {...}}`.
    pub fn to_error_json(&self) -> JsonValue {
        let mut obj = json!({
            "error": self.kind(),
            "message": self.to_string(),
        });
        if let Some(loc) = self.loc() {
            obj["pos"] = json!({
                "source": loc.uri,
                "line": loc.line,
                "column": loc.column,
            });
        }
        if let Error::TaskFailure {
            exit_status,
            stderr_path,
            attempt,
        } = self
        {
            obj["cause"] = json!({
                "exit_status": exit_status,
                "stderr_file": stderr_path.display().to_string(),
                "attempt": attempt,
            });
        }
        obj
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Filesystem {
            message: e.to_string(),
            path: None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Input {
            message: format!("invalid JSON: {}", e),
        }
    }
}

/// Collects several static errors so checking can continue past the first
/// failure, then reports them ordered by source position.
#[derive(Default)]
pub struct ErrorSink {
    errors: Vec<Error>,
}

impl ErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: Error) {
        self.errors.push(error);
    }

    pub fn capture<T>(&mut self, result: Result<T, Error>) -> Option<T> {
        match result {
            Ok(v) => Some(v),
            Err(e) => {
                self.errors.push(e);
                None
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Errors ordered by source position, unanchored ones last.
    pub fn into_sorted(mut self) -> Vec<Error> {
        self.errors.sort_by(|a, b| match (a.loc(), b.loc()) {
            (Some(x), Some(y)) => x.cmp(y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });
        self.errors
    }

    /// Finish: `Ok(())` when empty, otherwise the earliest error.
    pub fn finish(self) -> Result<(), Error> {
        let mut sorted = self.into_sorted();
        if sorted.is_empty() {
            Ok(())
        } else {
            Err(sorted.remove(0))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(line: u32, col: u32) -> SourceLoc {
        SourceLoc::new("t.wdl", line, col, line, col + 1)
    }

    #[test]
    fn kind_strings_are_stable() {
        assert_eq!(Error::syntax(loc(1, 1), "x").kind(), "SyntaxError");
        assert_eq!(Error::input("x").kind(), "InputError");
        assert_eq!(
            Error::static_issue(loc(1, 1), TypeIssue::QuantityCoercion, "x").kind(),
            "QuantityCoercion"
        );
        assert_eq!(Error::Interrupted.kind(), "Interrupted");
    }

    #[test]
    fn mismatch_hint_for_float_to_int() {
        let e = Error::type_mismatch(loc(3, 7), "Int", "Float");
        assert!(e.to_string().contains("floor() or round()"));
    }

    #[test]
    fn mismatch_hint_for_optional() {
        let e = Error::type_mismatch(loc(3, 7), "Int", "Int?");
        assert!(e.to_string().contains("select_first"));
    }

    #[test]
    fn error_json_shape() {
        let e = Error::syntax(loc(2, 5), "unexpected token");
        let j = e.to_error_json();
        assert_eq!(j["error"], "SyntaxError");
        assert_eq!(j["pos"]["line"], 2);
        assert_eq!(j["pos"]["column"], 5);
        assert_eq!(j["pos"]["source"], "t.wdl");
    }

    #[test]
    fn sink_orders_by_position() {
        let mut sink = ErrorSink::new();
        sink.push(Error::syntax(loc(9, 1), "later"));
        sink.push(Error::syntax(loc(2, 1), "earlier"));
        let first = sink.finish().unwrap_err();
        assert!(first.to_string().contains("earlier"));
    }

    #[test]
    fn task_failure_cause_in_json() {
        let e = Error::TaskFailure {
            exit_status: 3,
            stderr_path: PathBuf::from("/run/call-x/stderr.txt"),
            attempt: 2,
        };
        let j = e.to_error_json();
        assert_eq!(j["error"], "TaskFailure");
        assert_eq!(j["cause"]["exit_status"], 3);
        assert_eq!(j["cause"]["attempt"], 2);
    }
}
