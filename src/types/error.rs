use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Semantic errors found while compiling parsed rules. Syntax errors are
/// reported separately as [`ParseError`](crate::parse::ParseError).
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("line {line}: duplicate rule '{rule}' in namespace '{namespace}'")]
    DuplicateRule {
        namespace: String,
        rule: String,
        line: usize,
    },

    #[error("line {line}: duplicate string '{string}' in rule '{rule}'")]
    DuplicateString {
        rule: String,
        string: String,
        line: usize,
    },

    #[error("line {line}: undefined string '{string}' in rule '{rule}'")]
    UndefinedString {
        rule: String,
        string: String,
        line: usize,
    },

    #[error("line {line}: unreferenced string '{string}' in rule '{rule}'")]
    UnreferencedString {
        rule: String,
        string: String,
        line: usize,
    },

    #[error("line {line}: rule '{rule}' uses 'them' but declares no strings")]
    EmptyStringSet { rule: String, line: usize },

    #[error("line {line}: undefined identifier '{identifier}' in rule '{rule}'")]
    UndefinedIdentifier {
        rule: String,
        identifier: String,
        line: usize,
    },

    #[error("line {line}: empty string '{string}' in rule '{rule}'")]
    EmptyString {
        rule: String,
        string: String,
        line: usize,
    },

    #[error(
        "line {line}: modifier '{modifier}' is not valid for string '{string}' in rule '{rule}'"
    )]
    InvalidModifier {
        rule: String,
        string: String,
        modifier: &'static str,
        line: usize,
    },

    #[error("line {line}: invalid pattern for string '{string}' in rule '{rule}': {message}")]
    InvalidPattern {
        rule: String,
        string: String,
        message: String,
        line: usize,
    },

    #[error("line {line}: cannot include '{path}': {message}")]
    Include {
        path: String,
        message: String,
        line: usize,
    },

    #[error("line {line}: include statements are disabled")]
    IncludesDisabled { line: usize },

    #[error("duplicate external variable '{name}'")]
    DuplicateVariable { name: String },

    #[error("cannot build pattern index: {message}")]
    Index { message: String },
}

impl CompileError {
    /// Source line the error refers to; `0` for errors without a location.
    #[must_use]
    pub fn line(&self) -> usize {
        match self {
            CompileError::DuplicateRule { line, .. }
            | CompileError::DuplicateString { line, .. }
            | CompileError::UndefinedString { line, .. }
            | CompileError::UnreferencedString { line, .. }
            | CompileError::EmptyStringSet { line, .. }
            | CompileError::UndefinedIdentifier { line, .. }
            | CompileError::EmptyString { line, .. }
            | CompileError::InvalidModifier { line, .. }
            | CompileError::InvalidPattern { line, .. }
            | CompileError::Include { line, .. }
            | CompileError::IncludesDisabled { line } => *line,
            CompileError::DuplicateVariable { .. } | CompileError::Index { .. } => 0,
        }
    }
}

/// Kind of child enumerated from a compiled rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildKind {
    Tags,
    Metadata,
    Strings,
}

impl fmt::Display for ChildKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChildKind::Tags => write!(f, "tags"),
            ChildKind::Metadata => write!(f, "metadata"),
            ChildKind::Strings => write!(f, "strings"),
        }
    }
}

/// A compiled structure broke an invariant the host layer relies on.
///
/// These indicate skew between the host layer and the engine records and are
/// never recovered from: the operation that hit one is aborted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractViolation {
    #[error("{kind} fill wrote {actual} entries, size query reported {expected}")]
    CountMismatch {
        kind: ChildKind,
        expected: usize,
        actual: usize,
    },

    #[error("{kind} fill left slot {index} empty")]
    UnfilledSlot { kind: ChildKind, index: usize },

    #[error("metadata '{identifier}' has unknown type discriminant {kind}")]
    UnknownMetaType { identifier: String, kind: i32 },

    #[error("string metadata '{identifier}' has no string payload")]
    MissingPayload { identifier: String },
}

/// Errors produced while scanning. Zero matches is never an error.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("cannot open '{}': {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot read scan input: {0}")]
    Read(#[source] std::io::Error),

    #[error("scan exceeded timeout of {timeout:?}")]
    Timeout { timeout: Duration },

    #[error(transparent)]
    Contract(#[from] ContractViolation),
}
