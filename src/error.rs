use thiserror::Error;

use crate::parse::ParseError;
use crate::serial::{DeserializeError, SerializeError};
use crate::{CompileError, ContractViolation, ScanError};

/// Unified error type covering parsing, compilation, scanning, the binary
/// format, and I/O.
///
/// Returned by [`Compiler`](crate::Compiler) source methods and convenience
/// functions like [`Rules::compile()`](crate::Rules::compile).
#[derive(Debug, Error)]
pub enum YarrowError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Serialize(#[from] SerializeError),

    #[error(transparent)]
    Deserialize(#[from] DeserializeError),

    #[error(transparent)]
    Contract(#[from] ContractViolation),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl YarrowError {
    /// Source line of a parse or compile error, when it has one.
    #[must_use]
    pub fn line(&self) -> Option<usize> {
        match self {
            YarrowError::Parse(e) => Some(e.line()),
            YarrowError::Compile(e) => Some(e.line()).filter(|&line| line > 0),
            _ => None,
        }
    }
}
