mod compiler;
mod error;
pub(crate) mod expr;
mod flags;
mod matches;
pub(crate) mod meta;
mod pattern;
pub(crate) mod raw;
mod rule;
mod rules;
mod value;

pub use compiler::Compiler;
pub use error::{ChildKind, CompileError, ContractViolation, ScanError};
pub use expr::{CompareOp, Expr, Quantifier, StringSet};
pub use flags::ModifierFlags;
pub use matches::{Match, MatchString, ScanFlags};
pub use meta::{MetaValue, Metadata};
pub use pattern::{HexToken, Pattern};
pub use rule::{Rule, RuleString};
pub use rules::Rules;
pub use value::Value;
