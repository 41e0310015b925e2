//! Compile YARA-style pattern rules, persist them, and scan data with them.
//!
//! ```
//! use yarrow::{Compiler, ModifierFlags, ScanFlags};
//!
//! let rules = Compiler::new()
//!     .add_source(
//!         r#"
//!         rule t1 : tag1 {
//!             meta:
//!                 author = "someone"
//!             strings:
//!                 $a = "abc" fullword
//!             condition:
//!                 $a
//!         }
//!         "#,
//!     )?
//!     .compile()?;
//!
//! let rule = rules.get("default", "t1").unwrap();
//! let strings = rule.strings()?;
//! assert_eq!(
//!     strings[0].modifiers,
//!     ModifierFlags::REFERENCED | ModifierFlags::ASCII | ModifierFlags::FULLWORD
//! );
//!
//! let restored = yarrow::Rules::from_bytes(&rules.to_bytes()?)?;
//! let matches = restored.scan_mem(b" abc ", ScanFlags::empty(), None)?;
//! assert_eq!(matches[0].strings[0].offset, 1);
//! # Ok::<(), yarrow::YarrowError>(())
//! ```

mod compile;
mod enumerate;
mod error;
mod evaluate;
pub mod parse;
mod search;
pub mod serial;
mod types;

pub use error::YarrowError;
pub use types::{
    ChildKind, CompareOp, CompileError, Compiler, ContractViolation, Expr, HexToken, Match,
    MatchString, MetaValue, Metadata, ModifierFlags, Pattern, Quantifier, Rule, RuleString, Rules,
    ScanError, ScanFlags, StringSet, Value,
};
