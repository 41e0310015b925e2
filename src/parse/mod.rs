//! Parser for the rule language.
//!
//! ```text
//! include "common.yar"
//!
//! private global rule t1 : tag1 tag2 {
//!     meta:
//!         author = "someone"
//!     strings:
//!         $a = "abc" fullword
//!         $h = { 4D 5A ?? [2-4] ( 00 | 01 ) }
//!         $r = /ab+c/i
//!     condition:
//!         $a and #h >= 2 or any of ($r*)
//! }
//! ```

mod error;
mod grammar;
mod parser;

pub use error::ParseError;
pub use grammar::MAX_NESTING;
pub use parser::{Item, Modifier, ParsedSource, RuleDef, StringDef};

/// Parse rule source into a [`ParsedSource`].
///
/// # Errors
///
/// Returns [`ParseError`] with the line and column of the first syntax error,
/// including parentheses, `not` or hex alternatives nested deeper than
/// [`MAX_NESTING`].
pub fn parse(input: &str) -> Result<ParsedSource, ParseError> {
    use winnow::stream::Stateful;
    use winnow::Parser;
    let source = Stateful { input, state: 0 };
    let mut parsed = grammar::source_file.parse(source).map_err(|e| {
        let (line, column) = parser::LineIndex::new(input).line_col(e.offset());
        let message = e.inner().to_string().replace('\n', "; ");
        if message.is_empty() {
            ParseError::new("unexpected input", line, column)
        } else {
            ParseError::new(message, line, column)
        }
    })?;
    parsed.resolve_lines(input);
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_carries_position() {
        let err = parse("rule ok { condition: true }\nrule bad { condition: }").unwrap_err();
        assert_eq!(err.line(), 2);
        assert!(err.column() > 1);
    }

    #[test]
    fn unknown_top_level_token() {
        let err = parse("rul x { condition: true }").unwrap_err();
        assert_eq!(err.line(), 1);
        assert_eq!(err.column(), 1);
    }

    #[test]
    fn nesting_error_points_past_the_limit() {
        let src = format!(
            "rule r {{\n condition:\n  {}true{}\n}}",
            "(".repeat(MAX_NESTING + 1),
            ")".repeat(MAX_NESTING + 1)
        );
        let err = parse(&src).unwrap_err();
        assert_eq!(err.line(), 3);
        assert!(err.column() > MAX_NESTING);
        assert!(err.message().contains("condition nested too deeply"));
    }

    #[test]
    fn empty_source_has_no_items() {
        assert!(parse("  // nothing\n").unwrap().items.is_empty());
    }
}
