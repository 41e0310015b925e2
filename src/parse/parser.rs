use crate::types::{Expr, MetaValue, Pattern};

/// The result of parsing one rule source.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSource {
    pub items: Vec<Item>,
}

/// A top-level statement, in source order.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Include { path: String, line: usize },
    Rule(RuleDef),
}

/// A rule as written in the source, names unresolved.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleDef {
    pub name: String,
    pub private: bool,
    pub global: bool,
    pub tags: Vec<String>,
    pub metas: Vec<(String, MetaValue)>,
    pub strings: Vec<StringDef>,
    pub condition: Expr,
    /// 1-based line of the rule header.
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StringDef {
    /// Identifier including the `$` sigil; a bare `$` is anonymous.
    pub name: String,
    pub pattern: Pattern,
    pub modifiers: Vec<Modifier>,
    pub line: usize,
}

/// String modifiers. `DotAll` only comes from a `/.../s` regex suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modifier {
    Nocase,
    Ascii,
    Wide,
    Fullword,
    DotAll,
}

impl Modifier {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Modifier::Nocase => "nocase",
            Modifier::Ascii => "ascii",
            Modifier::Wide => "wide",
            Modifier::Fullword => "fullword",
            Modifier::DotAll => "s",
        }
    }
}

impl ParsedSource {
    /// The grammar records positions as the length of the input still
    /// unparsed; turn those into 1-based line numbers of `source`.
    pub(crate) fn resolve_lines(&mut self, source: &str) {
        let index = LineIndex::new(source);
        let line_of = |remaining: usize| index.line_col(source.len().saturating_sub(remaining)).0;
        for item in &mut self.items {
            match item {
                Item::Include { line, .. } => *line = line_of(*line),
                Item::Rule(rule) => {
                    rule.line = line_of(rule.line);
                    for string in &mut rule.strings {
                        string.line = line_of(string.line);
                    }
                }
            }
        }
    }

    pub fn rules(&self) -> impl Iterator<Item = &RuleDef> {
        self.items.iter().filter_map(|item| match item {
            Item::Rule(rule) => Some(rule),
            Item::Include { .. } => None,
        })
    }
}

/// Byte offsets of every newline in a source, for offset to line lookups in
/// logarithmic time.
pub(crate) struct LineIndex {
    newlines: Vec<usize>,
    len: usize,
}

impl LineIndex {
    pub(crate) fn new(source: &str) -> Self {
        Self {
            newlines: source
                .bytes()
                .enumerate()
                .filter_map(|(i, b)| (b == b'\n').then_some(i))
                .collect(),
            len: source.len(),
        }
    }

    /// 1-based line and column of a byte offset.
    pub(crate) fn line_col(&self, offset: usize) -> (usize, usize) {
        let offset = offset.min(self.len);
        let before = self.newlines.partition_point(|&newline| newline < offset);
        let column = match before.checked_sub(1).and_then(|i| self.newlines.get(i)) {
            Some(newline) => offset - newline,
            None => offset + 1,
        };
        (before + 1, column)
    }
}
