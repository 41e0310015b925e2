//! Finds every occurrence of every compiled string in a buffer.
//!
//! Literal strings (text, and hex strings made only of exact bytes) are
//! indexed in two Aho-Corasick automata, one case-sensitive and one ASCII
//! case-insensitive, in both their single-byte and UTF-16LE forms. Everything
//! else is compiled to a byte regex and searched at every start offset so
//! overlapping occurrences are reported as well.

use std::time::Instant;

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use regex::bytes::{Regex, RegexBuilder};
use thiserror::Error;

use crate::types::raw::{RawRule, RawString, STRING_FLAGS_REGEX_MATCHER};
use crate::types::{HexToken, ModifierFlags, Pattern};

/// Occurrences recorded per string before further hits are dropped.
pub(crate) const MAX_STRING_MATCHES: usize = 1_000_000;

/// Matches processed between two clock reads.
const DEADLINE_CHECK_INTERVAL: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct Occurrence {
    pub(crate) offset: usize,
    pub(crate) len: usize,
}

/// Occurrences indexed by rule, then by string, sorted by offset.
pub(crate) type MatchTable = Vec<Vec<Vec<Occurrence>>>;

#[derive(Debug, Error)]
pub(crate) enum BuildError {
    #[error("cannot build literal index: {0}")]
    Automaton(#[from] aho_corasick::BuildError),

    #[error("string '{string}' of rule '{rule}' does not compile: {source}")]
    Regex {
        rule: String,
        string: String,
        #[source]
        source: regex::Error,
    },

    #[error("string '{string}' of rule '{rule}' is not a literal")]
    NotLiteral { rule: String, string: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DeadlineExceeded;

#[derive(Debug, Clone, Copy)]
struct Target {
    rule: usize,
    string: usize,
    wide: bool,
}

#[derive(Debug)]
struct Literals {
    automaton: AhoCorasick,
    targets: Vec<Target>,
}

#[derive(Debug)]
pub(crate) struct Searcher {
    exact: Option<Literals>,
    nocase: Option<Literals>,
    regexes: Vec<(Target, Regex)>,
}

impl Searcher {
    pub(crate) fn build(rules: &[RawRule]) -> Result<Self, BuildError> {
        let mut exact: (Vec<Vec<u8>>, Vec<Target>) = (Vec::new(), Vec::new());
        let mut nocase: (Vec<Vec<u8>>, Vec<Target>) = (Vec::new(), Vec::new());
        let mut regexes = Vec::new();

        for (rule_index, rule) in rules.iter().enumerate() {
            for (string_index, string) in rule.strings.iter().enumerate() {
                let target = |wide| Target {
                    rule: rule_index,
                    string: string_index,
                    wide,
                };
                if string.flags & STRING_FLAGS_REGEX_MATCHER != 0 {
                    let regex = pattern_regex(&string.pattern, string.flags).map_err(|source| {
                        BuildError::Regex {
                            rule: rule.identifier.clone(),
                            string: string.identifier.clone(),
                            source,
                        }
                    })?;
                    regexes.push((target(false), regex));
                    continue;
                }

                let bytes = literal_bytes(&string.pattern).ok_or_else(|| BuildError::NotLiteral {
                    rule: rule.identifier.clone(),
                    string: string.identifier.clone(),
                })?;
                let (patterns, targets) = if has(string, ModifierFlags::NOCASE) {
                    &mut nocase
                } else {
                    &mut exact
                };
                if has(string, ModifierFlags::ASCII) {
                    patterns.push(bytes.clone());
                    targets.push(target(false));
                }
                if has(string, ModifierFlags::WIDE) {
                    patterns.push(widen(&bytes));
                    targets.push(target(true));
                }
            }
        }

        Ok(Self {
            exact: Literals::build(exact, false)?,
            nocase: Literals::build(nocase, true)?,
            regexes,
        })
    }

    /// Search `data` for every string of `rules`, which must be the rules this
    /// searcher was built from. With `fast`, strings whose condition needs a
    /// single hit stop recording after the first one.
    pub(crate) fn search(
        &self,
        rules: &[RawRule],
        data: &[u8],
        fast: bool,
        deadline: Option<Instant>,
    ) -> Result<MatchTable, DeadlineExceeded> {
        let mut table: MatchTable = rules
            .iter()
            .map(|rule| vec![Vec::new(); rule.strings.len()])
            .collect();
        let mut clock = Clock::new(deadline);
        let mut recorder = Recorder {
            rules,
            data,
            fast,
            table: &mut table,
        };

        for literals in [&self.exact, &self.nocase].into_iter().flatten() {
            for hit in literals.automaton.find_overlapping_iter(data) {
                clock.tick()?;
                if let Some(&target) = literals.targets.get(hit.pattern().as_usize()) {
                    recorder.record(target, hit.start(), hit.len());
                }
            }
        }

        for (target, regex) in &self.regexes {
            clock.check()?;
            let mut start = 0;
            while start <= data.len() {
                let Some(hit) = regex.find_at(data, start) else {
                    break;
                };
                clock.tick()?;
                if !recorder.record(*target, hit.start(), hit.len()) {
                    break;
                }
                start = hit.start() + 1;
            }
        }

        clock.check()?;
        for row in &mut table {
            for occurrences in row {
                occurrences.sort_unstable();
                occurrences.dedup();
            }
        }
        Ok(table)
    }
}

impl Literals {
    fn build(
        (patterns, targets): (Vec<Vec<u8>>, Vec<Target>),
        ascii_case_insensitive: bool,
    ) -> Result<Option<Self>, BuildError> {
        if patterns.is_empty() {
            return Ok(None);
        }
        let automaton = AhoCorasickBuilder::new()
            .match_kind(MatchKind::Standard)
            .ascii_case_insensitive(ascii_case_insensitive)
            .build(&patterns)?;
        Ok(Some(Self { automaton, targets }))
    }
}

struct Recorder<'a> {
    rules: &'a [RawRule],
    data: &'a [u8],
    fast: bool,
    table: &'a mut MatchTable,
}

impl Recorder<'_> {
    /// Record one hit. Returns `false` once the string wants no more hits.
    fn record(&mut self, target: Target, offset: usize, len: usize) -> bool {
        let Some(string) = self
            .rules
            .get(target.rule)
            .and_then(|rule| rule.strings.get(target.string))
        else {
            return false;
        };
        let Some(slot) = self
            .table
            .get_mut(target.rule)
            .and_then(|row| row.get_mut(target.string))
        else {
            return false;
        };

        let single = self.fast && has(string, ModifierFlags::SINGLE);
        if slot.len() >= MAX_STRING_MATCHES || (single && !slot.is_empty()) {
            return false;
        }
        if has(string, ModifierFlags::FULLWORD) && !is_fullword(self.data, offset, len, target.wide)
        {
            return true;
        }
        slot.push(Occurrence { offset, len });
        slot.len() < MAX_STRING_MATCHES && !single
    }
}

struct Clock {
    deadline: Option<Instant>,
    ticks: usize,
}

impl Clock {
    fn new(deadline: Option<Instant>) -> Self {
        Self { deadline, ticks: 0 }
    }

    fn check(&self) -> Result<(), DeadlineExceeded> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(DeadlineExceeded),
            _ => Ok(()),
        }
    }

    fn tick(&mut self) -> Result<(), DeadlineExceeded> {
        self.ticks += 1;
        if self.ticks % DEADLINE_CHECK_INTERVAL == 0 {
            self.check()
        } else {
            Ok(())
        }
    }
}

fn has(string: &RawString, flag: ModifierFlags) -> bool {
    string.flags & flag.bits() != 0
}

/// The exact bytes of a literal pattern.
fn literal_bytes(pattern: &Pattern) -> Option<Vec<u8>> {
    match pattern {
        Pattern::Text(bytes) if !bytes.is_empty() => Some(bytes.clone()),
        Pattern::Hex(tokens) if !tokens.is_empty() => tokens
            .iter()
            .map(|token| match token {
                HexToken::Byte { value, mask: 0xFF } => Some(*value),
                _ => None,
            })
            .collect(),
        _ => None,
    }
}

/// UTF-16LE form of single-byte text.
fn widen(bytes: &[u8]) -> Vec<u8> {
    bytes.iter().flat_map(|&b| [b, 0]).collect()
}

fn is_fullword(data: &[u8], offset: usize, len: usize, wide: bool) -> bool {
    let alnum = |index: Option<usize>| {
        index
            .and_then(|i| data.get(i))
            .is_some_and(u8::is_ascii_alphanumeric)
    };
    let zero = |index: Option<usize>| index.and_then(|i| data.get(i)) == Some(&0);
    let end = offset + len;
    if wide {
        let before = alnum(offset.checked_sub(2)) && zero(offset.checked_sub(1));
        let after = alnum(Some(end)) && zero(Some(end + 1));
        !before && !after
    } else {
        !alnum(offset.checked_sub(1)) && !alnum(Some(end))
    }
}

/// Compile a non-literal string to a byte regex.
pub(crate) fn pattern_regex(pattern: &Pattern, flags: u32) -> Result<Regex, regex::Error> {
    let nocase = flags & ModifierFlags::NOCASE.bits() != 0;
    let dot_all = flags & ModifierFlags::DOT_ALL.bits() != 0;
    match pattern {
        Pattern::Text(bytes) => RegexBuilder::new(&escape_bytes(bytes))
            .unicode(false)
            .case_insensitive(nocase)
            .build(),
        Pattern::Hex(tokens) => RegexBuilder::new(&hex_regex(tokens))
            .unicode(false)
            .dot_matches_new_line(true)
            .build(),
        Pattern::Regex(body) => RegexBuilder::new(body)
            .unicode(false)
            .case_insensitive(nocase)
            .dot_matches_new_line(dot_all)
            .build(),
    }
}

fn escape_bytes(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("\\x{b:02X}")).collect()
}

fn hex_regex(tokens: &[HexToken]) -> String {
    let mut out = String::new();
    for token in tokens {
        match token {
            HexToken::Byte { value, mask: 0xFF } => out.push_str(&format!("\\x{value:02X}")),
            HexToken::Byte { mask: 0, .. } => out.push('.'),
            HexToken::Byte { value, mask: 0xF0 } => {
                out.push_str(&format!("[\\x{:02X}-\\x{:02X}]", value & 0xF0, value | 0x0F));
            }
            HexToken::Byte { value, mask } => {
                // Low nibble fixed, high nibble free: sixteen alternatives.
                out.push('[');
                for hi in 0..16u8 {
                    out.push_str(&format!("\\x{:02X}", (hi << 4) | (value & mask)));
                }
                out.push(']');
            }
            HexToken::Jump { min, max: Some(max) } => out.push_str(&format!(".{{{min},{max}}}")),
            HexToken::Jump { min, max: None } => out.push_str(&format!(".{{{min},}}")),
            HexToken::Alt(branches) => {
                let parts: Vec<String> = branches.iter().map(|b| hex_regex(b)).collect();
                out.push_str(&format!("(?:{})", parts.join("|")));
            }
        }
    }
    out
}
