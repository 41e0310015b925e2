//! Engine-owned compiled records.
//!
//! These are the structures the matching engine produces and owns. The host
//! layer never walks them directly: children are reached through the
//! `rule_*` fill primitives and metadata payloads through [`meta_read`].

use super::expr::CompiledExpr;
use super::pattern::Pattern;

pub(crate) const META_TYPE_NULL: i32 = 0;
pub(crate) const META_TYPE_INTEGER: i32 = 1;
pub(crate) const META_TYPE_STRING: i32 = 2;
pub(crate) const META_TYPE_BOOLEAN: i32 = 3;

pub(crate) const RULE_FLAGS_PRIVATE: u32 = 0x1;
pub(crate) const RULE_FLAGS_GLOBAL: u32 = 0x2;
pub(crate) const RULE_FLAGS_ALL: u32 = RULE_FLAGS_PRIVATE | RULE_FLAGS_GLOBAL;

/// Engine-private string bit: searched by the regex matcher rather than the
/// literal atom index.
pub(crate) const STRING_FLAGS_REGEX_MATCHER: u32 = 1 << 24;

/// Every bit the engine may set in a string's flag word.
pub(crate) const STRING_FLAGS_ALL: u32 = 0x7FFFF | STRING_FLAGS_REGEX_MATCHER;

/// A metadata record: a side discriminant plus a union slot. Only the field
/// selected by `kind` carries meaning.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RawMeta {
    pub(crate) identifier: String,
    pub(crate) kind: i32,
    pub(crate) string: Option<String>,
    pub(crate) integer: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RawString {
    pub(crate) identifier: String,
    pub(crate) value: String,
    pub(crate) flags: u32,
    pub(crate) pattern: Pattern,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RawRule {
    pub(crate) identifier: String,
    pub(crate) namespace: usize,
    pub(crate) flags: u32,
    pub(crate) tags: Vec<String>,
    pub(crate) metas: Vec<RawMeta>,
    pub(crate) strings: Vec<RawString>,
    pub(crate) condition: CompiledExpr,
}

impl RawRule {
    pub(crate) fn is_private(&self) -> bool {
        self.flags & RULE_FLAGS_PRIVATE != 0
    }

    pub(crate) fn is_global(&self) -> bool {
        self.flags & RULE_FLAGS_GLOBAL != 0
    }
}

/// Writes at most `dst.len()` children into `dst` and returns how many
/// children exist. An empty `dst` is a pure size query.
fn fill_slots<'a, T: ?Sized + 'a>(
    children: impl Iterator<Item = &'a T>,
    dst: &mut [Option<&'a T>],
) -> usize {
    let mut count = 0;
    for child in children {
        if let Some(slot) = dst.get_mut(count) {
            *slot = Some(child);
        }
        count += 1;
    }
    count
}

pub(crate) fn rule_tags<'a>(rule: &'a RawRule, dst: &mut [Option<&'a str>]) -> usize {
    fill_slots(rule.tags.iter().map(String::as_str), dst)
}

pub(crate) fn rule_metas<'a>(rule: &'a RawRule, dst: &mut [Option<&'a RawMeta>]) -> usize {
    fill_slots(rule.metas.iter(), dst)
}

pub(crate) fn rule_strings<'a>(rule: &'a RawRule, dst: &mut [Option<&'a RawString>]) -> usize {
    fill_slots(rule.strings.iter(), dst)
}

/// The raw view of one metadata record: `(discriminant, identifier, string slot, integer slot)`.
pub(crate) fn meta_read(meta: &RawMeta) -> (i32, &str, Option<&str>, i64) {
    (
        meta.kind,
        &meta.identifier,
        meta.string.as_deref(),
        meta.integer,
    )
}

/// The raw view of one string record: `(identifier, value, flag word)`.
pub(crate) fn string_read(string: &RawString) -> (&str, &str, u32) {
    (&string.identifier, &string.value, string.flags)
}
