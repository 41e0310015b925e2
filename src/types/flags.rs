use std::fmt;

use bitflags::bitflags;

bitflags! {
    /// Modifier flags attached to a pattern string.
    ///
    /// The numeric values match the engine's stable public bit layout. Flags
    /// returned by [`Rule::strings()`](crate::Rule::strings) never carry the
    /// internal bookkeeping bits (`SINGLE`, `LITERAL`, `FITS_IN_ATOM`) or any
    /// bit outside this enumeration.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ModifierFlags: u32 {
        /// The string is used by the rule condition.
        const REFERENCED = 0x1;
        /// Declared as a hex string (`{ 4D 5A ?? }`).
        const HEXADECIMAL = 0x2;
        /// Case-insensitive (`nocase`, or `/.../i`).
        const NOCASE = 0x4;
        /// Matched in its single-byte form.
        const ASCII = 0x8;
        /// Matched in its UTF-16LE form (`wide`).
        const WIDE = 0x10;
        /// Declared as a regular expression.
        const REGEXP = 0x20;
        /// Hex string without jumps or alternatives.
        const FAST = 0x40;
        /// Only matches delimited by non-alphanumeric bytes (`fullword`).
        const FULLWORD = 0x80;
        /// Declared with the bare `$` identifier.
        const ANONYMOUS = 0x100;
        const SINGLE = 0x200;
        const LITERAL = 0x400;
        const FITS_IN_ATOM = 0x800;
        const NULL = 0x1000;
        const CHAIN_PART = 0x2000;
        const CHAIN_TAIL = 0x4000;
        /// Every reference pins the string to a constant offset (`$a at 0`).
        const FIXED_OFFSET = 0x8000;
        const GREEDY = 0x10000;
        /// Regex `.` also matches newlines (`/.../s`).
        const DOT_ALL = 0x20000;
        const DISABLED = 0x40000;
    }
}

/// Engine bookkeeping bits inside the enumerated range that are not part of
/// the public contract.
pub(crate) const INTERNAL_MASK: u32 = 0xE00;

impl ModifierFlags {
    /// Project the engine's raw flag word onto the public contract: clear the
    /// internal range, then drop every bit outside the enumeration.
    #[must_use]
    pub(crate) fn from_raw(raw: u32) -> Self {
        Self::from_bits_truncate(raw & !INTERNAL_MASK)
    }
}

impl fmt::Display for ModifierFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "(none)");
        }
        let names: Vec<&str> = self.iter_names().map(|(name, _)| name).collect();
        write!(f, "{}", names.join(" | "))
    }
}
