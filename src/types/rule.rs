use std::fmt;

use crate::enumerate::enumerate;

use super::error::{ChildKind, ContractViolation};
use super::flags::ModifierFlags;
use super::meta::{self, Metadata};
use super::raw::{self, RawRule};

/// A read-only view of one compiled rule.
///
/// Views borrow from the [`Rules`](super::Rules) that produced them and cannot
/// outlive it. Every child collection is extracted with a size query followed
/// by a single bounded fill, so a structure that changes shape between the
/// two phases surfaces as a [`ContractViolation`] rather than a short read.
#[derive(Clone, Copy)]
pub struct Rule<'r> {
    pub(crate) raw: &'r RawRule,
    pub(crate) namespace: &'r str,
}

/// A pattern string declared by a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleString {
    /// Identifier including the `$` sigil.
    pub id: String,
    /// Textual form of the pattern.
    pub value: String,
    /// Public modifier bits; internal engine bookkeeping is never exposed.
    pub modifiers: ModifierFlags,
}

impl<'r> Rule<'r> {
    #[must_use]
    pub fn identifier(&self) -> &'r str {
        &self.raw.identifier
    }

    #[must_use]
    pub fn namespace(&self) -> &'r str {
        self.namespace
    }

    /// `private` rules are evaluated but never reported as matches.
    #[must_use]
    pub fn is_private(&self) -> bool {
        self.raw.is_private()
    }

    /// A `global` rule that does not hold suppresses every rule of its namespace.
    #[must_use]
    pub fn is_global(&self) -> bool {
        self.raw.is_global()
    }

    /// Tags in declaration order.
    ///
    /// # Errors
    ///
    /// Returns [`ContractViolation`] if the tag count changes between the
    /// size query and the fill.
    pub fn tags(&self) -> Result<Vec<String>, ContractViolation> {
        let raw = self.raw;
        let tags = enumerate(ChildKind::Tags, |dst| raw::rule_tags(raw, dst))?;
        Ok(tags.into_iter().map(str::to_owned).collect())
    }

    /// Metadata entries in declaration order.
    ///
    /// # Errors
    ///
    /// Returns [`ContractViolation`] on a count mismatch or a record whose
    /// type discriminant is unknown.
    pub fn metadata(&self) -> Result<Metadata, ContractViolation> {
        let raw = self.raw;
        let records = enumerate(ChildKind::Metadata, |dst| raw::rule_metas(raw, dst))?;
        let mut metadata = Metadata::new();
        for record in records {
            let (name, value) = meta::decode(record)?;
            metadata.push(name, value);
        }
        Ok(metadata)
    }

    /// Pattern strings in declaration order.
    ///
    /// # Errors
    ///
    /// Returns [`ContractViolation`] if the string count changes between the
    /// size query and the fill.
    pub fn strings(&self) -> Result<Vec<RuleString>, ContractViolation> {
        let raw = self.raw;
        let records = enumerate(ChildKind::Strings, |dst| raw::rule_strings(raw, dst))?;
        Ok(records
            .into_iter()
            .map(|record| {
                let (id, value, flags) = raw::string_read(record);
                RuleString {
                    id: id.to_owned(),
                    value: value.to_owned(),
                    modifiers: ModifierFlags::from_raw(flags),
                }
            })
            .collect())
    }
}

impl fmt::Debug for Rule<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("namespace", &self.namespace)
            .field("identifier", &self.raw.identifier)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Rule<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.raw.identifier)
    }
}
