use std::fmt;

use bitflags::bitflags;

use super::meta::Metadata;

bitflags! {
    /// Per-call scan options.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ScanFlags: u32 {
        /// Stop recording occurrences of a string after its first hit.
        const FAST_MODE = 0x1;
    }
}

/// One occurrence of a pattern string in the scanned data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchString {
    /// Identifier of the string, including the `$` sigil.
    pub name: String,
    /// Byte offset of the occurrence in the scanned data.
    pub offset: u64,
    /// The matched bytes.
    pub data: Vec<u8>,
}

/// A rule that matched during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    pub rule: String,
    pub namespace: String,
    pub tags: Vec<String>,
    pub metadata: Metadata,
    /// Occurrences ordered by string declaration, then by offset.
    pub strings: Vec<MatchString>,
}

impl fmt::Display for Match {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.rule)?;
        if !self.tags.is_empty() {
            write!(f, " [{}]", self.tags.join(","))?;
        }
        Ok(())
    }
}
