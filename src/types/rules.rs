use std::fmt;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::search::{BuildError, MatchTable, Searcher};

use super::error::{ContractViolation, ScanError};
use super::matches::{Match, MatchString, ScanFlags};
use super::raw::RawRule;
use super::rule::Rule;
use super::value::Value;

/// A compiled, immutable rule set. Thread-safe and designed to live behind `Arc`.
///
/// Produced by [`Compiler::compile()`](crate::Compiler::compile) or by loading a
/// serialized blob with [`Rules::from_bytes()`]. Scans take `&self`, so any
/// number of threads may scan one instance at once.
#[derive(Debug)]
pub struct Rules {
    pub(crate) namespaces: Vec<String>,
    pub(crate) rules: Vec<RawRule>,
    pub(crate) externals: Vec<(String, Value)>,
    pub(crate) searcher: Searcher,
}

impl Rules {
    pub(crate) fn new(
        namespaces: Vec<String>,
        rules: Vec<RawRule>,
        externals: Vec<(String, Value)>,
    ) -> Result<Self, BuildError> {
        let searcher = Searcher::build(&rules)?;
        Ok(Self {
            namespaces,
            rules,
            externals,
            searcher,
        })
    }

    /// Compile a single source into the default namespace.
    ///
    /// This is a convenience wrapper around [`Compiler`](crate::Compiler).
    ///
    /// # Errors
    ///
    /// Returns [`YarrowError`](crate::YarrowError) on parse or compile failure.
    pub fn compile(source: &str) -> Result<Self, crate::YarrowError> {
        let rules = crate::Compiler::new().add_source(source)?.compile()?;
        Ok(rules)
    }

    /// Every rule in compilation order, private and global rules included.
    #[must_use]
    pub fn rules(&self) -> Vec<Rule<'_>> {
        self.rules.iter().map(|raw| self.view(raw)).collect()
    }

    /// Look up a rule by namespace and identifier.
    #[must_use]
    pub fn get(&self, namespace: &str, identifier: &str) -> Option<Rule<'_>> {
        self.rules
            .iter()
            .map(|raw| self.view(raw))
            .find(|rule| rule.namespace() == namespace && rule.identifier() == identifier)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Namespace names in creation order.
    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.namespaces.iter().map(String::as_str)
    }

    /// Scan a byte buffer.
    ///
    /// Returns one [`Match`] per non-private rule whose condition holds, in
    /// compilation order. An empty buffer is scanned like any other.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::Timeout`] if `timeout` elapses first; no partial
    /// results are reported in that case.
    pub fn scan_mem(
        &self,
        data: &[u8],
        flags: ScanFlags,
        timeout: Option<Duration>,
    ) -> Result<Vec<Match>, ScanError> {
        let started = Instant::now();
        let deadline = timeout.and_then(|t| started.checked_add(t));
        let fast = flags.contains(ScanFlags::FAST_MODE);

        let table = self
            .searcher
            .search(&self.rules, data, fast, deadline)
            .map_err(|_| {
                let timeout = timeout.unwrap_or_default();
                warn!(?timeout, len = data.len(), "scan timed out");
                ScanError::Timeout { timeout }
            })?;

        let filesize = u64::try_from(data.len()).unwrap_or(u64::MAX);
        let results = crate::evaluate::evaluate(
            &self.rules,
            self.namespaces.len(),
            &table,
            filesize,
            &self.externals,
        );
        let matches = self.collect(data, &table, &results)?;
        debug!(
            len = data.len(),
            matches = matches.len(),
            elapsed = ?started.elapsed(),
            "scan finished"
        );
        Ok(matches)
    }

    /// Read a file into memory and scan it.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::Open`] if the file cannot be read, otherwise as
    /// [`scan_mem()`](Self::scan_mem).
    pub fn scan_file(
        &self,
        path: impl AsRef<Path>,
        flags: ScanFlags,
        timeout: Option<Duration>,
    ) -> Result<Vec<Match>, ScanError> {
        let path = path.as_ref();
        let data = fs::read(path).map_err(|source| ScanError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        self.scan_mem(&data, flags, timeout)
    }

    /// Scan the whole content of an open file, from its first byte regardless
    /// of the current cursor position.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::Read`] if the handle cannot be rewound or read.
    pub fn scan_file_handle(
        &self,
        file: &File,
        flags: ScanFlags,
        timeout: Option<Duration>,
    ) -> Result<Vec<Match>, ScanError> {
        let mut handle = file;
        handle.seek(SeekFrom::Start(0)).map_err(ScanError::Read)?;
        self.scan_reader(handle, flags, timeout)
    }

    /// Drain a reader to its end and scan what it produced.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::Read`] if reading fails.
    pub fn scan_reader(
        &self,
        mut reader: impl Read,
        flags: ScanFlags,
        timeout: Option<Duration>,
    ) -> Result<Vec<Match>, ScanError> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data).map_err(ScanError::Read)?;
        self.scan_mem(&data, flags, timeout)
    }

    /// Serialize these rules into the binary format described in
    /// [`serial`](crate::serial).
    ///
    /// # Errors
    ///
    /// Returns [`SerializeError`](crate::serial::SerializeError) if encoding fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, crate::serial::SerializeError> {
        crate::serial::encode(self)
    }

    /// Deserialize rules from a byte slice previously produced by
    /// [`to_bytes`](Self::to_bytes). Trailing bytes are rejected.
    ///
    /// # Errors
    ///
    /// Returns [`DeserializeError`](crate::serial::DeserializeError) on
    /// format, integrity, or validation failure.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, crate::serial::DeserializeError> {
        crate::serial::decode(bytes)
    }

    /// Serialize into a writer.
    ///
    /// # Errors
    ///
    /// Returns [`SerializeError`](crate::serial::SerializeError) on
    /// encoding or I/O failure.
    pub fn write_to(&self, writer: impl Write) -> Result<(), crate::serial::SerializeError> {
        crate::serial::write(self, writer)
    }

    /// Deserialize from a reader. Short reads are retried until the header
    /// and the declared payload length are complete or the reader is
    /// exhausted. Bytes after the payload are left unread.
    ///
    /// # Errors
    ///
    /// Returns [`DeserializeError`](crate::serial::DeserializeError) on
    /// I/O, format, integrity, or validation failure.
    pub fn read_from(reader: impl Read) -> Result<Self, crate::serial::DeserializeError> {
        crate::serial::read(reader)
    }

    /// Serialize and write to a file.
    ///
    /// # Errors
    ///
    /// Returns [`SerializeError`](crate::serial::SerializeError) on
    /// encoding or I/O failure.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), crate::serial::SerializeError> {
        let bytes = self.to_bytes()?;
        fs::write(path, bytes)?;
        Ok(())
    }

    /// Read a file written by [`save`](Self::save).
    ///
    /// # Errors
    ///
    /// Returns [`DeserializeError`](crate::serial::DeserializeError) on
    /// I/O, format, integrity, or validation failure.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, crate::serial::DeserializeError> {
        let bytes = fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    fn view<'r>(&'r self, raw: &'r RawRule) -> Rule<'r> {
        Rule {
            raw,
            namespace: self
                .namespaces
                .get(raw.namespace)
                .map_or("", String::as_str),
        }
    }

    fn collect(
        &self,
        data: &[u8],
        table: &MatchTable,
        results: &[bool],
    ) -> Result<Vec<Match>, ContractViolation> {
        let mut matches = Vec::new();
        for (index, (raw, &matched)) in self.rules.iter().zip(results).enumerate() {
            if !matched || raw.is_private() {
                continue;
            }
            let rule = self.view(raw);
            let declared = rule.strings()?;
            let mut strings = Vec::new();
            if let Some(row) = table.get(index) {
                for (string, occurrences) in declared.iter().zip(row) {
                    strings.extend(occurrences.iter().map(|o| MatchString {
                        name: string.id.clone(),
                        offset: u64::try_from(o.offset).unwrap_or(u64::MAX),
                        data: data
                            .get(o.offset..o.offset + o.len)
                            .map(<[u8]>::to_vec)
                            .unwrap_or_default(),
                    }));
                }
            }
            matches.push(Match {
                rule: rule.identifier().to_owned(),
                namespace: rule.namespace().to_owned(),
                tags: rule.tags()?,
                metadata: rule.metadata()?,
                strings,
            });
        }
        Ok(matches)
    }
}

impl PartialEq for Rules {
    /// The search index is derived from the rules and takes no part in
    /// equality.
    fn eq(&self, other: &Self) -> bool {
        self.namespaces == other.namespaces
            && self.rules == other.rules
            && self.externals == other.externals
    }
}

impl fmt::Display for Rules {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Rules({} rules, {} namespaces)",
            self.rules.len(),
            self.namespaces.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Compiler, MetaValue};

    const SOURCE: &str = r#"
        private rule helper { strings: $p = "needle" condition: $p }
        rule uses_helper : t1 {
            meta:
                author = "someone"
            strings:
                $a = "hay"
            condition:
                helper and $a
        }
    "#;

    #[test]
    fn rules_in_compilation_order() {
        let rules = Rules::compile(SOURCE).unwrap();
        let ids: Vec<&str> = rules.rules().iter().map(|r| r.identifier()).collect();
        assert_eq!(ids, vec!["helper", "uses_helper"]);
        assert_eq!(rules.len(), 2);
        assert!(rules.get("default", "helper").unwrap().is_private());
        assert!(rules.get("other", "helper").is_none());
    }

    #[test]
    fn private_rules_are_not_reported() {
        let rules = Rules::compile(SOURCE).unwrap();
        let matches = rules
            .scan_mem(b"hay and needle", ScanFlags::empty(), None)
            .unwrap();
        assert_eq!(matches.len(), 1);
        let m = &matches[0];
        assert_eq!(m.rule, "uses_helper");
        assert_eq!(m.tags, vec!["t1"]);
        assert_eq!(
            m.metadata.get("author"),
            Some(&MetaValue::Text("someone".into()))
        );
        assert_eq!(m.strings.len(), 1);
        assert_eq!(m.strings[0].offset, 0);
        assert_eq!(m.strings[0].data, b"hay");
    }

    #[test]
    fn empty_buffer_is_not_an_error() {
        let rules = Rules::compile(SOURCE).unwrap();
        assert!(rules.scan_mem(b"", ScanFlags::empty(), None).unwrap().is_empty());
    }

    #[test]
    fn filesize_uses_buffer_length() {
        let rules = Rules::compile("rule small { condition: filesize < 4 }").unwrap();
        assert_eq!(rules.scan_mem(b"abc", ScanFlags::empty(), None).unwrap().len(), 1);
        assert!(rules.scan_mem(b"abcd", ScanFlags::empty(), None).unwrap().is_empty());
    }

    #[test]
    fn externals_reach_conditions() {
        let rules = Compiler::new()
            .define_variable("env", "prod")
            .unwrap()
            .add_source(r#"rule p { condition: env == "prod" }"#)
            .unwrap()
            .compile()
            .unwrap();
        assert_eq!(rules.scan_mem(b"", ScanFlags::empty(), None).unwrap().len(), 1);
    }

    #[test]
    fn display_and_equality() {
        let a = Rules::compile(SOURCE).unwrap();
        let b = Rules::compile(SOURCE).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "Rules(2 rules, 1 namespaces)");
        assert_eq!(a.namespaces().collect::<Vec<_>>(), vec!["default"]);
    }

    #[test]
    fn rules_are_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Rules>();
    }
}
