use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::compile::{compile_rule, Scope};
use crate::parse::{self, Item};
use crate::YarrowError;

use super::error::CompileError;
use super::raw::RawRule;
use super::rules::Rules;
use super::value::Value;

const DEFAULT_NAMESPACE: &str = "default";

/// Builder that accumulates rule sources and compiles them into [`Rules`].
///
/// Each `add_*` call compiles its rules immediately, in source order, into
/// the current namespace. A failed call consumes the compiler, so a
/// half-added source can never reach [`compile()`](Self::compile).
///
/// # Example
///
/// ```
/// use yarrow::{Compiler, ScanFlags};
///
/// let rules = Compiler::new()
///     .define_variable("env", "prod")?
///     .add_source(r#"rule hello { strings: $a = "hello" condition: $a and env == "prod" }"#)?
///     .compile()?;
/// let matches = rules.scan_mem(b"say hello", ScanFlags::empty(), None)?;
/// assert_eq!(matches[0].rule, "hello");
/// # Ok::<(), yarrow::YarrowError>(())
/// ```
#[derive(Debug)]
pub struct Compiler {
    namespaces: Vec<String>,
    current: usize,
    rules: Vec<RawRule>,
    /// `(namespace, identifier)` to position in `rules`.
    rule_names: HashMap<(usize, String), usize>,
    externals: Vec<(String, Value)>,
    includes: bool,
    include_dir: Option<PathBuf>,
}

impl Default for Compiler {
    fn default() -> Self {
        Self {
            namespaces: vec![DEFAULT_NAMESPACE.to_owned()],
            current: 0,
            rules: Vec::new(),
            rule_names: HashMap::new(),
            externals: Vec::new(),
            includes: true,
            include_dir: None,
        }
    }
}

impl Compiler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Switch to `name` for subsequently added sources, creating it if needed.
    #[must_use]
    pub fn namespace(mut self, name: &str) -> Self {
        self.current = match self.namespaces.iter().position(|ns| ns == name) {
            Some(index) => index,
            None => {
                self.namespaces.push(name.to_owned());
                self.namespaces.len() - 1
            }
        };
        self
    }

    /// Declare an external variable that conditions may refer to by name.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::DuplicateVariable`] if `name` is already defined.
    pub fn define_variable(
        mut self,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<Self, CompileError> {
        if self.externals.iter().any(|(existing, _)| existing == name) {
            return Err(CompileError::DuplicateVariable {
                name: name.to_owned(),
            });
        }
        self.externals.push((name.to_owned(), value.into()));
        Ok(self)
    }

    /// Reject `include` statements in subsequently added sources.
    #[must_use]
    pub fn disable_includes(mut self) -> Self {
        self.includes = false;
        self
    }

    /// Directory that relative includes in [`add_source()`](Self::add_source)
    /// resolve against. Defaults to the process working directory.
    #[must_use]
    pub fn include_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.include_dir = Some(dir.into());
        self
    }

    /// Parse and compile `source` into the current namespace.
    ///
    /// # Errors
    ///
    /// Returns [`YarrowError::Parse`] or [`YarrowError::Compile`] with the
    /// offending line.
    pub fn add_source(mut self, source: &str) -> Result<Self, YarrowError> {
        let base = self.include_dir.clone();
        self.add_parsed(source, base.as_deref(), &mut Vec::new())?;
        Ok(self)
    }

    /// Shorthand for [`namespace()`](Self::namespace) followed by
    /// [`add_source()`](Self::add_source).
    ///
    /// # Errors
    ///
    /// As [`add_source()`](Self::add_source).
    pub fn add_source_in_namespace(
        self,
        namespace: &str,
        source: &str,
    ) -> Result<Self, YarrowError> {
        self.namespace(namespace).add_source(source)
    }

    /// Read and compile a rule file. Includes inside it resolve relative to
    /// the file's directory.
    ///
    /// # Errors
    ///
    /// Returns [`YarrowError::Io`] if the file cannot be read, otherwise as
    /// [`add_source()`](Self::add_source).
    pub fn add_file(mut self, path: impl AsRef<Path>) -> Result<Self, YarrowError> {
        let path = path.as_ref();
        let source = fs::read_to_string(path)?;
        let mut stack = vec![fs::canonicalize(path)?];
        self.add_parsed(&source, path.parent(), &mut stack)?;
        Ok(self)
    }

    /// Finish compilation.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::Index`] if the pattern index cannot be built.
    pub fn compile(self) -> Result<Rules, CompileError> {
        let namespaces = self.namespaces.len();
        let rules = Rules::new(self.namespaces, self.rules, self.externals).map_err(|e| {
            CompileError::Index {
                message: e.to_string(),
            }
        })?;
        debug!(rules = rules.len(), namespaces, "compiled rules");
        Ok(rules)
    }

    fn add_parsed(
        &mut self,
        source: &str,
        base: Option<&Path>,
        stack: &mut Vec<PathBuf>,
    ) -> Result<(), YarrowError> {
        let parsed = parse::parse(source)?;
        for item in parsed.items {
            match item {
                Item::Include { path, line } => self.include(&path, line, base, stack)?,
                Item::Rule(def) => {
                    let scope = Scope {
                        namespace: self.current,
                        namespace_name: self
                            .namespaces
                            .get(self.current)
                            .map_or(DEFAULT_NAMESPACE, String::as_str),
                        rule_names: &self.rule_names,
                        externals: &self.externals,
                    };
                    let rule = compile_rule(&def, &scope)?;
                    self.rule_names
                        .insert((rule.namespace, rule.identifier.clone()), self.rules.len());
                    self.rules.push(rule);
                }
            }
        }
        Ok(())
    }

    fn include(
        &mut self,
        path: &str,
        line: usize,
        base: Option<&Path>,
        stack: &mut Vec<PathBuf>,
    ) -> Result<(), YarrowError> {
        if !self.includes {
            return Err(CompileError::IncludesDisabled { line }.into());
        }
        let failed = |message: String| CompileError::Include {
            path: path.to_owned(),
            message,
            line,
        };

        let resolved = base.map_or_else(|| PathBuf::from(path), |dir| dir.join(path));
        let canonical = fs::canonicalize(&resolved).map_err(|e| failed(e.to_string()))?;
        if stack.contains(&canonical) {
            return Err(failed("include cycle".to_owned()).into());
        }
        let source = fs::read_to_string(&canonical).map_err(|e| failed(e.to_string()))?;
        debug!(path = %canonical.display(), "including rule file");

        stack.push(canonical.clone());
        let result = self.add_parsed(&source, canonical.parent(), stack);
        stack.pop();
        result
    }
}
