use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::parse::{Modifier, RuleDef, StringDef};
use crate::search;
use crate::types::expr::CompiledExpr;
use crate::types::meta;
use crate::types::raw::{
    RawRule, RawString, RULE_FLAGS_GLOBAL, RULE_FLAGS_PRIVATE, STRING_FLAGS_REGEX_MATCHER,
};
use crate::types::{CompileError, Expr, HexToken, ModifierFlags, Pattern, StringSet, Value};

/// What a rule's condition may refer to besides its own strings.
pub(crate) struct Scope<'a> {
    pub(crate) namespace: usize,
    pub(crate) namespace_name: &'a str,
    /// Rules compiled so far, keyed by namespace and identifier.
    pub(crate) rule_names: &'a HashMap<(usize, String), usize>,
    pub(crate) externals: &'a [(String, Value)],
}

/// How the condition uses one string. Each reference records the constant
/// offset it pins the string to, or `None`.
#[derive(Debug, Clone, Default)]
struct Usage {
    references: Vec<Option<i64>>,
    needs_all: bool,
}

impl Usage {
    fn referenced(&self) -> bool {
        !self.references.is_empty()
    }

    fn fixed_offset(&self) -> Option<i64> {
        let first = (*self.references.first()?)?;
        self.references
            .iter()
            .all(|r| *r == Some(first))
            .then_some(first)
    }
}

impl Scope<'_> {
    fn rule_index(&self, name: &str) -> Option<usize> {
        self.rule_names
            .get(&(self.namespace, name.to_owned()))
            .copied()
    }
}

pub(crate) fn compile_rule(def: &RuleDef, scope: &Scope<'_>) -> Result<RawRule, CompileError> {
    check_duplicate_rule(def, scope)?;
    check_strings(def)?;

    let mut resolver = Resolver {
        def,
        scope,
        usage: vec![Usage::default(); def.strings.len()],
    };
    let condition = resolver.resolve(&def.condition)?;
    let usage = resolver.usage;

    for (string, usage) in def.strings.iter().zip(&usage) {
        if !usage.referenced() && !string.name.starts_with("$_") {
            return Err(CompileError::UnreferencedString {
                rule: def.name.clone(),
                string: string.name.clone(),
                line: string.line,
            });
        }
    }

    let strings = def
        .strings
        .iter()
        .zip(&usage)
        .map(|(string, usage)| RawString {
            identifier: string.name.clone(),
            value: string.pattern.display_value(),
            flags: string_flags(string, usage),
            pattern: string.pattern.clone(),
        })
        .collect::<Vec<_>>();

    let mut flags = 0;
    if def.private {
        flags |= RULE_FLAGS_PRIVATE;
    }
    if def.global {
        flags |= RULE_FLAGS_GLOBAL;
    }

    debug!(
        namespace = scope.namespace_name,
        rule = %def.name,
        strings = strings.len(),
        "compiled rule"
    );

    Ok(RawRule {
        identifier: def.name.clone(),
        namespace: scope.namespace,
        flags,
        tags: def.tags.clone(),
        metas: def
            .metas
            .iter()
            .map(|(name, value)| meta::encode(name, value))
            .collect(),
        strings,
        condition,
    })
}

fn check_duplicate_rule(def: &RuleDef, scope: &Scope<'_>) -> Result<(), CompileError> {
    if scope.rule_index(&def.name).is_some() {
        return Err(CompileError::DuplicateRule {
            namespace: scope.namespace_name.to_owned(),
            rule: def.name.clone(),
            line: def.line,
        });
    }
    Ok(())
}

fn check_strings(def: &RuleDef) -> Result<(), CompileError> {
    let mut seen = HashSet::new();
    for string in &def.strings {
        if string.name != "$" && !seen.insert(string.name.as_str()) {
            return Err(CompileError::DuplicateString {
                rule: def.name.clone(),
                string: string.name.clone(),
                line: string.line,
            });
        }
        check_pattern(def, string)?;
    }
    Ok(())
}

fn check_pattern(def: &RuleDef, string: &StringDef) -> Result<(), CompileError> {
    let invalid_modifier = |modifier: Modifier| CompileError::InvalidModifier {
        rule: def.name.clone(),
        string: string.name.clone(),
        modifier: modifier.as_str(),
        line: string.line,
    };
    let invalid_pattern = |message: String| CompileError::InvalidPattern {
        rule: def.name.clone(),
        string: string.name.clone(),
        message,
        line: string.line,
    };

    match &string.pattern {
        Pattern::Text(bytes) => {
            if bytes.is_empty() {
                return Err(CompileError::EmptyString {
                    rule: def.name.clone(),
                    string: string.name.clone(),
                    line: string.line,
                });
            }
        }
        Pattern::Hex(tokens) => {
            if let Some(modifier) = string.modifiers.first() {
                return Err(invalid_modifier(*modifier));
            }
            let is_jump = |t: Option<&HexToken>| matches!(t, Some(HexToken::Jump { .. }));
            if is_jump(tokens.first()) || is_jump(tokens.last()) {
                return Err(invalid_pattern(
                    "hex string cannot start or end with a jump".to_owned(),
                ));
            }
        }
        Pattern::Regex(_) => {
            if string.modifiers.contains(&Modifier::Wide) {
                return Err(invalid_modifier(Modifier::Wide));
            }
        }
    }

    let flags = string_flags(string, &Usage::default());
    if flags & STRING_FLAGS_REGEX_MATCHER != 0 {
        search::pattern_regex(&string.pattern, flags).map_err(|e| invalid_pattern(e.to_string()))?;
    }
    Ok(())
}

/// The engine's flag word for a string.
fn string_flags(string: &StringDef, usage: &Usage) -> u32 {
    let has = |modifier: Modifier| string.modifiers.contains(&modifier);
    let mut flags = ModifierFlags::empty();

    flags.set(ModifierFlags::REFERENCED, usage.referenced());
    flags.set(ModifierFlags::WIDE, has(Modifier::Wide));
    flags.set(ModifierFlags::ASCII, has(Modifier::Ascii) || !has(Modifier::Wide));
    flags.set(ModifierFlags::NOCASE, has(Modifier::Nocase));
    flags.set(ModifierFlags::FULLWORD, has(Modifier::Fullword));
    flags.set(ModifierFlags::ANONYMOUS, string.name == "$");
    flags.set(ModifierFlags::SINGLE, !usage.needs_all);
    flags.set(ModifierFlags::FIXED_OFFSET, usage.fixed_offset().is_some());

    let mut raw = 0;
    match &string.pattern {
        Pattern::Text(bytes) => {
            flags |= ModifierFlags::LITERAL;
            flags.set(ModifierFlags::FITS_IN_ATOM, bytes.len() <= 4);
        }
        Pattern::Hex(tokens) => {
            flags |= ModifierFlags::HEXADECIMAL;
            let bytes_only = tokens.iter().all(|t| matches!(t, HexToken::Byte { .. }));
            flags.set(ModifierFlags::FAST, bytes_only);
            if tokens.iter().all(HexToken::is_exact_byte) {
                flags |= ModifierFlags::LITERAL;
                flags.set(ModifierFlags::FITS_IN_ATOM, tokens.len() <= 4);
            } else {
                raw |= STRING_FLAGS_REGEX_MATCHER;
            }
        }
        Pattern::Regex(_) => {
            flags |= ModifierFlags::REGEXP;
            flags.set(ModifierFlags::DOT_ALL, has(Modifier::DotAll));
            raw |= STRING_FLAGS_REGEX_MATCHER;
        }
    }
    flags.bits() | raw
}

struct Resolver<'a> {
    def: &'a RuleDef,
    scope: &'a Scope<'a>,
    usage: Vec<Usage>,
}

impl Resolver<'_> {
    fn undefined_string(&self, id: &str) -> CompileError {
        CompileError::UndefinedString {
            rule: self.def.name.clone(),
            string: id.to_owned(),
            line: self.def.line,
        }
    }

    /// Anonymous strings cannot be named directly.
    fn string_index(&self, id: &str) -> Result<usize, CompileError> {
        self.def
            .strings
            .iter()
            .position(|s| s.name != "$" && s.name == id)
            .ok_or_else(|| self.undefined_string(id))
    }

    fn use_string(&mut self, index: usize, offset: Option<i64>, needs_all: bool) {
        if let Some(usage) = self.usage.get_mut(index) {
            usage.references.push(offset);
            usage.needs_all |= needs_all;
        }
    }

    fn string_set(&self, set: &StringSet) -> Result<Vec<usize>, CompileError> {
        match set {
            StringSet::Them => {
                if self.def.strings.is_empty() {
                    return Err(CompileError::EmptyStringSet {
                        rule: self.def.name.clone(),
                        line: self.def.line,
                    });
                }
                Ok((0..self.def.strings.len()).collect())
            }
            StringSet::Patterns(patterns) => {
                let mut indices = Vec::new();
                for pattern in patterns {
                    let matched: Vec<usize> = match pattern.strip_suffix('*') {
                        Some(prefix) => self
                            .def
                            .strings
                            .iter()
                            .enumerate()
                            .filter(|(_, s)| s.name.starts_with(prefix))
                            .map(|(i, _)| i)
                            .collect(),
                        None => vec![self.string_index(pattern)?],
                    };
                    if matched.is_empty() {
                        return Err(self.undefined_string(pattern));
                    }
                    for index in matched {
                        if !indices.contains(&index) {
                            indices.push(index);
                        }
                    }
                }
                Ok(indices)
            }
        }
    }

    fn identifier(&self, name: &str) -> Result<CompiledExpr, CompileError> {
        let scope = self.scope;
        if let Some(index) = scope.rule_index(name) {
            return Ok(CompiledExpr::RuleRef(index));
        }
        if let Some(index) = scope.externals.iter().position(|(n, _)| n == name) {
            return Ok(CompiledExpr::External(index));
        }
        Err(CompileError::UndefinedIdentifier {
            rule: self.def.name.clone(),
            identifier: name.to_owned(),
            line: self.def.line,
        })
    }

    fn resolve(&mut self, expr: &Expr) -> Result<CompiledExpr, CompileError> {
        Ok(match expr {
            Expr::Bool(v) => CompiledExpr::Literal(Value::Bool(*v)),
            Expr::Int(v) => CompiledExpr::Literal(Value::Int(*v)),
            Expr::Str(v) => CompiledExpr::Literal(Value::String(v.clone())),
            Expr::Filesize => CompiledExpr::Filesize,
            Expr::StringMatch(id) => {
                let index = self.string_index(id)?;
                self.use_string(index, None, false);
                CompiledExpr::StringMatch(index)
            }
            Expr::StringAt { id, offset } => {
                let index = self.string_index(id)?;
                let pinned = match offset.as_ref() {
                    Expr::Int(n) => Some(*n),
                    _ => None,
                };
                self.use_string(index, pinned, true);
                CompiledExpr::StringAt(index, Box::new(self.resolve(offset)?))
            }
            Expr::StringIn { id, start, end } => {
                let index = self.string_index(id)?;
                self.use_string(index, None, true);
                CompiledExpr::StringIn(
                    index,
                    Box::new(self.resolve(start)?),
                    Box::new(self.resolve(end)?),
                )
            }
            Expr::StringCount(id) => {
                let index = self.string_index(id)?;
                self.use_string(index, None, true);
                CompiledExpr::StringCount(index)
            }
            Expr::Of { quantifier, set } => {
                let strings = self.string_set(set)?;
                for &index in &strings {
                    self.use_string(index, None, false);
                }
                CompiledExpr::Of {
                    quantifier: *quantifier,
                    strings,
                }
            }
            Expr::Identifier(name) => self.identifier(name)?,
            Expr::Compare { left, op, right } => CompiledExpr::Compare {
                left: Box::new(self.resolve(left)?),
                op: *op,
                right: Box::new(self.resolve(right)?),
            },
            Expr::And(operands) => CompiledExpr::And(self.resolve_all(operands)?),
            Expr::Or(operands) => CompiledExpr::Or(self.resolve_all(operands)?),
            Expr::Not(inner) => CompiledExpr::Not(Box::new(self.resolve(inner)?)),
        })
    }

    fn resolve_all(&mut self, operands: &[Expr]) -> Result<Vec<CompiledExpr>, CompileError> {
        operands.iter().map(|operand| self.resolve(operand)).collect()
    }
}
