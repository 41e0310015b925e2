//! Binary serialization and deserialization of compiled rules.
//!
//! This module provides a stable binary format for persisting compiled
//! [`Rules`](crate::Rules). The format consists of a 32-byte fixed header
//! followed by a bincode-encoded payload.
//!
//! ## Wire Format
//!
//! ```text
//! Offset  Size  Field
//! 0       4     Magic bytes: b"YRRW"
//! 4       2     Format version (u16, little-endian)
//! 6       2     Engine version (u16, little-endian)
//! 8       4     Flags (u32, reserved)
//! 12      4     Payload length in bytes (u32, little-endian)
//! 16      16    BLAKE3 hash of the payload (truncated to 16 bytes)
//! 32..    var   Bincode-encoded payload
//! ```
//!
//! ## Versioning
//!
//! The format version in the header must match exactly. If it does not,
//! deserialization fails immediately with [`DeserializeError::IncompatibleVersion`].
//! The engine version is informational only.
//!
//! ## Conditions and hex strings
//!
//! Conditions are stored as a postfix node list and hex alternatives as a
//! flat token stream with open, separator and close markers, so decoding
//! never recurses. Rebuilding rejects anything nested deeper than
//! [`MAX_DEPTH`].
//!
//! Encoding is deterministic: the same [`Rules`](crate::Rules) always encodes
//! to the same bytes.

use std::collections::HashSet;
use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::types::expr::CompiledExpr;
use crate::types::raw::{
    RawMeta, RawRule, RawString, META_TYPE_BOOLEAN, META_TYPE_INTEGER, META_TYPE_NULL,
    META_TYPE_STRING, RULE_FLAGS_ALL, STRING_FLAGS_ALL,
};
use crate::types::{CompareOp, HexToken, Pattern, Quantifier, Rules, Value};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const MAGIC: &[u8; 4] = b"YRRW";
const FORMAT_VERSION: u16 = 1;
const ENGINE_VERSION: u16 = 1;
const HEADER_SIZE: usize = 32;

/// Deepest condition tree or hex alternative nesting a payload may carry.
/// Source rules stay well below this because the parser caps nesting at
/// [`MAX_NESTING`](crate::parse::MAX_NESTING).
pub const MAX_DEPTH: usize = 512;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur when serializing [`Rules`](crate::Rules) to bytes.
#[derive(Debug, Error)]
pub enum SerializeError {
    #[error("failed to encode rules: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("payload of {0} bytes exceeds the 4 GiB format limit")]
    PayloadTooLarge(usize),

    #[error("I/O error during serialization: {0}")]
    Io(#[from] io::Error),
}

/// Errors that can occur when deserializing [`Rules`](crate::Rules) from bytes.
#[derive(Debug, Error)]
pub enum DeserializeError {
    #[error("not a yarrow binary: invalid magic bytes")]
    BadMagic,

    #[error("incompatible format version: blob is v{blob}, engine supports v{supported}")]
    IncompatibleVersion { blob: u16, supported: u16 },

    #[error("integrity check failed: BLAKE3 checksum mismatch")]
    ChecksumMismatch,

    #[error("payload length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: u32, actual: usize },

    #[error("failed to decode payload: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("I/O error during deserialization: {0}")]
    Io(#[from] io::Error),
}

fn invalid(message: impl Into<String>) -> DeserializeError {
    DeserializeError::Validation(message.into())
}

// ---------------------------------------------------------------------------
// Serialized type hierarchy
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct SerializedRules {
    metadata: PayloadMetadata,
    namespaces: Vec<String>,
    externals: Vec<(String, SerializedValue)>,
    rules: Vec<SerializedRule>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PayloadMetadata {
    rule_count: usize,
    namespace_count: usize,
    external_count: usize,
    string_count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct SerializedRule {
    identifier: String,
    namespace: usize,
    flags: u32,
    tags: Vec<String>,
    metas: Vec<SerializedMeta>,
    strings: Vec<SerializedString>,
    condition: Vec<SerializedNode>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SerializedMeta {
    identifier: String,
    kind: i32,
    string: Option<String>,
    integer: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct SerializedString {
    identifier: String,
    value: String,
    flags: u32,
    pattern: SerializedPattern,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum SerializedPattern {
    Text(Vec<u8>),
    Hex(Vec<SerializedHexToken>),
    Regex(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum SerializedHexToken {
    Byte { value: u8, mask: u8 },
    Jump { min: u32, max: Option<u32> },
    /// Opens an alternation and its first branch.
    AltOpen,
    /// Ends one branch of the innermost alternation and starts the next.
    AltNext,
    AltClose,
}

/// One condition node in postfix order. Operators take their operands from
/// the nodes before them.
#[derive(Debug, Clone, Serialize, Deserialize)]
enum SerializedNode {
    Literal(SerializedValue),
    Filesize,
    StringMatch(usize),
    /// Takes the offset.
    StringAt(usize),
    /// Takes the range start, then its end.
    StringIn(usize),
    StringCount(usize),
    Of {
        quantifier: SerializedQuantifier,
        strings: Vec<usize>,
    },
    RuleRef(usize),
    External(usize),
    /// Takes the left operand, then the right.
    Compare(SerializedCompareOp),
    /// Takes this many operands.
    And(usize),
    Or(usize),
    Not,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum SerializedValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
enum SerializedCompareOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
enum SerializedQuantifier {
    All,
    Any,
    None,
    Count(i64),
}

// ---------------------------------------------------------------------------
// Leaf conversions
// ---------------------------------------------------------------------------

fn serialize_op(op: CompareOp) -> SerializedCompareOp {
    match op {
        CompareOp::Eq => SerializedCompareOp::Eq,
        CompareOp::Neq => SerializedCompareOp::Neq,
        CompareOp::Gt => SerializedCompareOp::Gt,
        CompareOp::Gte => SerializedCompareOp::Gte,
        CompareOp::Lt => SerializedCompareOp::Lt,
        CompareOp::Lte => SerializedCompareOp::Lte,
    }
}

fn deserialize_op(op: SerializedCompareOp) -> CompareOp {
    match op {
        SerializedCompareOp::Eq => CompareOp::Eq,
        SerializedCompareOp::Neq => CompareOp::Neq,
        SerializedCompareOp::Gt => CompareOp::Gt,
        SerializedCompareOp::Gte => CompareOp::Gte,
        SerializedCompareOp::Lt => CompareOp::Lt,
        SerializedCompareOp::Lte => CompareOp::Lte,
    }
}

fn serialize_quantifier(quantifier: Quantifier) -> SerializedQuantifier {
    match quantifier {
        Quantifier::All => SerializedQuantifier::All,
        Quantifier::Any => SerializedQuantifier::Any,
        Quantifier::None => SerializedQuantifier::None,
        Quantifier::Count(n) => SerializedQuantifier::Count(n),
    }
}

fn deserialize_quantifier(quantifier: SerializedQuantifier) -> Quantifier {
    match quantifier {
        SerializedQuantifier::All => Quantifier::All,
        SerializedQuantifier::Any => Quantifier::Any,
        SerializedQuantifier::None => Quantifier::None,
        SerializedQuantifier::Count(n) => Quantifier::Count(n),
    }
}

fn serialize_value(value: &Value) -> SerializedValue {
    match value {
        Value::Int(v) => SerializedValue::Int(*v),
        Value::Float(v) => SerializedValue::Float(*v),
        Value::Bool(v) => SerializedValue::Bool(*v),
        Value::String(v) => SerializedValue::Str(v.clone()),
    }
}

fn deserialize_value(value: SerializedValue) -> Value {
    match value {
        SerializedValue::Int(v) => Value::Int(v),
        SerializedValue::Float(v) => Value::Float(v),
        SerializedValue::Bool(v) => Value::Bool(v),
        SerializedValue::Str(v) => Value::String(v),
    }
}

fn serialize_hex(tokens: &[HexToken], out: &mut Vec<SerializedHexToken>) {
    for token in tokens {
        match token {
            HexToken::Byte { value, mask } => out.push(SerializedHexToken::Byte {
                value: *value,
                mask: *mask,
            }),
            HexToken::Jump { min, max } => out.push(SerializedHexToken::Jump {
                min: *min,
                max: *max,
            }),
            HexToken::Alt(branches) => {
                out.push(SerializedHexToken::AltOpen);
                for (i, branch) in branches.iter().enumerate() {
                    if i > 0 {
                        out.push(SerializedHexToken::AltNext);
                    }
                    serialize_hex(branch, out);
                }
                out.push(SerializedHexToken::AltClose);
            }
        }
    }
}

/// An alternation being rebuilt: the tokens before it and its finished
/// branches.
struct OpenAlt {
    outer: Vec<HexToken>,
    branches: Vec<Vec<HexToken>>,
}

fn deserialize_hex(tokens: Vec<SerializedHexToken>) -> Result<Vec<HexToken>, DeserializeError> {
    let mut open: Vec<OpenAlt> = Vec::new();
    let mut current = Vec::new();

    let finish_branch = |current: &mut Vec<HexToken>| {
        if current.is_empty() {
            return Err(invalid("empty hex alternative"));
        }
        Ok(std::mem::take(current))
    };

    for token in tokens {
        match token {
            SerializedHexToken::Byte { value, mask } => {
                current.push(HexToken::Byte { value, mask });
            }
            SerializedHexToken::Jump { min, max } => current.push(HexToken::Jump { min, max }),
            SerializedHexToken::AltOpen => {
                if open.len() >= MAX_DEPTH {
                    return Err(invalid(format!(
                        "hex alternatives nested deeper than {MAX_DEPTH} levels"
                    )));
                }
                open.push(OpenAlt {
                    outer: std::mem::take(&mut current),
                    branches: Vec::new(),
                });
            }
            SerializedHexToken::AltNext => {
                let branch = finish_branch(&mut current)?;
                open.last_mut()
                    .ok_or_else(|| invalid("hex separator outside an alternation"))?
                    .branches
                    .push(branch);
            }
            SerializedHexToken::AltClose => {
                let branch = finish_branch(&mut current)?;
                let mut alt = open.pop().ok_or_else(|| invalid("unbalanced hex alternation"))?;
                alt.branches.push(branch);
                current = alt.outer;
                current.push(HexToken::Alt(alt.branches));
            }
        }
    }

    if !open.is_empty() {
        return Err(invalid("unterminated hex alternation"));
    }
    Ok(current)
}

fn serialize_pattern(pattern: &Pattern) -> SerializedPattern {
    match pattern {
        Pattern::Text(bytes) => SerializedPattern::Text(bytes.clone()),
        Pattern::Hex(tokens) => {
            let mut out = Vec::new();
            serialize_hex(tokens, &mut out);
            SerializedPattern::Hex(out)
        }
        Pattern::Regex(body) => SerializedPattern::Regex(body.clone()),
    }
}

fn deserialize_pattern(pattern: SerializedPattern) -> Result<Pattern, DeserializeError> {
    Ok(match pattern {
        SerializedPattern::Text(bytes) => Pattern::Text(bytes),
        SerializedPattern::Hex(tokens) => Pattern::Hex(deserialize_hex(tokens)?),
        SerializedPattern::Regex(body) => Pattern::Regex(body),
    })
}

// ---------------------------------------------------------------------------
// Conditions (tree -> postfix)
// ---------------------------------------------------------------------------

fn condition_to_postfix(expr: &CompiledExpr, out: &mut Vec<SerializedNode>) {
    let node = match expr {
        CompiledExpr::Literal(value) => SerializedNode::Literal(serialize_value(value)),
        CompiledExpr::Filesize => SerializedNode::Filesize,
        CompiledExpr::StringMatch(idx) => SerializedNode::StringMatch(*idx),
        CompiledExpr::StringAt(idx, offset) => {
            condition_to_postfix(offset, out);
            SerializedNode::StringAt(*idx)
        }
        CompiledExpr::StringIn(idx, start, end) => {
            condition_to_postfix(start, out);
            condition_to_postfix(end, out);
            SerializedNode::StringIn(*idx)
        }
        CompiledExpr::StringCount(idx) => SerializedNode::StringCount(*idx),
        CompiledExpr::Of {
            quantifier,
            strings,
        } => SerializedNode::Of {
            quantifier: serialize_quantifier(*quantifier),
            strings: strings.clone(),
        },
        CompiledExpr::RuleRef(idx) => SerializedNode::RuleRef(*idx),
        CompiledExpr::External(idx) => SerializedNode::External(*idx),
        CompiledExpr::Compare { left, op, right } => {
            condition_to_postfix(left, out);
            condition_to_postfix(right, out);
            SerializedNode::Compare(serialize_op(*op))
        }
        CompiledExpr::And(operands) => {
            operands.iter().for_each(|operand| condition_to_postfix(operand, out));
            SerializedNode::And(operands.len())
        }
        CompiledExpr::Or(operands) => {
            operands.iter().for_each(|operand| condition_to_postfix(operand, out));
            SerializedNode::Or(operands.len())
        }
        CompiledExpr::Not(inner) => {
            condition_to_postfix(inner, out);
            SerializedNode::Not
        }
    };
    out.push(node);
}

// ---------------------------------------------------------------------------
// Conditions (postfix -> tree)
// ---------------------------------------------------------------------------

/// Operands waiting for their operator, each with the depth of its subtree.
struct Operands(Vec<(CompiledExpr, usize)>);

impl Operands {
    fn pop(&mut self) -> Result<(CompiledExpr, usize), DeserializeError> {
        self.0
            .pop()
            .ok_or_else(|| invalid("condition operator is missing an operand"))
    }

    fn pop_boxed(&mut self) -> Result<(Box<CompiledExpr>, usize), DeserializeError> {
        self.pop().map(|(expr, depth)| (Box::new(expr), depth))
    }

    /// The last `count` operands in their original order.
    fn pop_many(&mut self, count: usize) -> Result<(Vec<CompiledExpr>, usize), DeserializeError> {
        if count == 0 {
            return Err(invalid("empty And/Or expression"));
        }
        let start = self
            .0
            .len()
            .checked_sub(count)
            .ok_or_else(|| invalid("condition operator is missing an operand"))?;
        let mut depth = 0;
        let operands = self
            .0
            .drain(start..)
            .map(|(expr, d)| {
                depth = depth.max(d);
                expr
            })
            .collect();
        Ok((operands, depth))
    }
}

fn condition_from_postfix(nodes: Vec<SerializedNode>) -> Result<CompiledExpr, DeserializeError> {
    let mut stack = Operands(Vec::new());

    for node in nodes {
        let (expr, below) = match node {
            SerializedNode::Literal(value) => (CompiledExpr::Literal(deserialize_value(value)), 0),
            SerializedNode::Filesize => (CompiledExpr::Filesize, 0),
            SerializedNode::StringMatch(idx) => (CompiledExpr::StringMatch(idx), 0),
            SerializedNode::StringCount(idx) => (CompiledExpr::StringCount(idx), 0),
            SerializedNode::Of {
                quantifier,
                strings,
            } => (
                CompiledExpr::Of {
                    quantifier: deserialize_quantifier(quantifier),
                    strings,
                },
                0,
            ),
            SerializedNode::RuleRef(idx) => (CompiledExpr::RuleRef(idx), 0),
            SerializedNode::External(idx) => (CompiledExpr::External(idx), 0),
            SerializedNode::StringAt(idx) => {
                let (offset, depth) = stack.pop_boxed()?;
                (CompiledExpr::StringAt(idx, offset), depth)
            }
            SerializedNode::StringIn(idx) => {
                let (end, end_depth) = stack.pop_boxed()?;
                let (start, start_depth) = stack.pop_boxed()?;
                (
                    CompiledExpr::StringIn(idx, start, end),
                    start_depth.max(end_depth),
                )
            }
            SerializedNode::Compare(op) => {
                let (right, right_depth) = stack.pop_boxed()?;
                let (left, left_depth) = stack.pop_boxed()?;
                let expr = CompiledExpr::Compare {
                    left,
                    op: deserialize_op(op),
                    right,
                };
                (expr, left_depth.max(right_depth))
            }
            SerializedNode::And(count) => {
                let (operands, depth) = stack.pop_many(count)?;
                (CompiledExpr::And(operands), depth)
            }
            SerializedNode::Or(count) => {
                let (operands, depth) = stack.pop_many(count)?;
                (CompiledExpr::Or(operands), depth)
            }
            SerializedNode::Not => {
                let (inner, depth) = stack.pop_boxed()?;
                (CompiledExpr::Not(inner), depth)
            }
        };
        let depth = below + 1;
        if depth > MAX_DEPTH {
            return Err(invalid(format!(
                "condition nested deeper than {MAX_DEPTH} levels"
            )));
        }
        stack.0.push((expr, depth));
    }

    let (condition, _) = stack.0.pop().ok_or_else(|| invalid("empty condition"))?;
    if !stack.0.is_empty() {
        return Err(invalid(format!(
            "condition leaves {} unused operands",
            stack.0.len()
        )));
    }
    Ok(condition)
}

// ---------------------------------------------------------------------------
// Rules -> SerializedRules
// ---------------------------------------------------------------------------

fn rules_to_serialized(rules: &Rules) -> SerializedRules {
    let serialized: Vec<SerializedRule> = rules
        .rules
        .iter()
        .map(|rule| SerializedRule {
            identifier: rule.identifier.clone(),
            namespace: rule.namespace,
            flags: rule.flags,
            tags: rule.tags.clone(),
            metas: rule
                .metas
                .iter()
                .map(|m| SerializedMeta {
                    identifier: m.identifier.clone(),
                    kind: m.kind,
                    string: m.string.clone(),
                    integer: m.integer,
                })
                .collect(),
            strings: rule
                .strings
                .iter()
                .map(|s| SerializedString {
                    identifier: s.identifier.clone(),
                    value: s.value.clone(),
                    flags: s.flags,
                    pattern: serialize_pattern(&s.pattern),
                })
                .collect(),
            condition: {
                let mut nodes = Vec::new();
                condition_to_postfix(&rule.condition, &mut nodes);
                nodes
            },
        })
        .collect();

    SerializedRules {
        metadata: PayloadMetadata {
            rule_count: rules.rules.len(),
            namespace_count: rules.namespaces.len(),
            external_count: rules.externals.len(),
            string_count: rules.rules.iter().map(|r| r.strings.len()).sum(),
        },
        namespaces: rules.namespaces.clone(),
        externals: rules
            .externals
            .iter()
            .map(|(name, value)| (name.clone(), serialize_value(value)))
            .collect(),
        rules: serialized,
    }
}

// ---------------------------------------------------------------------------
// SerializedRules -> Rules
// ---------------------------------------------------------------------------

fn serialized_to_rules(ser: SerializedRules) -> Result<Rules, DeserializeError> {
    validate(&ser)?;

    let rules = ser
        .rules
        .into_iter()
        .map(|sr| {
            Ok(RawRule {
                identifier: sr.identifier,
                namespace: sr.namespace,
                flags: sr.flags,
                tags: sr.tags,
                metas: sr
                    .metas
                    .into_iter()
                    .map(|m| RawMeta {
                        identifier: m.identifier,
                        kind: m.kind,
                        string: m.string,
                        integer: m.integer,
                    })
                    .collect(),
                strings: sr
                    .strings
                    .into_iter()
                    .map(|s| {
                        Ok(RawString {
                            identifier: s.identifier,
                            value: s.value,
                            flags: s.flags,
                            pattern: deserialize_pattern(s.pattern)?,
                        })
                    })
                    .collect::<Result<_, DeserializeError>>()?,
                condition: condition_from_postfix(sr.condition)?,
            })
        })
        .collect::<Result<Vec<_>, DeserializeError>>()?;

    let externals = ser
        .externals
        .into_iter()
        .map(|(name, value)| (name, deserialize_value(value)))
        .collect();

    Rules::new(ser.namespaces, rules, externals)
        .map_err(|e| invalid(format!("pattern index rebuild failed: {e}")))
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(ser: &SerializedRules) -> Result<(), DeserializeError> {
    let rule_count = ser.rules.len();
    let namespace_count = ser.namespaces.len();
    let external_count = ser.externals.len();
    let string_count: usize = ser.rules.iter().map(|r| r.strings.len()).sum();

    // Metadata consistency
    let counts = [
        ("rules", ser.metadata.rule_count, rule_count),
        ("namespaces", ser.metadata.namespace_count, namespace_count),
        ("externals", ser.metadata.external_count, external_count),
        ("strings", ser.metadata.string_count, string_count),
    ];
    for (what, declared, actual) in counts {
        if declared != actual {
            return Err(invalid(format!(
                "metadata says {declared} {what} but payload has {actual}"
            )));
        }
    }

    let mut names = HashSet::new();
    for (name, _) in &ser.externals {
        if !names.insert(name.as_str()) {
            return Err(invalid(format!("duplicate external variable '{name}'")));
        }
    }

    let mut seen = HashSet::new();
    for (index, rule) in ser.rules.iter().enumerate() {
        if rule.namespace >= namespace_count {
            return Err(invalid(format!(
                "rule '{}' has namespace index {} but only {namespace_count} namespaces exist",
                rule.identifier, rule.namespace
            )));
        }
        if !seen.insert((rule.namespace, rule.identifier.as_str())) {
            return Err(invalid(format!(
                "duplicate rule '{}' in namespace {}",
                rule.identifier, rule.namespace
            )));
        }
        if rule.flags & !RULE_FLAGS_ALL != 0 {
            return Err(invalid(format!(
                "rule '{}' has unknown flag bits {:#x}",
                rule.identifier, rule.flags
            )));
        }
        for meta in &rule.metas {
            validate_meta(meta)?;
        }
        for string in &rule.strings {
            validate_string(string)?;
        }
        let scope = ExprScope {
            rules: &ser.rules,
            current: index,
            string_count: rule.strings.len(),
            external_count,
        };
        for node in &rule.condition {
            validate_node(node, &scope)?;
        }
    }

    Ok(())
}

fn validate_meta(meta: &SerializedMeta) -> Result<(), DeserializeError> {
    match meta.kind {
        META_TYPE_NULL | META_TYPE_INTEGER | META_TYPE_BOOLEAN => Ok(()),
        META_TYPE_STRING if meta.string.is_some() => Ok(()),
        META_TYPE_STRING => Err(invalid(format!(
            "string metadata '{}' has no payload",
            meta.identifier
        ))),
        kind => Err(invalid(format!(
            "metadata '{}' has unknown type {kind}",
            meta.identifier
        ))),
    }
}

fn validate_string(string: &SerializedString) -> Result<(), DeserializeError> {
    if string.flags & !STRING_FLAGS_ALL != 0 {
        return Err(invalid(format!(
            "string '{}' has unknown flag bits {:#x}",
            string.identifier, string.flags
        )));
    }
    let empty = match &string.pattern {
        SerializedPattern::Text(bytes) => bytes.is_empty(),
        SerializedPattern::Hex(tokens) => tokens.is_empty(),
        SerializedPattern::Regex(body) => body.is_empty(),
    };
    if empty {
        return Err(invalid(format!("string '{}' is empty", string.identifier)));
    }
    Ok(())
}

struct ExprScope<'a> {
    rules: &'a [SerializedRule],
    current: usize,
    string_count: usize,
    external_count: usize,
}

impl ExprScope<'_> {
    fn string(&self, idx: usize) -> Result<(), DeserializeError> {
        if idx >= self.string_count {
            return Err(invalid(format!(
                "string index {idx} out of bounds (max {})",
                self.string_count
            )));
        }
        Ok(())
    }
}

/// Index checks for one condition node. Shape and depth are checked when the
/// postfix list is rebuilt.
fn validate_node(node: &SerializedNode, scope: &ExprScope<'_>) -> Result<(), DeserializeError> {
    match node {
        SerializedNode::StringMatch(idx)
        | SerializedNode::StringCount(idx)
        | SerializedNode::StringAt(idx)
        | SerializedNode::StringIn(idx) => scope.string(*idx),
        SerializedNode::Of { strings, .. } => {
            if strings.is_empty() {
                return Err(invalid("empty string set"));
            }
            strings.iter().try_for_each(|idx| scope.string(*idx))
        }
        SerializedNode::RuleRef(idx) => {
            if *idx >= scope.current {
                return Err(invalid(format!(
                    "rule ref {idx} violates declaration order (current rule index {})",
                    scope.current
                )));
            }
            let same_namespace = match (scope.rules.get(*idx), scope.rules.get(scope.current)) {
                (Some(target), Some(current)) => target.namespace == current.namespace,
                _ => false,
            };
            if !same_namespace {
                return Err(invalid(format!("rule ref {idx} crosses namespaces")));
            }
            Ok(())
        }
        SerializedNode::External(idx) => {
            if *idx >= scope.external_count {
                return Err(invalid(format!(
                    "external {idx} out of bounds (max {})",
                    scope.external_count
                )));
            }
            Ok(())
        }
        SerializedNode::Literal(_)
        | SerializedNode::Filesize
        | SerializedNode::Compare(_)
        | SerializedNode::And(_)
        | SerializedNode::Or(_)
        | SerializedNode::Not => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Header I/O
// ---------------------------------------------------------------------------

fn write_header(buf: &mut Vec<u8>, payload: &[u8]) -> Result<(), SerializeError> {
    let payload_len =
        u32::try_from(payload.len()).map_err(|_| SerializeError::PayloadTooLarge(payload.len()))?;
    let hash = blake3::hash(payload);

    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    buf.extend_from_slice(&ENGINE_VERSION.to_le_bytes());
    buf.extend_from_slice(&0u32.to_le_bytes()); // flags (reserved)
    buf.extend_from_slice(&payload_len.to_le_bytes());
    buf.extend_from_slice(&hash.as_bytes()[..16]);
    Ok(())
}

struct Header {
    payload_len: u32,
    hash: [u8; 16],
}

#[allow(clippy::cast_possible_truncation)] // HEADER_SIZE is 32, always fits in u32
fn read_header(bytes: &[u8]) -> Result<Header, DeserializeError> {
    let Some(header) = bytes.get(..HEADER_SIZE) else {
        return Err(DeserializeError::LengthMismatch {
            expected: HEADER_SIZE as u32,
            actual: bytes.len(),
        });
    };

    if &header[0..4] != MAGIC {
        return Err(DeserializeError::BadMagic);
    }

    let format_version = u16::from_le_bytes([header[4], header[5]]);
    if format_version != FORMAT_VERSION {
        return Err(DeserializeError::IncompatibleVersion {
            blob: format_version,
            supported: FORMAT_VERSION,
        });
    }
    // header[6..8] is engine_version (informational, not used for checks)
    // header[8..12] is flags (reserved)
    let payload_len = u32::from_le_bytes([header[12], header[13], header[14], header[15]]);

    let mut hash = [0u8; 16];
    hash.copy_from_slice(&header[16..32]);

    Ok(Header { payload_len, hash })
}

fn decode_payload(header: &Header, payload: &[u8]) -> Result<Rules, DeserializeError> {
    if blake3::hash(payload).as_bytes()[..16] != header.hash {
        return Err(DeserializeError::ChecksumMismatch);
    }

    let (serialized, consumed): (SerializedRules, usize) =
        bincode::serde::decode_from_slice(payload, bincode::config::standard())?;
    if consumed != payload.len() {
        return Err(invalid(format!(
            "{} trailing bytes after payload",
            payload.len() - consumed
        )));
    }

    let rules = serialized_to_rules(serialized)?;
    debug!(rules = rules.len(), bytes = payload.len(), "decoded rules");
    Ok(rules)
}

/// Read until `buf` is full or the reader reports end of input.
fn fill(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

// ---------------------------------------------------------------------------
// Crate-level encode/decode
// ---------------------------------------------------------------------------

pub(crate) fn encode(rules: &Rules) -> Result<Vec<u8>, SerializeError> {
    let serialized = rules_to_serialized(rules);
    let payload = bincode::serde::encode_to_vec(&serialized, bincode::config::standard())?;

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    write_header(&mut buf, &payload)?;
    buf.extend_from_slice(&payload);
    debug!(rules = rules.len(), bytes = buf.len(), "encoded rules");
    Ok(buf)
}

pub(crate) fn decode(bytes: &[u8]) -> Result<Rules, DeserializeError> {
    let header = read_header(bytes).inspect_err(|e| warn!(error = %e, "rejected rules blob"))?;

    let payload = &bytes[HEADER_SIZE..];
    if payload.len() != header.payload_len as usize {
        let err = DeserializeError::LengthMismatch {
            expected: header.payload_len,
            actual: payload.len(),
        };
        warn!(error = %err, "rejected rules blob");
        return Err(err);
    }

    decode_payload(&header, payload).inspect_err(|e| warn!(error = %e, "rejected rules blob"))
}

pub(crate) fn write(rules: &Rules, mut writer: impl Write) -> Result<(), SerializeError> {
    let bytes = encode(rules)?;
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}

pub(crate) fn read(mut reader: impl Read) -> Result<Rules, DeserializeError> {
    let mut header_bytes = [0u8; HEADER_SIZE];
    let filled = fill(&mut reader, &mut header_bytes)?;
    let header = read_header(&header_bytes[..filled])
        .inspect_err(|e| warn!(error = %e, "rejected rules stream"))?;

    let mut payload = Vec::new();
    reader
        .by_ref()
        .take(u64::from(header.payload_len))
        .read_to_end(&mut payload)?;
    if payload.len() != header.payload_len as usize {
        let err = DeserializeError::LengthMismatch {
            expected: header.payload_len,
            actual: payload.len(),
        };
        warn!(error = %err, "rejected rules stream");
        return Err(err);
    }

    decode_payload(&header, &payload).inspect_err(|e| warn!(error = %e, "rejected rules stream"))
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
