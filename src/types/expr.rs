use std::fmt;

use super::Value;

/// Comparison operators supported in conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
}

/// How many strings of a set must match in an `of` expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantifier {
    All,
    Any,
    None,
    Count(i64),
}

/// The string set on the right-hand side of `of`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StringSet {
    /// Every string declared by the rule.
    Them,
    /// Explicit identifiers; a trailing `*` selects by prefix (`$a*`).
    Patterns(Vec<String>),
}

/// Condition AST as written in the rule source. String and rule names are
/// unresolved; compilation turns this into [`CompiledExpr`].
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Bool(bool),
    Int(i64),
    Str(String),
    Filesize,
    /// `$a`
    StringMatch(String),
    /// `$a at <expr>`
    StringAt { id: String, offset: Box<Expr> },
    /// `$a in (<expr>..<expr>)`
    StringIn {
        id: String,
        start: Box<Expr>,
        end: Box<Expr>,
    },
    /// `#a`
    StringCount(String),
    Of {
        quantifier: Quantifier,
        set: StringSet,
    },
    /// A previously declared rule or an external variable.
    Identifier(String),
    Compare {
        left: Box<Expr>,
        op: CompareOp,
        right: Box<Expr>,
    },
    /// Two or more operands, all of which must hold.
    And(Vec<Expr>),
    /// Two or more operands, any of which may hold.
    Or(Vec<Expr>),
    Not(Box<Expr>),
}

/// Condition with every name resolved to an index: strings to their position
/// in the owning rule, rule references to their position in the ruleset and
/// externals to their slot.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CompiledExpr {
    Literal(Value),
    Filesize,
    StringMatch(usize),
    StringAt(usize, Box<CompiledExpr>),
    StringIn(usize, Box<CompiledExpr>, Box<CompiledExpr>),
    StringCount(usize),
    Of {
        quantifier: Quantifier,
        strings: Vec<usize>,
    },
    RuleRef(usize),
    External(usize),
    Compare {
        left: Box<CompiledExpr>,
        op: CompareOp,
        right: Box<CompiledExpr>,
    },
    And(Vec<CompiledExpr>),
    Or(Vec<CompiledExpr>),
    Not(Box<CompiledExpr>),
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompareOp::Eq => write!(f, "=="),
            CompareOp::Neq => write!(f, "!="),
            CompareOp::Gt => write!(f, ">"),
            CompareOp::Gte => write!(f, ">="),
            CompareOp::Lt => write!(f, "<"),
            CompareOp::Lte => write!(f, "<="),
        }
    }
}

impl fmt::Display for Quantifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quantifier::All => write!(f, "all"),
            Quantifier::Any => write!(f, "any"),
            Quantifier::None => write!(f, "none"),
            Quantifier::Count(n) => write!(f, "{n}"),
        }
    }
}

impl fmt::Display for StringSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StringSet::Them => write!(f, "them"),
            StringSet::Patterns(ids) => write!(f, "({})", ids.join(", ")),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Bool(v) => write!(f, "{v}"),
            Expr::Int(v) => write!(f, "{v}"),
            Expr::Str(v) => write!(f, "\"{v}\""),
            Expr::Filesize => write!(f, "filesize"),
            Expr::StringMatch(id) => write!(f, "{id}"),
            Expr::StringAt { id, offset } => write!(f, "({id} at {offset})"),
            Expr::StringIn { id, start, end } => write!(f, "({id} in ({start}..{end}))"),
            Expr::StringCount(id) => write!(f, "#{}", id.trim_start_matches('$')),
            Expr::Of { quantifier, set } => write!(f, "({quantifier} of {set})"),
            Expr::Identifier(name) => write!(f, "{name}"),
            Expr::Compare { left, op, right } => write!(f, "({left} {op} {right})"),
            Expr::And(operands) => write_chain(f, operands, "and"),
            Expr::Or(operands) => write_chain(f, operands, "or"),
            Expr::Not(inner) => write!(f, "(not {inner})"),
        }
    }
}

fn write_chain(f: &mut fmt::Formatter<'_>, operands: &[Expr], op: &str) -> fmt::Result {
    write!(f, "(")?;
    for (i, operand) in operands.iter().enumerate() {
        if i > 0 {
            write!(f, " {op} ")?;
        }
        write!(f, "{operand}")?;
    }
    write!(f, ")")
}
