use crate::search::{MatchTable, Occurrence};
use crate::types::expr::CompiledExpr;
use crate::types::raw::RawRule;
use crate::types::{Quantifier, Value};

/// Inputs shared by every condition of one scan.
struct Frame<'a> {
    filesize: u64,
    externals: &'a [(String, Value)],
    results: &'a [bool],
}

/// Evaluate every rule condition in declaration order. A rule only refers to
/// rules declared before it, so one pass suffices. A failing global rule then
/// forces every rule of its namespace to false.
pub(crate) fn evaluate(
    rules: &[RawRule],
    namespace_count: usize,
    table: &MatchTable,
    filesize: u64,
    externals: &[(String, Value)],
) -> Vec<bool> {
    let mut results = vec![false; rules.len()];
    let empty: Vec<Vec<Occurrence>> = Vec::new();

    for (index, rule) in rules.iter().enumerate() {
        let frame = Frame {
            filesize,
            externals,
            results: &results,
        };
        let strings = table.get(index).unwrap_or(&empty);
        let matched = eval(&rule.condition, strings, &frame).is_truthy();
        if let Some(slot) = results.get_mut(index) {
            *slot = matched;
        }
    }

    let mut vetoed = vec![false; namespace_count];
    for (rule, matched) in rules.iter().zip(&results) {
        if rule.is_global() && !matched {
            if let Some(flag) = vetoed.get_mut(rule.namespace) {
                *flag = true;
            }
        }
    }
    for (rule, matched) in rules.iter().zip(results.iter_mut()) {
        if vetoed.get(rule.namespace).copied().unwrap_or(false) {
            *matched = false;
        }
    }
    results
}

fn eval(expr: &CompiledExpr, strings: &[Vec<Occurrence>], frame: &Frame<'_>) -> Value {
    let occurrences = |index: usize| strings.get(index).map_or(&[][..], Vec::as_slice);
    let int = |expr: &CompiledExpr| eval(expr, strings, frame).as_int();

    match expr {
        CompiledExpr::Literal(value) => value.clone(),
        CompiledExpr::Filesize => Value::Int(i64::try_from(frame.filesize).unwrap_or(i64::MAX)),
        CompiledExpr::StringMatch(index) => Value::Bool(!occurrences(*index).is_empty()),
        CompiledExpr::StringAt(index, offset) => {
            let hit = int(offset).is_some_and(|offset| {
                occurrences(*index)
                    .iter()
                    .any(|o| i64::try_from(o.offset).is_ok_and(|at| at == offset))
            });
            Value::Bool(hit)
        }
        CompiledExpr::StringIn(index, start, end) => {
            let hit = match (int(start), int(end)) {
                (Some(start), Some(end)) => occurrences(*index).iter().any(|o| {
                    i64::try_from(o.offset).is_ok_and(|at| start <= at && at <= end)
                }),
                _ => false,
            };
            Value::Bool(hit)
        }
        CompiledExpr::StringCount(index) => {
            Value::Int(i64::try_from(occurrences(*index).len()).unwrap_or(i64::MAX))
        }
        CompiledExpr::Of {
            quantifier,
            strings: set,
        } => {
            let matched = set
                .iter()
                .filter(|&&index| !occurrences(index).is_empty())
                .count();
            let matched = i64::try_from(matched).unwrap_or(i64::MAX);
            Value::Bool(match quantifier {
                Quantifier::All => usize::try_from(matched).is_ok_and(|m| m == set.len()),
                Quantifier::Any => matched > 0,
                Quantifier::None => matched == 0,
                Quantifier::Count(n) => matched >= *n,
            })
        }
        CompiledExpr::RuleRef(index) => {
            Value::Bool(frame.results.get(*index).copied().unwrap_or(false))
        }
        CompiledExpr::External(index) => frame
            .externals
            .get(*index)
            .map_or(Value::Bool(false), |(_, value)| value.clone()),
        CompiledExpr::Compare { left, op, right } => {
            let left = eval(left, strings, frame);
            let right = eval(right, strings, frame);
            Value::Bool(left.compare(*op, &right).unwrap_or(false))
        }
        CompiledExpr::And(operands) => Value::Bool(
            operands
                .iter()
                .all(|operand| eval(operand, strings, frame).is_truthy()),
        ),
        CompiledExpr::Or(operands) => Value::Bool(
            operands
                .iter()
                .any(|operand| eval(operand, strings, frame).is_truthy()),
        ),
        CompiledExpr::Not(inner) => Value::Bool(!eval(inner, strings, frame).is_truthy()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::raw::RULE_FLAGS_GLOBAL;
    use crate::types::CompareOp;

    fn rule(namespace: usize, flags: u32, condition: CompiledExpr) -> RawRule {
        RawRule {
            identifier: "r".into(),
            namespace,
            flags,
            tags: vec![],
            metas: vec![],
            strings: vec![],
            condition,
        }
    }

    fn hits(offsets: &[usize]) -> Vec<Occurrence> {
        offsets
            .iter()
            .map(|&offset| Occurrence { offset, len: 1 })
            .collect()
    }

    fn run(condition: CompiledExpr, strings: Vec<Vec<Occurrence>>) -> bool {
        let rules = vec![rule(0, 0, condition)];
        evaluate(&rules, 1, &vec![strings], 100, &[])[0]
    }

    #[test]
    fn string_predicates() {
        let table = || vec![hits(&[0, 10]), hits(&[])];
        assert!(run(CompiledExpr::StringMatch(0), table()));
        assert!(!run(CompiledExpr::StringMatch(1), table()));
        assert!(run(
            CompiledExpr::StringAt(0, Box::new(CompiledExpr::Literal(Value::Int(10)))),
            table()
        ));
        assert!(!run(
            CompiledExpr::StringAt(0, Box::new(CompiledExpr::Literal(Value::Int(5)))),
            table()
        ));
        assert!(run(
            CompiledExpr::StringIn(
                0,
                Box::new(CompiledExpr::Literal(Value::Int(5))),
                Box::new(CompiledExpr::Filesize),
            ),
            table()
        ));
    }

    #[test]
    fn count_and_quantifiers() {
        let table = || vec![hits(&[0, 1, 2]), hits(&[]), hits(&[7])];
        assert!(run(
            CompiledExpr::Compare {
                left: Box::new(CompiledExpr::StringCount(0)),
                op: CompareOp::Eq,
                right: Box::new(CompiledExpr::Literal(Value::Int(3))),
            },
            table()
        ));
        let of = |quantifier| CompiledExpr::Of {
            quantifier,
            strings: vec![0, 1, 2],
        };
        assert!(!run(of(Quantifier::All), table()));
        assert!(run(of(Quantifier::Any), table()));
        assert!(!run(of(Quantifier::None), table()));
        assert!(run(of(Quantifier::Count(2)), table()));
        assert!(!run(of(Quantifier::Count(3)), table()));
    }

    #[test]
    fn and_or_short_circuit_over_all_operands() {
        let table = || vec![hits(&[0]), hits(&[]), hits(&[4])];
        let matched = CompiledExpr::StringMatch;
        assert!(run(CompiledExpr::And(vec![matched(0), matched(2)]), table()));
        assert!(!run(
            CompiledExpr::And(vec![matched(0), matched(1), matched(2)]),
            table()
        ));
        assert!(run(CompiledExpr::Or(vec![matched(1), matched(2)]), table()));
        assert!(!run(CompiledExpr::Or(vec![matched(1), matched(1)]), table()));
    }

    #[test]
    fn rule_reference_sees_earlier_result() {
        let rules = vec![
            rule(0, 0, CompiledExpr::Literal(Value::Bool(true))),
            rule(0, 0, CompiledExpr::Not(Box::new(CompiledExpr::RuleRef(0)))),
        ];
        assert_eq!(evaluate(&rules, 1, &vec![vec![], vec![]], 0, &[]), vec![true, false]);
    }

    #[test]
    fn failing_global_vetoes_its_namespace_only() {
        let yes = || CompiledExpr::Literal(Value::Bool(true));
        let rules = vec![
            rule(0, RULE_FLAGS_GLOBAL, CompiledExpr::Literal(Value::Bool(false))),
            rule(0, 0, yes()),
            rule(1, 0, yes()),
        ];
        let table = vec![vec![], vec![], vec![]];
        assert_eq!(evaluate(&rules, 2, &table, 0, &[]), vec![false, false, true]);
    }

    #[test]
    fn externals_and_type_mismatch() {
        let externals = vec![("env".to_owned(), Value::String("prod".into()))];
        let rules = vec![
            rule(0, 0, CompiledExpr::External(0)),
            rule(
                0,
                0,
                CompiledExpr::Compare {
                    left: Box::new(CompiledExpr::External(0)),
                    op: CompareOp::Eq,
                    right: Box::new(CompiledExpr::Literal(Value::Int(1))),
                },
            ),
        ];
        assert_eq!(
            evaluate(&rules, 1, &vec![vec![], vec![]], 0, &externals),
            vec![true, false]
        );
    }
}
