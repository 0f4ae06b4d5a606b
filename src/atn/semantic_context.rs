use super::Recognizer;
use std::sync::Arc;

/// A formula over the grammar's semantic predicates.
///
/// Leaves are single predicates or precedence checks; conjunctions and
/// disjunctions appear when the closure collects predicates from several
/// epsilon paths. Operands of `And`/`Or` are kept sorted and deduplicated
/// so structurally equal formulas compare equal, which the configuration
/// set dedup relies on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SemanticContext {
    /// The always-true predicate.
    None,
    Predicate {
        rule_index: usize,
        pred_index: usize,
        is_ctx_dependent: bool,
    },
    PrecedencePredicate {
        precedence: i32,
    },
    And(Vec<SemanticContext>),
    Or(Vec<SemanticContext>),
}

impl SemanticContext {
    pub fn none() -> Arc<SemanticContext> {
        Arc::new(SemanticContext::None)
    }

    pub fn is_none(&self) -> bool {
        matches!(self, SemanticContext::None)
    }

    /// Conjunction with the usual simplifications: the always-true operand
    /// disappears, nested conjunctions flatten, duplicate operands drop and
    /// of several precedence checks only the strictest survives.
    pub fn and(a: &SemanticContext, b: &SemanticContext) -> SemanticContext {
        if a.is_none() {
            return b.clone();
        }
        if b.is_none() {
            return a.clone();
        }
        let mut operands = Vec::new();
        collect_operands(a, true, &mut operands);
        collect_operands(b, true, &mut operands);
        operands = reduce_precedence(operands, true);
        operands.sort();
        operands.dedup();
        if operands.len() == 1 {
            return operands.pop().unwrap();
        }
        SemanticContext::And(operands)
    }

    /// Disjunction; the always-true operand absorbs the whole formula and
    /// of several precedence checks only the loosest survives.
    pub fn or(a: &SemanticContext, b: &SemanticContext) -> SemanticContext {
        if a.is_none() || b.is_none() {
            return SemanticContext::None;
        }
        let mut operands = Vec::new();
        collect_operands(a, false, &mut operands);
        collect_operands(b, false, &mut operands);
        operands = reduce_precedence(operands, false);
        operands.sort();
        operands.dedup();
        if operands.len() == 1 {
            return operands.pop().unwrap();
        }
        SemanticContext::Or(operands)
    }

    /// Evaluates the formula against the recognizer.
    pub fn eval(&self, host: &mut dyn Recognizer) -> bool {
        match self {
            SemanticContext::None => true,
            SemanticContext::Predicate {
                rule_index,
                pred_index,
                ..
            } => host.sempred(*rule_index, *pred_index),
            SemanticContext::PrecedencePredicate { precedence } => host.precpred(*precedence),
            SemanticContext::And(operands) => operands.iter().all(|op| op.eval(host)),
            SemanticContext::Or(operands) => operands.iter().any(|op| op.eval(host)),
        }
    }

    /// Partially evaluates the precedence checks, leaving user predicates
    /// in place. Returns None when the formula is already known false.
    pub fn eval_precedence(&self, host: &mut dyn Recognizer) -> Option<SemanticContext> {
        match self {
            SemanticContext::PrecedencePredicate { precedence } => {
                if host.precpred(*precedence) {
                    Some(SemanticContext::None)
                } else {
                    None
                }
            }
            SemanticContext::And(operands) => {
                let mut remaining = Vec::new();
                let mut changed = false;
                for op in operands {
                    let evaluated = op.eval_precedence(host)?;
                    changed |= evaluated != *op;
                    if !evaluated.is_none() {
                        remaining.push(evaluated);
                    }
                }
                if !changed {
                    return Some(self.clone());
                }
                Some(match remaining.len() {
                    0 => SemanticContext::None,
                    1 => remaining.pop().unwrap(),
                    _ => remaining
                        .into_iter()
                        .reduce(|acc, op| SemanticContext::and(&acc, &op))
                        .unwrap(),
                })
            }
            SemanticContext::Or(operands) => {
                let mut remaining = Vec::new();
                let mut changed = false;
                for op in operands {
                    match op.eval_precedence(host) {
                        None => changed = true,
                        Some(evaluated) => {
                            if evaluated.is_none() {
                                // one branch is definitely true
                                return Some(SemanticContext::None);
                            }
                            changed |= evaluated != *op;
                            remaining.push(evaluated);
                        }
                    }
                }
                if !changed {
                    return Some(self.clone());
                }
                match remaining.len() {
                    0 => None,
                    1 => Some(remaining.pop().unwrap()),
                    _ => Some(
                        remaining
                            .into_iter()
                            .reduce(|acc, op| SemanticContext::or(&acc, &op))
                            .unwrap(),
                    ),
                }
            }
            _ => Some(self.clone()),
        }
    }
}

/// Flattens nested conjunctions/disjunctions of the same polarity.
fn collect_operands(ctx: &SemanticContext, conjunction: bool, into: &mut Vec<SemanticContext>) {
    match (ctx, conjunction) {
        (SemanticContext::And(ops), true) | (SemanticContext::Or(ops), false) => {
            into.extend(ops.iter().cloned())
        }
        _ => into.push(ctx.clone()),
    }
}

/// Collapses all precedence checks to the strictest (and) or loosest (or).
fn reduce_precedence(operands: Vec<SemanticContext>, conjunction: bool) -> Vec<SemanticContext> {
    let mut best: Option<i32> = None;
    let mut rest = Vec::new();
    for op in operands {
        if let SemanticContext::PrecedencePredicate { precedence } = op {
            best = Some(match best {
                None => precedence,
                Some(prev) if conjunction => prev.max(precedence),
                Some(prev) => prev.min(precedence),
            });
        } else {
            rest.push(op);
        }
    }
    if let Some(precedence) = best {
        rest.push(SemanticContext::PrecedencePredicate { precedence });
    }
    rest
}

impl std::fmt::Display for SemanticContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SemanticContext::None => write!(f, "true"),
            SemanticContext::Predicate {
                rule_index,
                pred_index,
                ..
            } => write!(f, "{{{},{}}}?", rule_index, pred_index),
            SemanticContext::PrecedencePredicate { precedence } => {
                write!(f, "{{{}>=prec}}?", precedence)
            }
            SemanticContext::And(ops) => {
                for (i, op) in ops.iter().enumerate() {
                    if i > 0 {
                        write!(f, "&&")?;
                    }
                    write!(f, "{}", op)?;
                }
                Ok(())
            }
            SemanticContext::Or(ops) => {
                for (i, op) in ops.iter().enumerate() {
                    if i > 0 {
                        write!(f, "||")?;
                    }
                    write!(f, "{}", op)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::SemanticContext;
    use crate::atn::Recognizer;

    fn pred(rule: usize, index: usize) -> SemanticContext {
        SemanticContext::Predicate {
            rule_index: rule,
            pred_index: index,
            is_ctx_dependent: false,
        }
    }

    /// Passes predicates whose index is even and precedences up to a bound.
    struct EvenHost {
        max_precedence: i32,
    }

    impl Recognizer for EvenHost {
        fn sempred(&mut self, _rule: usize, pred_index: usize) -> bool {
            pred_index % 2 == 0
        }

        fn precpred(&mut self, precedence: i32) -> bool {
            precedence <= self.max_precedence
        }
    }

    #[test]
    fn and_with_none_is_identity() {
        let p = pred(0, 2);
        assert_eq!(SemanticContext::and(&SemanticContext::None, &p), p);
        assert_eq!(SemanticContext::and(&p, &SemanticContext::None), p);
    }

    #[test]
    fn or_with_none_absorbs() {
        let p = pred(0, 2);
        assert!(SemanticContext::or(&p, &SemanticContext::None).is_none());
    }

    #[test]
    fn and_is_commutative_after_sorting() {
        let a = pred(0, 1);
        let b = pred(1, 2);
        assert_eq!(SemanticContext::and(&a, &b), SemanticContext::and(&b, &a));
    }

    #[test]
    fn and_deduplicates() {
        let a = pred(0, 1);
        assert_eq!(SemanticContext::and(&a, &a.clone()), a);
    }

    #[test]
    fn and_keeps_strictest_precedence() {
        let lo = SemanticContext::PrecedencePredicate { precedence: 2 };
        let hi = SemanticContext::PrecedencePredicate { precedence: 5 };
        assert_eq!(SemanticContext::and(&lo, &hi), hi);
        assert_eq!(SemanticContext::or(&lo, &hi), lo);
    }

    #[test]
    fn eval_walks_operands() {
        let mut host = EvenHost { max_precedence: 3 };
        let both = SemanticContext::and(&pred(0, 2), &pred(0, 4));
        assert!(both.eval(&mut host));
        let mixed = SemanticContext::and(&pred(0, 2), &pred(0, 3));
        assert!(!mixed.eval(&mut host));
        let either = SemanticContext::or(&pred(0, 1), &pred(0, 2));
        assert!(either.eval(&mut host));
    }

    #[test]
    fn eval_precedence_resolves_checks() {
        let mut host = EvenHost { max_precedence: 3 };
        let passing = SemanticContext::PrecedencePredicate { precedence: 2 };
        assert_eq!(
            passing.eval_precedence(&mut host),
            Some(SemanticContext::None)
        );
        let failing = SemanticContext::PrecedencePredicate { precedence: 7 };
        assert_eq!(failing.eval_precedence(&mut host), None);
    }

    #[test]
    fn eval_precedence_keeps_user_predicates() {
        let mut host = EvenHost { max_precedence: 3 };
        let formula = SemanticContext::and(
            &SemanticContext::PrecedencePredicate { precedence: 1 },
            &pred(0, 2),
        );
        assert_eq!(formula.eval_precedence(&mut host), Some(pred(0, 2)));
    }
}
