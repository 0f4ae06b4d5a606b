use crate::interval::IntervalSet;

/// An edge of the ATN: a target state plus the label that gates it.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub target: usize,
    pub label: TransitionKind,
}

/// The ten transition labels the offline tool emits.
///
/// Modeled as a tagged enum so the hot simulation loops dispatch on the
/// discriminant instead of through virtual calls; the payloads mirror the
/// serialized edge arguments one to one.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionKind {
    /// Non-consuming edge. `outermost_precedence_return` is set on the
    /// follow links leaving the stop state of a left-recursive rule and
    /// names that rule; the precedence filter keys on it.
    Epsilon {
        outermost_precedence_return: Option<usize>,
    },
    /// Matches exactly one symbol.
    Atom(i32),
    /// Matches any symbol in the closed range.
    Range(i32, i32),
    /// Matches any symbol in the set.
    Set(IntervalSet),
    /// Matches any in-vocabulary symbol outside the set.
    NotSet(IntervalSet),
    /// Matches any in-vocabulary symbol.
    Wildcard,
    /// Invokes a rule: the target is the rule's start state and the caller
    /// resumes at `follow_state`. `precedence` is forwarded to the callee's
    /// precedence filter when the callee is left-recursive.
    Rule {
        rule_index: usize,
        precedence: i32,
        follow_state: usize,
    },
    /// Gated by a semantic predicate the host evaluates.
    Predicate {
        rule_index: usize,
        pred_index: usize,
        is_ctx_dependent: bool,
    },
    /// Gated by comparing `precedence` against the parser's current
    /// precedence level.
    Precedence(i32),
    /// Runs a lexer action when the surrounding token is accepted.
    Action {
        rule_index: usize,
        action_index: usize,
        is_ctx_dependent: bool,
    },
}

impl Transition {
    pub fn epsilon(target: usize) -> Transition {
        Transition {
            target,
            label: TransitionKind::Epsilon {
                outermost_precedence_return: None,
            },
        }
    }

    /// True for edges crossed without consuming input.
    pub fn is_epsilon(&self) -> bool {
        matches!(
            self.label,
            TransitionKind::Epsilon { .. }
                | TransitionKind::Rule { .. }
                | TransitionKind::Predicate { .. }
                | TransitionKind::Precedence(_)
                | TransitionKind::Action { .. }
        )
    }

    /// Whether the edge consumes `symbol`, with `min..=max` as the
    /// vocabulary for negated and wildcard labels.
    pub fn matches(&self, symbol: i32, min: i32, max: i32) -> bool {
        match &self.label {
            TransitionKind::Atom(label) => *label == symbol,
            TransitionKind::Range(lo, hi) => *lo <= symbol && symbol <= *hi,
            TransitionKind::Set(set) => set.contains(symbol),
            TransitionKind::NotSet(set) => min <= symbol && symbol <= max && !set.contains(symbol),
            TransitionKind::Wildcard => min <= symbol && symbol <= max,
            _ => false,
        }
    }
}
