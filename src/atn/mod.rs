pub mod config;
pub mod config_set;
pub mod deserializer;
pub mod lexer_action;
pub mod semantic_context;
pub mod transition;

use crate::fxhashset;
use crate::interval::{IntervalSet, MAX_CHAR};
use crate::token;
use rustc_hash::FxHashSet;
use transition::{Transition, TransitionKind};

/// Alternative number that never names a real alternative.
pub const INVALID_ALT: u32 = 0;

/// Whether a serialized automaton drives a lexer or a parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrammarType {
    Lexer,
    Parser,
}

/// Structural role of a state, with the per-role payload.
///
/// Decision states (the block starts, the loop-back states, the star loop
/// entry and the token start) carry the decision index assigned by the
/// offline tool plus the non-greedy flag of the surrounding subrule.
#[derive(Debug, Clone, PartialEq)]
pub enum AtnStateKind {
    Basic,
    RuleStart {
        stop_state: usize,
        left_recursive: bool,
    },
    RuleStop,
    BlockStart {
        end_state: usize,
        decision: usize,
        non_greedy: bool,
    },
    StarBlockStart {
        end_state: usize,
        decision: usize,
        non_greedy: bool,
    },
    PlusBlockStart {
        end_state: usize,
        loop_back: usize,
        decision: usize,
        non_greedy: bool,
    },
    BlockEnd {
        start_state: usize,
    },
    StarLoopEntry {
        loop_back: usize,
        /// Set on the loop entry that implements a left-recursive rule;
        /// prediction filters configurations by precedence there.
        precedence_decision: bool,
        decision: usize,
        non_greedy: bool,
    },
    StarLoopBack,
    PlusLoopBack {
        decision: usize,
        non_greedy: bool,
    },
    LoopEnd {
        loop_back: usize,
    },
    TokenStart {
        decision: usize,
        non_greedy: bool,
    },
}

/// One node of the ATN. States live in the arena owned by [Atn] and refer
/// to each other by index.
#[derive(Debug, Clone)]
pub struct AtnState {
    pub state_number: usize,
    pub rule_index: usize,
    pub kind: AtnStateKind,
    pub transitions: Vec<Transition>,
}

impl AtnState {
    /// The decision index, for states prediction can be asked about.
    pub fn decision(&self) -> Option<usize> {
        match self.kind {
            AtnStateKind::BlockStart { decision, .. }
            | AtnStateKind::StarBlockStart { decision, .. }
            | AtnStateKind::PlusBlockStart { decision, .. }
            | AtnStateKind::StarLoopEntry { decision, .. }
            | AtnStateKind::PlusLoopBack { decision, .. }
            | AtnStateKind::TokenStart { decision, .. } => Some(decision),
            _ => None,
        }
    }

    pub fn is_decision(&self) -> bool {
        self.decision().is_some()
    }

    pub fn non_greedy(&self) -> bool {
        match self.kind {
            AtnStateKind::BlockStart { non_greedy, .. }
            | AtnStateKind::StarBlockStart { non_greedy, .. }
            | AtnStateKind::PlusBlockStart { non_greedy, .. }
            | AtnStateKind::StarLoopEntry { non_greedy, .. }
            | AtnStateKind::PlusLoopBack { non_greedy, .. }
            | AtnStateKind::TokenStart { non_greedy, .. } => non_greedy,
            _ => false,
        }
    }

    pub fn is_rule_stop(&self) -> bool {
        matches!(self.kind, AtnStateKind::RuleStop)
    }

    /// True when every outgoing edge is non-consuming. States without
    /// transitions report false so the closure records them as reachable.
    pub fn only_epsilon_transitions(&self) -> bool {
        !self.transitions.is_empty() && self.transitions.iter().all(Transition::is_epsilon)
    }
}

/// Hooks the prediction engine needs from the recognizer driving it.
///
/// Generated recognizers override both; the interpreters keep the default
/// `sempred` (every user predicate passes) and answer `precpred` from the
/// live precedence stack.
pub trait Recognizer {
    fn sempred(&mut self, _rule_index: usize, _pred_index: usize) -> bool {
        true
    }

    fn precpred(&mut self, _precedence: i32) -> bool {
        true
    }
}

/// The augmented transition network for one grammar.
///
/// Immutable once the deserializer hands it out; recognizers share it
/// behind an `Arc` together with the decision DFAs and the context cache.
#[derive(Debug)]
pub struct Atn {
    pub grammar_type: GrammarType,
    pub max_token_type: i32,
    pub states: Vec<AtnState>,
    /// Decision index to decision state.
    pub decision_to_state: Vec<usize>,
    pub rule_to_start_state: Vec<usize>,
    pub rule_to_stop_state: Vec<usize>,
    /// For lexer grammars, the token type each rule announces.
    pub rule_to_token_type: Vec<i32>,
    /// Synthetic token types standing in for whole rules, when the tool
    /// generated them. [token::INVALID_TYPE] where absent.
    pub rule_to_bypass_token_type: Vec<i32>,
    /// For lexer grammars, the start state of each mode.
    pub mode_to_start_state: Vec<usize>,
    /// Lexer action table referenced by action transitions.
    pub lexer_actions: Vec<lexer_action::LexerAction>,
}

impl Atn {
    /// The closed range of consumable symbols: characters for lexer
    /// automata, user token types for parser automata.
    pub fn symbol_universe(&self) -> (i32, i32) {
        match self.grammar_type {
            GrammarType::Lexer => (0, MAX_CHAR),
            GrammarType::Parser => (token::MIN_USER_TOKEN_TYPE, self.max_token_type),
        }
    }

    /// First symbols consumable from `state`, context free.
    ///
    /// The pseudo symbol [token::EPSILON] appears in the result when the
    /// surrounding rule can end before consuming anything.
    pub fn next_tokens(&self, state: usize) -> IntervalSet {
        let mut look = IntervalSet::new();
        let mut visited = fxhashset![];
        self.look(state, &mut look, &mut visited);
        look
    }

    fn look(&self, s: usize, look: &mut IntervalSet, visited: &mut FxHashSet<usize>) {
        if !visited.insert(s) {
            return;
        }
        if self.states[s].is_rule_stop() {
            look.add_one(token::EPSILON);
            return;
        }
        let (min, max) = self.symbol_universe();
        for t in &self.states[s].transitions {
            match &t.label {
                TransitionKind::Rule { follow_state, .. } => {
                    let mut sub = IntervalSet::new();
                    self.look(t.target, &mut sub, visited);
                    let epsilon = IntervalSet::of_one(token::EPSILON);
                    look.add_set(&sub.subtract(&epsilon));
                    if sub.contains(token::EPSILON) {
                        self.look(*follow_state, look, visited);
                    }
                }
                TransitionKind::Epsilon { .. }
                | TransitionKind::Predicate { .. }
                | TransitionKind::Precedence(_)
                | TransitionKind::Action { .. } => self.look(t.target, look, visited),
                TransitionKind::Atom(label) => look.add_one(*label),
                TransitionKind::Range(lo, hi) => look.add_range(*lo, *hi),
                TransitionKind::Set(set) => look.add_set(set),
                TransitionKind::NotSet(set) => look.add_set(&set.complement(min, max)),
                TransitionKind::Wildcard => look.add_range(min, max),
            }
        }
    }

    /// Tokens acceptable at `state` given the chain of rule-invocation
    /// states from the innermost frame outwards. Used for error messages
    /// and resynchronization sets.
    pub fn expected_tokens(&self, state: usize, invoking_states: &[usize]) -> IntervalSet {
        let epsilon = IntervalSet::of_one(token::EPSILON);
        let mut following = self.next_tokens(state);
        let mut expected = following.subtract(&epsilon);
        if !following.contains(token::EPSILON) {
            return expected;
        }
        for &invoking in invoking_states {
            if !following.contains(token::EPSILON) {
                break;
            }
            let follow = self.rule_invocation_follow(invoking);
            following = self.next_tokens(follow);
            expected.add_set(&following.subtract(&epsilon));
        }
        if following.contains(token::EPSILON) {
            expected.add_one(token::EOF);
        }
        expected
    }

    /// Follow state of the rule transition leaving an invocation site.
    pub fn rule_invocation_follow(&self, invoking_state: usize) -> usize {
        self.states[invoking_state]
            .transitions
            .iter()
            .find_map(|t| match t.label {
                TransitionKind::Rule { follow_state, .. } => Some(follow_state),
                _ => None,
            })
            .unwrap_or_else(|| panic!("state {} is not a rule invocation site", invoking_state))
    }
}

#[cfg(test)]
pub(crate) mod samples {
    //! Hand-built automata mirroring what the offline tool emits, shared by
    //! the simulator and facade tests.

    use super::*;
    use crate::atn::lexer_action::LexerAction;
    use std::sync::Arc;

    pub(crate) struct AtnBuilder {
        atn: Atn,
    }

    impl AtnBuilder {
        pub fn new(grammar_type: GrammarType, max_token_type: i32, rules: usize) -> AtnBuilder {
            AtnBuilder {
                atn: Atn {
                    grammar_type,
                    max_token_type,
                    states: Vec::new(),
                    decision_to_state: Vec::new(),
                    rule_to_start_state: vec![0; rules],
                    rule_to_stop_state: vec![0; rules],
                    rule_to_token_type: vec![0; rules],
                    rule_to_bypass_token_type: vec![0; rules],
                    mode_to_start_state: Vec::new(),
                    lexer_actions: Vec::new(),
                },
            }
        }

        pub fn atn_mut(&mut self) -> &mut Atn {
            &mut self.atn
        }

        pub fn state(&mut self, rule: usize, kind: AtnStateKind) -> usize {
            let number = self.atn.states.len();
            self.atn.states.push(AtnState {
                state_number: number,
                rule_index: rule,
                kind,
                transitions: Vec::new(),
            });
            number
        }

        pub fn rule(&mut self, rule: usize, left_recursive: bool) -> (usize, usize) {
            let start = self.state(
                rule,
                AtnStateKind::RuleStart {
                    stop_state: 0,
                    left_recursive,
                },
            );
            let stop = self.state(rule, AtnStateKind::RuleStop);
            if let AtnStateKind::RuleStart { stop_state, .. } = &mut self.atn.states[start].kind {
                *stop_state = stop;
            }
            self.atn.rule_to_start_state[rule] = start;
            self.atn.rule_to_stop_state[rule] = stop;
            (start, stop)
        }

        pub fn transition(&mut self, from: usize, to: usize, label: TransitionKind) {
            self.atn.states[from]
                .transitions
                .push(Transition { target: to, label });
        }

        pub fn epsilon(&mut self, from: usize, to: usize) {
            self.transition(
                from,
                to,
                TransitionKind::Epsilon {
                    outermost_precedence_return: None,
                },
            );
        }

        pub fn follow_link(&mut self, from: usize, to: usize, returning_from_rule: usize) {
            self.transition(
                from,
                to,
                TransitionKind::Epsilon {
                    outermost_precedence_return: Some(returning_from_rule),
                },
            );
        }

        pub fn atom(&mut self, from: usize, to: usize, label: i32) {
            self.transition(from, to, TransitionKind::Atom(label));
        }

        pub fn call(
            &mut self,
            from: usize,
            rule: usize,
            precedence: i32,
            follow_state: usize,
        ) {
            let target = self.atn.rule_to_start_state[rule];
            self.transition(
                from,
                target,
                TransitionKind::Rule {
                    rule_index: rule,
                    precedence,
                    follow_state,
                },
            );
        }

        pub fn decision(&mut self, state: usize) -> usize {
            let number = self.atn.decision_to_state.len();
            self.atn.decision_to_state.push(state);
            number
        }

        pub fn build(self) -> Arc<Atn> {
            Arc::new(self.atn)
        }
    }

    /// `s : A B | A C ;` with A=1, B=2, C=3.
    pub(crate) fn two_alts_shared_prefix() -> Arc<Atn> {
        let mut b = AtnBuilder::new(GrammarType::Parser, 3, 1);
        let (start, stop) = b.rule(0, false);
        let end = b.state(0, AtnStateKind::BlockEnd { start_state: 0 });
        let block = b.state(
            0,
            AtnStateKind::BlockStart {
                end_state: end,
                decision: 0,
                non_greedy: false,
            },
        );
        if let AtnStateKind::BlockEnd { start_state } = &mut b.atn.states[end].kind {
            *start_state = block;
        }
        b.decision(block);
        b.epsilon(start, block);
        let (a1, a2, a3) = (
            b.state(0, AtnStateKind::Basic),
            b.state(0, AtnStateKind::Basic),
            b.state(0, AtnStateKind::Basic),
        );
        b.epsilon(block, a1);
        b.atom(a1, a2, 1);
        b.atom(a2, a3, 2);
        b.epsilon(a3, end);
        let (c1, c2, c3) = (
            b.state(0, AtnStateKind::Basic),
            b.state(0, AtnStateKind::Basic),
            b.state(0, AtnStateKind::Basic),
        );
        b.epsilon(block, c1);
        b.atom(c1, c2, 1);
        b.atom(c2, c3, 3);
        b.epsilon(c3, end);
        b.epsilon(end, stop);
        b.build()
    }

    /// `s : ID EQ ID | ID LP ID RP ;` with ID=1, EQ=2, LP=3, RP=4.
    pub(crate) fn assign_or_call() -> Arc<Atn> {
        let mut b = AtnBuilder::new(GrammarType::Parser, 4, 1);
        let (start, stop) = b.rule(0, false);
        let end = b.state(0, AtnStateKind::BlockEnd { start_state: 0 });
        let block = b.state(
            0,
            AtnStateKind::BlockStart {
                end_state: end,
                decision: 0,
                non_greedy: false,
            },
        );
        if let AtnStateKind::BlockEnd { start_state } = &mut b.atn.states[end].kind {
            *start_state = block;
        }
        b.decision(block);
        b.epsilon(start, block);
        let assign = [
            b.state(0, AtnStateKind::Basic),
            b.state(0, AtnStateKind::Basic),
            b.state(0, AtnStateKind::Basic),
            b.state(0, AtnStateKind::Basic),
        ];
        b.epsilon(block, assign[0]);
        b.atom(assign[0], assign[1], 1);
        b.atom(assign[1], assign[2], 2);
        b.atom(assign[2], assign[3], 1);
        b.epsilon(assign[3], end);
        let call = [
            b.state(0, AtnStateKind::Basic),
            b.state(0, AtnStateKind::Basic),
            b.state(0, AtnStateKind::Basic),
            b.state(0, AtnStateKind::Basic),
            b.state(0, AtnStateKind::Basic),
        ];
        b.epsilon(block, call[0]);
        b.atom(call[0], call[1], 1);
        b.atom(call[1], call[2], 3);
        b.atom(call[2], call[3], 1);
        b.atom(call[3], call[4], 4);
        b.epsilon(call[4], end);
        b.epsilon(end, stop);
        b.build()
    }

    /// `s : A | A ;` with A=1, a genuinely ambiguous decision.
    pub(crate) fn twin_alts() -> Arc<Atn> {
        let mut b = AtnBuilder::new(GrammarType::Parser, 1, 1);
        let (start, stop) = b.rule(0, false);
        let end = b.state(0, AtnStateKind::BlockEnd { start_state: 0 });
        let block = b.state(
            0,
            AtnStateKind::BlockStart {
                end_state: end,
                decision: 0,
                non_greedy: false,
            },
        );
        if let AtnStateKind::BlockEnd { start_state } = &mut b.atn.states[end].kind {
            *start_state = block;
        }
        b.decision(block);
        b.epsilon(start, block);
        for _ in 0..2 {
            let s1 = b.state(0, AtnStateKind::Basic);
            let s2 = b.state(0, AtnStateKind::Basic);
            b.epsilon(block, s1);
            b.atom(s1, s2, 1);
            b.epsilon(s2, end);
        }
        b.epsilon(end, stop);
        b.build()
    }

    /// `e : e MUL e | e ADD e | INT ;` with MUL=1, ADD=2, INT=3, rewritten
    /// for precedence climbing the way the offline tool rewrites
    /// left-recursive rules.
    pub(crate) fn left_recursive_expr() -> Arc<Atn> {
        let mut b = AtnBuilder::new(GrammarType::Parser, 3, 1);
        let (start, stop) = b.rule(0, true);
        // primary: INT
        let p0 = b.state(0, AtnStateKind::Basic);
        let p1 = b.state(0, AtnStateKind::Basic);
        b.epsilon(start, p0);
        b.atom(p0, p1, 3);
        // operator loop
        let loop_back = b.state(0, AtnStateKind::StarLoopBack);
        let loop_entry = b.state(
            0,
            AtnStateKind::StarLoopEntry {
                loop_back,
                precedence_decision: true,
                decision: 0,
                non_greedy: false,
            },
        );
        b.decision(loop_entry);
        let block_end = b.state(0, AtnStateKind::BlockEnd { start_state: 0 });
        let block = b.state(
            0,
            AtnStateKind::StarBlockStart {
                end_state: block_end,
                decision: 1,
                non_greedy: false,
            },
        );
        if let AtnStateKind::BlockEnd { start_state } = &mut b.atn.states[block_end].kind {
            *start_state = block;
        }
        b.decision(block);
        let loop_end = b.state(0, AtnStateKind::LoopEnd { loop_back });
        b.epsilon(p1, loop_entry);
        b.epsilon(loop_entry, block);
        b.epsilon(loop_entry, loop_end);
        // alt 1: {precpred(3)}? MUL e[4]
        let m0 = b.state(0, AtnStateKind::Basic);
        let m1 = b.state(0, AtnStateKind::Basic);
        let m2 = b.state(0, AtnStateKind::Basic);
        let m3 = b.state(0, AtnStateKind::Basic);
        b.epsilon(block, m0);
        b.transition(m0, m1, TransitionKind::Precedence(3));
        b.atom(m1, m2, 1);
        b.call(m2, 0, 4, m3);
        b.epsilon(m3, block_end);
        // alt 2: {precpred(2)}? ADD e[3]
        let a0 = b.state(0, AtnStateKind::Basic);
        let a1 = b.state(0, AtnStateKind::Basic);
        let a2 = b.state(0, AtnStateKind::Basic);
        let a3 = b.state(0, AtnStateKind::Basic);
        b.epsilon(block, a0);
        b.transition(a0, a1, TransitionKind::Precedence(2));
        b.atom(a1, a2, 2);
        b.call(a2, 0, 3, a3);
        b.epsilon(a3, block_end);
        b.epsilon(block_end, loop_back);
        b.epsilon(loop_back, loop_entry);
        b.epsilon(loop_end, stop);
        // returning from e resumes after one of the recursive calls
        b.follow_link(stop, m3, 0);
        b.follow_link(stop, a3, 0);
        b.build()
    }

    /// Lexer `KW : 'if' ; ID : [a-z]+ ;` with KW=1, ID=2, one default mode.
    pub(crate) fn keyword_or_identifier_lexer() -> Arc<Atn> {
        let mut b = AtnBuilder::new(GrammarType::Lexer, 2, 2);
        let (kw_start, kw_stop) = b.rule(0, false);
        let (id_start, id_stop) = b.rule(1, false);
        b.atn.rule_to_token_type = vec![1, 2];
        // KW : 'i' 'f'
        let k1 = b.state(0, AtnStateKind::Basic);
        let k2 = b.state(0, AtnStateKind::Basic);
        b.epsilon(kw_start, k1);
        b.atom(k1, k2, 'i' as i32);
        let k3 = b.state(0, AtnStateKind::Basic);
        b.atom(k2, k3, 'f' as i32);
        b.epsilon(k3, kw_stop);
        // ID : [a-z]+
        let i1 = b.state(1, AtnStateKind::Basic);
        let i2 = b.state(1, AtnStateKind::Basic);
        b.epsilon(id_start, i1);
        b.transition(i1, i2, TransitionKind::Range('a' as i32, 'z' as i32));
        let loop_end = b.state(1, AtnStateKind::LoopEnd { loop_back: 0 });
        let plus_back = b.state(
            1,
            AtnStateKind::PlusLoopBack {
                decision: 0,
                non_greedy: false,
            },
        );
        if let AtnStateKind::LoopEnd { loop_back } = &mut b.atn.states[loop_end].kind {
            *loop_back = plus_back;
        }
        b.decision(plus_back);
        b.epsilon(i2, plus_back);
        b.epsilon(plus_back, i1);
        b.epsilon(plus_back, loop_end);
        b.epsilon(loop_end, id_stop);
        // default mode over both rules
        let mode = b.state(
            0,
            AtnStateKind::TokenStart {
                decision: 1,
                non_greedy: false,
            },
        );
        b.decision(mode);
        b.epsilon(mode, kw_start);
        b.epsilon(mode, id_start);
        b.atn.mode_to_start_state = vec![mode];
        b.build()
    }

    /// Lexer `A : 'a' ; WS : ' ' -> skip ;` exercising the action table.
    pub(crate) fn skip_whitespace_lexer() -> Arc<Atn> {
        let mut b = AtnBuilder::new(GrammarType::Lexer, 2, 2);
        let (a_start, a_stop) = b.rule(0, false);
        let (ws_start, ws_stop) = b.rule(1, false);
        b.atn.rule_to_token_type = vec![1, 2];
        b.atn.lexer_actions = vec![LexerAction::Skip];
        let a1 = b.state(0, AtnStateKind::Basic);
        let a2 = b.state(0, AtnStateKind::Basic);
        b.epsilon(a_start, a1);
        b.atom(a1, a2, 'a' as i32);
        b.epsilon(a2, a_stop);
        let w1 = b.state(1, AtnStateKind::Basic);
        let w2 = b.state(1, AtnStateKind::Basic);
        let w3 = b.state(1, AtnStateKind::Basic);
        b.epsilon(ws_start, w1);
        b.atom(w1, w2, ' ' as i32);
        b.transition(
            w2,
            w3,
            TransitionKind::Action {
                rule_index: 1,
                action_index: 0,
                is_ctx_dependent: false,
            },
        );
        b.epsilon(w3, ws_stop);
        let mode = b.state(
            0,
            AtnStateKind::TokenStart {
                decision: 0,
                non_greedy: false,
            },
        );
        b.decision(mode);
        b.epsilon(mode, a_start);
        b.epsilon(mode, ws_start);
        b.atn.mode_to_start_state = vec![mode];
        b.build()
    }
}
