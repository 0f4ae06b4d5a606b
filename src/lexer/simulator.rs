use crate::atn::config::AtnConfig;
use crate::atn::config_set::AtnConfigSet;
use crate::atn::lexer_action::LexerActionExecutor;
use crate::atn::transition::{Transition, TransitionKind};
use crate::atn::{Atn, Recognizer};
use crate::context::{empty_context, MergeCache, PredictionContext, EMPTY_RETURN_STATE};
use crate::dfa::{Dfa, DfaEdge, DfaState, DfaStateView};
use crate::error::RecognitionError;
use crate::stream::{CharStream, IntStream};
use crate::token;
use std::sync::Arc;
use tracing::trace;

/// Character range the per-mode DFAs cache edges for. Characters outside
/// it always take the ATN path; caching every Unicode scalar would blow
/// up the edge arrays for no hit-rate gain.
const MIN_DFA_EDGE: i32 = 0;
const MAX_DFA_EDGE: i32 = 127;

/// Outcome of one maximal-munch simulation run.
#[derive(Debug)]
pub struct LexerMatch {
    /// Token type announced by the winning rule, or [token::EOF].
    pub token_type: i32,
    /// Actions collected along the winning path, to be replayed by the
    /// lexer once the token is accepted.
    pub executor: Option<Arc<LexerActionExecutor>>,
}

/// Farthest accept seen so far during a simulation.
#[derive(Debug, Clone)]
struct SimState {
    index: usize,
    line: u32,
    column: u32,
    prediction: u32,
    executor: Option<Arc<LexerActionExecutor>>,
}

/// Builds the shared DFA array for a lexer automaton, one DFA per mode.
pub fn lexer_dfas(atn: &Atn) -> Vec<Dfa> {
    atn.mode_to_start_state
        .iter()
        .enumerate()
        .map(|(mode, &start)| Dfa::new(mode, start, false))
        .collect()
}

/// Maximal-munch recognition of one token by simulating the ATN, with a
/// per-mode DFA memoizing every (state, character) step already decided.
///
/// The simulator tracks line and column itself since it is the only
/// component that sees every consumed character; the lexer reads them
/// back when it builds tokens.
pub struct LexerAtnSimulator {
    pub atn: Arc<Atn>,
    dfas: Arc<Vec<Dfa>>,
    start_index: usize,
    pub line: u32,
    pub column: u32,
    prev_accept: Option<SimState>,
}

impl LexerAtnSimulator {
    pub fn new(atn: Arc<Atn>, dfas: Arc<Vec<Dfa>>) -> LexerAtnSimulator {
        LexerAtnSimulator {
            atn,
            dfas,
            start_index: 0,
            line: 1,
            column: 0,
            prev_accept: None,
        }
    }

    pub fn dfas(&self) -> &Arc<Vec<Dfa>> {
        &self.dfas
    }

    /// Recognizes the longest token starting at the current input
    /// position under `mode`. On success the input is left just past the
    /// accepted text; on failure it is restored to the start position.
    pub fn match_token(
        &mut self,
        input: &mut dyn CharStream,
        mode: usize,
        host: &mut dyn Recognizer,
    ) -> Result<LexerMatch, RecognitionError> {
        let marker = input.mark();
        let result = self.match_inner(input, mode, host);
        input.release(marker);
        if result.is_err() {
            input.seek(self.start_index);
        }
        result
    }

    fn match_inner(
        &mut self,
        input: &mut dyn CharStream,
        mode: usize,
        host: &mut dyn Recognizer,
    ) -> Result<LexerMatch, RecognitionError> {
        self.start_index = input.index();
        self.prev_accept = None;
        let dfas = self.dfas.clone();
        let dfa = &dfas[mode];
        match dfa.s0() {
            Some(s0) => self.exec_atn(input, dfa, s0, host),
            None => self.match_atn(input, dfa, mode, host),
        }
    }

    /// Cold start: build the mode's start configuration set, publish it as
    /// the DFA start state and run from there.
    fn match_atn(
        &mut self,
        input: &mut dyn CharStream,
        dfa: &Dfa,
        mode: usize,
        host: &mut dyn Recognizer,
    ) -> Result<LexerMatch, RecognitionError> {
        let start_state = self.atn.mode_to_start_state[mode];
        let mut merge_cache = MergeCache::new();
        let mut s0_closure = AtnConfigSet::new_ordered();
        let atn = self.atn.clone();
        for (i, t) in atn.states[start_state].transitions.iter().enumerate() {
            let config = self.derived(
                &AtnConfig::new(start_state, i as u32 + 1, empty_context()),
                t.target,
            );
            self.closure(
                input,
                config,
                &mut s0_closure,
                false,
                false,
                false,
                host,
                &mut merge_cache,
            );
        }
        // predicated paths must not be pinned as the mode's start state
        let suppress_start = s0_closure.has_semantic_context;
        s0_closure.has_semantic_context = false;
        let next = self.add_dfa_state(dfa, s0_closure);
        if !suppress_start {
            dfa.set_s0(next);
        }
        self.exec_atn(input, dfa, next, host)
    }

    fn exec_atn(
        &mut self,
        input: &mut dyn CharStream,
        dfa: &Dfa,
        s0: usize,
        host: &mut dyn Recognizer,
    ) -> Result<LexerMatch, RecognitionError> {
        let s0_view = dfa.view(s0);
        if s0_view.is_accept {
            // a zero-length match is still a match
            self.capture(input, &s0_view);
        }
        let mut s = s0;
        let mut t = input.la(1);
        loop {
            let cached = if (MIN_DFA_EDGE..=MAX_DFA_EDGE).contains(&t) {
                dfa.edge(s, t)
            } else {
                None
            };
            let target = match cached {
                Some(edge) => edge,
                None => self.compute_target_state(input, dfa, s, t, host),
            };
            let target = match target {
                DfaEdge::Error => break,
                DfaEdge::State(target) => target,
            };
            if t != token::EOF {
                self.consume(input);
            }
            let view = dfa.view(target);
            if view.is_accept {
                self.capture(input, &view);
                if t == token::EOF {
                    break;
                }
            }
            t = input.la(1);
            s = target;
        }
        self.fail_or_accept(input)
    }

    /// DFA miss: compute the reach of the current configuration set over
    /// `t`, publish it, and cache the edge.
    fn compute_target_state(
        &mut self,
        input: &mut dyn CharStream,
        dfa: &Dfa,
        s: usize,
        t: i32,
        host: &mut dyn Recognizer,
    ) -> DfaEdge {
        trace!(mode = dfa.decision, state = s, symbol = t, "lexer DFA miss");
        let closure_configs = dfa.view(s).configs;
        let mut reach = AtnConfigSet::new_ordered();
        self.reachable_config_set(input, &closure_configs, &mut reach, t, host);
        if reach.is_empty() {
            if !reach.has_semantic_context && (MIN_DFA_EDGE..=MAX_DFA_EDGE).contains(&t) {
                dfa.set_edge(s, t, DfaEdge::Error);
            }
            return DfaEdge::Error;
        }
        let suppress_edge = reach.has_semantic_context;
        reach.has_semantic_context = false;
        let target = self.add_dfa_state(dfa, reach);
        if !suppress_edge && (MIN_DFA_EDGE..=MAX_DFA_EDGE).contains(&t) {
            dfa.set_edge(s, t, DfaEdge::State(target));
        }
        DfaEdge::State(target)
    }

    /// Image of `closure` over the character `t`, epsilon-closed.
    fn reachable_config_set(
        &mut self,
        input: &mut dyn CharStream,
        closure: &AtnConfigSet,
        reach: &mut AtnConfigSet,
        t: i32,
        host: &mut dyn Recognizer,
    ) {
        let mut merge_cache = MergeCache::new();
        // remaining configs of an alt that already reached an accept via a
        // non-greedy path are lower priority and dropped
        let mut skip_alt = crate::atn::INVALID_ALT;
        let atn = self.atn.clone();
        let (min, max) = atn.symbol_universe();
        for config in closure.iter() {
            let current_alt_reached_accept = config.alt == skip_alt;
            if current_alt_reached_accept && config.passed_through_non_greedy {
                continue;
            }
            for transition in &atn.states[config.state].transitions {
                if !transition.matches(t, min, max) {
                    continue;
                }
                let executor = config
                    .lexer_executor
                    .as_ref()
                    .map(|e| e.fix_offset_before_match(input.index() - self.start_index));
                let moved = self.derived(&config.with_executor(config.state, executor), transition.target);
                if self.closure(
                    input,
                    moved,
                    reach,
                    current_alt_reached_accept,
                    true,
                    t == token::EOF,
                    host,
                    &mut merge_cache,
                ) {
                    skip_alt = config.alt;
                    break;
                }
            }
        }
    }

    /// Epsilon closure; returns true when the configuration's alternative
    /// reached an accept state.
    #[allow(clippy::too_many_arguments)]
    fn closure(
        &mut self,
        input: &mut dyn CharStream,
        config: AtnConfig,
        configs: &mut AtnConfigSet,
        mut current_alt_reached_accept: bool,
        speculative: bool,
        treat_eof_as_epsilon: bool,
        host: &mut dyn Recognizer,
        merge_cache: &mut MergeCache,
    ) -> bool {
        let atn = self.atn.clone();
        if atn.states[config.state].is_rule_stop() {
            if config.context.is_empty() {
                configs.add(config, merge_cache);
                return true;
            } else if config.context.has_empty_path() {
                configs.add(
                    config.with_context(config.state, empty_context()),
                    merge_cache,
                );
                current_alt_reached_accept = true;
            }
            for i in 0..config.context.len() {
                if config.context.return_state(i) == EMPTY_RETURN_STATE {
                    continue;
                }
                let return_state = config.context.return_state(i) as usize;
                let popped = self.derived(
                    &config.with_context(config.state, config.context.parent(i).clone()),
                    return_state,
                );
                current_alt_reached_accept = self.closure(
                    input,
                    popped,
                    configs,
                    current_alt_reached_accept,
                    speculative,
                    treat_eof_as_epsilon,
                    host,
                    merge_cache,
                );
            }
            return current_alt_reached_accept;
        }
        let state = &atn.states[config.state];
        if !state.only_epsilon_transitions()
            && (!current_alt_reached_accept || !config.passed_through_non_greedy)
        {
            configs.add(config.clone(), merge_cache);
        }
        for transition in &state.transitions {
            if let Some(next) = self.epsilon_target(
                input,
                &config,
                transition,
                configs,
                speculative,
                treat_eof_as_epsilon,
                host,
            ) {
                current_alt_reached_accept = self.closure(
                    input,
                    next,
                    configs,
                    current_alt_reached_accept,
                    speculative,
                    treat_eof_as_epsilon,
                    host,
                    merge_cache,
                );
            }
        }
        current_alt_reached_accept
    }

    #[allow(clippy::too_many_arguments)]
    fn epsilon_target(
        &mut self,
        input: &mut dyn CharStream,
        config: &AtnConfig,
        transition: &Transition,
        configs: &mut AtnConfigSet,
        speculative: bool,
        treat_eof_as_epsilon: bool,
        host: &mut dyn Recognizer,
    ) -> Option<AtnConfig> {
        match &transition.label {
            TransitionKind::Rule { follow_state, .. } => {
                let context =
                    PredictionContext::singleton(config.context.clone(), *follow_state as i32);
                Some(self.derived(&config.with_context(config.state, context), transition.target))
            }
            TransitionKind::Precedence(_) => {
                panic!("precedence predicates are not allowed in lexers")
            }
            TransitionKind::Predicate {
                rule_index,
                pred_index,
                ..
            } => {
                // predicates are evaluated mid-simulation, before the token
                // is known; the DFA never caches paths that crossed one
                configs.has_semantic_context = true;
                if self.evaluate_predicate(input, *rule_index, *pred_index, speculative, host) {
                    Some(self.derived(config, transition.target))
                } else {
                    None
                }
            }
            TransitionKind::Action { action_index, .. } => {
                if config.context.is_empty() || config.context.has_empty_path() {
                    let executor = LexerActionExecutor::append(
                        config.lexer_executor.as_ref(),
                        self.atn.lexer_actions[*action_index].clone(),
                    );
                    Some(self.derived(
                        &config.with_executor(config.state, Some(executor)),
                        transition.target,
                    ))
                } else {
                    // actions in referenced rules run only for the token
                    // that owns them, drop the action here
                    Some(self.derived(config, transition.target))
                }
            }
            TransitionKind::Epsilon { .. } => Some(self.derived(config, transition.target)),
            TransitionKind::Atom(_) | TransitionKind::Range(_, _) | TransitionKind::Set(_) => {
                if treat_eof_as_epsilon {
                    let (min, max) = self.atn.symbol_universe();
                    if transition.matches(token::EOF, min, max) {
                        return Some(self.derived(config, transition.target));
                    }
                }
                None
            }
            _ => None,
        }
    }

    /// Copies a configuration onto `target`, tracking non-greedy crossings.
    fn derived(&self, config: &AtnConfig, target: usize) -> AtnConfig {
        let mut next = config.moved_to(target);
        next.passed_through_non_greedy =
            config.passed_through_non_greedy || self.atn.states[target].non_greedy();
        next
    }

    fn evaluate_predicate(
        &mut self,
        input: &mut dyn CharStream,
        rule_index: usize,
        pred_index: usize,
        speculative: bool,
        host: &mut dyn Recognizer,
    ) -> bool {
        if !speculative {
            return host.sempred(rule_index, pred_index);
        }
        let saved_column = self.column;
        let saved_line = self.line;
        let index = input.index();
        let marker = input.mark();
        if input.la(1) != token::EOF {
            self.consume(input);
        }
        let result = host.sempred(rule_index, pred_index);
        self.column = saved_column;
        self.line = saved_line;
        input.seek(index);
        input.release(marker);
        result
    }

    /// Publishes a reach set as a DFA state, marking it accepting when
    /// some configuration stopped at a rule end. The first such
    /// configuration wins, which resolves rule ties toward the rule
    /// declared first.
    fn add_dfa_state(&self, dfa: &Dfa, mut configs: AtnConfigSet) -> usize {
        debug_assert!(!configs.has_semantic_context);
        let accept = configs
            .iter()
            .find(|c| self.atn.states[c.state].is_rule_stop())
            .cloned();
        configs.freeze();
        let mut state = DfaState::new(Arc::new(configs));
        if let Some(config) = accept {
            state.is_accept = true;
            state.lexer_executor = config.lexer_executor.clone();
            let rule = self.atn.states[config.state].rule_index;
            state.prediction = self.atn.rule_to_token_type[rule].max(0) as u32;
        }
        dfa.add_state(state)
    }

    fn capture(&mut self, input: &mut dyn CharStream, view: &DfaStateView) {
        self.prev_accept = Some(SimState {
            index: input.index(),
            line: self.line,
            column: self.column,
            prediction: view.prediction,
            executor: view.lexer_executor.clone(),
        });
    }

    fn fail_or_accept(
        &mut self,
        input: &mut dyn CharStream,
    ) -> Result<LexerMatch, RecognitionError> {
        if let Some(accept) = self.prev_accept.take() {
            input.seek(accept.index);
            self.line = accept.line;
            self.column = accept.column;
            return Ok(LexerMatch {
                token_type: accept.prediction as i32,
                executor: accept.executor,
            });
        }
        if input.la(1) == token::EOF && input.index() == self.start_index {
            return Ok(LexerMatch {
                token_type: token::EOF,
                executor: None,
            });
        }
        Err(RecognitionError::LexerNoViableAlt {
            start_index: self.start_index,
            line: self.line,
            column: self.column,
            text: input.text(self.start_index, input.index()),
        })
    }

    /// Advances one character, maintaining the line/column bookkeeping.
    pub fn consume(&mut self, input: &mut dyn CharStream) {
        if input.la(1) == '\n' as i32 {
            self.line += 1;
            self.column = 0;
        } else {
            self.column += 1;
        }
        input.consume();
    }

    /// Forgets all per-token state, for a lexer reset.
    pub fn reset(&mut self) {
        self.start_index = 0;
        self.line = 1;
        self.column = 0;
        self.prev_accept = None;
    }
}

#[cfg(test)]
mod tests {
    use super::{lexer_dfas, LexerAtnSimulator};
    use crate::atn::samples;
    use crate::atn::Recognizer;
    use crate::stream::{InputStream, IntStream};
    use crate::token;
    use std::sync::Arc;

    struct NoPredicates;
    impl Recognizer for NoPredicates {}

    fn simulator(atn: Arc<crate::atn::Atn>) -> LexerAtnSimulator {
        let dfas = Arc::new(lexer_dfas(&atn));
        LexerAtnSimulator::new(atn, dfas)
    }

    #[test]
    fn keyword_beats_identifier_on_rule_order() {
        let atn = samples::keyword_or_identifier_lexer();
        let mut sim = simulator(atn);
        let mut input = InputStream::from_string("if", "t");
        let matched = sim.match_token(&mut input, 0, &mut NoPredicates).unwrap();
        assert_eq!(matched.token_type, 1, "KW wins the tie over ID");
        assert_eq!(input.index(), 2);
    }

    #[test]
    fn maximal_munch_prefers_longer_identifier() {
        let atn = samples::keyword_or_identifier_lexer();
        let mut sim = simulator(atn);
        let mut input = InputStream::from_string("iffy", "t");
        let matched = sim.match_token(&mut input, 0, &mut NoPredicates).unwrap();
        assert_eq!(matched.token_type, 2, "longer match outranks keyword");
        assert_eq!(input.index(), 4);
    }

    #[test]
    fn rolls_back_to_best_accept() {
        let atn = samples::keyword_or_identifier_lexer();
        let mut sim = simulator(atn);
        let mut input = InputStream::from_string("ab9", "t");
        let matched = sim.match_token(&mut input, 0, &mut NoPredicates).unwrap();
        assert_eq!(matched.token_type, 2);
        // '9' stopped the simulation but was not consumed
        assert_eq!(input.index(), 2);
        assert_eq!(input.la(1), '9' as i32);
    }

    #[test]
    fn no_viable_char_reports_position() {
        let atn = samples::keyword_or_identifier_lexer();
        let mut sim = simulator(atn);
        let mut input = InputStream::from_string("9", "t");
        let err = sim.match_token(&mut input, 0, &mut NoPredicates).unwrap_err();
        match err {
            crate::error::RecognitionError::LexerNoViableAlt { start_index, .. } => {
                assert_eq!(start_index, 0);
            }
            other => panic!("unexpected error {:?}", other),
        }
        // input restored for the caller's recovery
        assert_eq!(input.index(), 0);
    }

    #[test]
    fn eof_at_start_matches_eof() {
        let atn = samples::keyword_or_identifier_lexer();
        let mut sim = simulator(atn);
        let mut input = InputStream::from_string("", "t");
        let matched = sim.match_token(&mut input, 0, &mut NoPredicates).unwrap();
        assert_eq!(matched.token_type, token::EOF);
    }

    #[test]
    fn warm_dfa_agrees_with_cold_run() {
        let atn = samples::keyword_or_identifier_lexer();
        let dfas = Arc::new(lexer_dfas(&atn));
        let mut cold = LexerAtnSimulator::new(atn.clone(), dfas.clone());
        let mut input = InputStream::from_string("step", "t");
        let first = cold.match_token(&mut input, 0, &mut NoPredicates).unwrap();
        let states_after_cold = dfas[0].num_states();
        // same text again, now served from the DFA
        let mut warm = LexerAtnSimulator::new(atn, dfas.clone());
        let mut input = InputStream::from_string("step", "t");
        let second = warm.match_token(&mut input, 0, &mut NoPredicates).unwrap();
        assert_eq!(first.token_type, second.token_type);
        assert_eq!(dfas[0].num_states(), states_after_cold);
    }

    #[test]
    fn tracks_line_and_column() {
        let atn = samples::keyword_or_identifier_lexer();
        let mut sim = simulator(atn);
        let mut input = InputStream::from_string("ab", "t");
        sim.match_token(&mut input, 0, &mut NoPredicates).unwrap();
        assert_eq!(sim.line, 1);
        assert_eq!(sim.column, 2);
    }

    #[test]
    fn action_transition_collects_executor() {
        let atn = samples::skip_whitespace_lexer();
        let mut sim = simulator(atn);
        let mut input = InputStream::from_string(" ", "t");
        let matched = sim.match_token(&mut input, 0, &mut NoPredicates).unwrap();
        assert_eq!(matched.token_type, 2);
        assert!(matched.executor.is_some());
    }
}
