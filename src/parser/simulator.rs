use super::prediction_mode::{self, PredictionMode};
use crate::atn::config::AtnConfig;
use crate::atn::config_set::AtnConfigSet;
use crate::atn::semantic_context::SemanticContext;
use crate::atn::transition::{Transition, TransitionKind};
use crate::atn::{Atn, AtnStateKind, Recognizer, INVALID_ALT};
use crate::context::{
    empty_context, MergeCache, PredictionContext, PredictionContextCache, EMPTY_RETURN_STATE,
};
use crate::dfa::{Dfa, DfaEdge, DfaState, DfaStateView, PredPrediction};
use crate::error::RecognitionError;
use crate::fxhashset;
use crate::stream::TokenStream;
use crate::support::BitSet;
use crate::token;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;
use tracing::{debug, trace};

/// What the prediction engine needs from the parser driving it: predicate
/// evaluation, the live precedence level, and somewhere to report
/// ambiguity and context-sensitivity events.
pub trait PredictionHost: Recognizer {
    /// Precedence of the rule invocation being parsed, -1 outside any
    /// precedence rule.
    fn precedence(&self) -> i32 {
        -1
    }

    fn report_ambiguity(
        &mut self,
        _decision: usize,
        _start_index: usize,
        _stop_index: usize,
        _exact: bool,
        _ambig_alts: &BitSet,
        _configs: &AtnConfigSet,
    ) {
    }

    fn report_attempting_full_context(
        &mut self,
        _decision: usize,
        _start_index: usize,
        _stop_index: usize,
        _conflicting_alts: &BitSet,
        _configs: &AtnConfigSet,
    ) {
    }

    fn report_context_sensitivity(
        &mut self,
        _decision: usize,
        _start_index: usize,
        _stop_index: usize,
        _prediction: u32,
        _configs: &AtnConfigSet,
    ) {
    }
}

/// Bridges a [PredictionHost] to the plain [Recognizer] surface the
/// semantic-context formulas evaluate against.
struct AsRecognizer<'a>(&'a mut dyn PredictionHost);

impl Recognizer for AsRecognizer<'_> {
    fn sempred(&mut self, rule_index: usize, pred_index: usize) -> bool {
        self.0.sempred(rule_index, pred_index)
    }

    fn precpred(&mut self, precedence: i32) -> bool {
        self.0.precpred(precedence)
    }
}

/// Builds the shared DFA array for a parser automaton, one per decision.
pub fn parser_dfas(atn: &Atn) -> Vec<Dfa> {
    atn.decision_to_state
        .iter()
        .enumerate()
        .map(|(decision, &state)| {
            let precedence = matches!(
                atn.states[state].kind,
                AtnStateKind::StarLoopEntry {
                    precedence_decision: true,
                    ..
                }
            );
            Dfa::new(decision, state, precedence)
        })
        .collect()
}

/// The adaptive prediction engine.
///
/// [ParserAtnSimulator::adaptive_predict] answers "which alternative of
/// decision `d` matches the upcoming input". It first simulates with
/// context-free stacks (SLL), memoizing every step in the decision's DFA;
/// only when that simulation provably conflicts does it rebuild the start
/// state from the real parser stack and re-simulate (full LL), which can
/// tell true ambiguity apart from mere context sensitivity. Ties always
/// break to the lowest alternative number, that ordering is part of the
/// public contract.
///
/// The simulator is stateless between calls; everything mutable lives in
/// the shared, monotonic DFA caches, so one simulator (or many, sharing
/// the caches) can serve many parses.
pub struct ParserAtnSimulator {
    pub atn: Arc<Atn>,
    dfas: Arc<Vec<Dfa>>,
    context_cache: Arc<PredictionContextCache>,
    pub mode: PredictionMode,
}

impl ParserAtnSimulator {
    pub fn new(
        atn: Arc<Atn>,
        dfas: Arc<Vec<Dfa>>,
        context_cache: Arc<PredictionContextCache>,
    ) -> ParserAtnSimulator {
        ParserAtnSimulator {
            atn,
            dfas,
            context_cache,
            mode: PredictionMode::Ll,
        }
    }

    pub fn dfas(&self) -> &Arc<Vec<Dfa>> {
        &self.dfas
    }

    /// Predicts the 1-based alternative of `decision` against the current
    /// input position. `outer_context` is the parser's call stack rendered
    /// as a prediction context; it seeds full-context retries and is the
    /// context predicates are judged in. The input is restored to its
    /// entry position no matter how prediction exits.
    pub fn adaptive_predict(
        &self,
        input: &mut dyn TokenStream,
        decision: usize,
        outer_context: &Arc<PredictionContext>,
        host: &mut dyn PredictionHost,
    ) -> Result<u32, RecognitionError> {
        use crate::stream::IntStream;
        let marker = input.mark();
        let start_index = input.index();
        trace!(decision, start_index, "adaptive predict");
        let mut run = Run {
            sim: self,
            dfa: &self.dfas[decision],
            outer_context,
            start_index,
            merge_cache: MergeCache::new(),
        };
        let result = run.predict(input, host);
        input.seek(start_index);
        input.release(marker);
        result
    }
}

/// One prediction in flight: pins the decision's DFA, the outer context
/// and the entry input position, and owns the per-call merge cache.
struct Run<'a> {
    sim: &'a ParserAtnSimulator,
    dfa: &'a Dfa,
    outer_context: &'a Arc<PredictionContext>,
    start_index: usize,
    merge_cache: MergeCache,
}

impl Run<'_> {
    fn predict(
        &mut self,
        input: &mut dyn TokenStream,
        host: &mut dyn PredictionHost,
    ) -> Result<u32, RecognitionError> {
        let s0 = if self.dfa.is_precedence_dfa() {
            match self.dfa.precedence_s0(host.precedence()) {
                Some(s0) => s0,
                None => {
                    // the start set depends on the current precedence, one
                    // start state is cached per level
                    let s0_closure = self.compute_start_state(input, false, host);
                    let filtered = self.apply_precedence_filter(&s0_closure, host);
                    let s0 = self.add_dfa_state(filtered, false, INVALID_ALT, false, None);
                    self.dfa.set_precedence_s0(host.precedence(), s0);
                    s0
                }
            }
        } else {
            match self.dfa.s0() {
                Some(s0) => s0,
                None => {
                    let s0_closure = self.compute_start_state(input, false, host);
                    let s0 = self.add_dfa_state(s0_closure, false, INVALID_ALT, false, None);
                    self.dfa.set_s0(s0);
                    s0
                }
            }
        };
        self.exec_atn(input, s0, host)
    }

    /// The SLL loop: follow cached DFA edges, computing and installing
    /// missing ones from the ATN, until an accept or dead end.
    fn exec_atn(
        &mut self,
        input: &mut dyn TokenStream,
        s0: usize,
        host: &mut dyn PredictionHost,
    ) -> Result<u32, RecognitionError> {
        use crate::stream::IntStream;
        let mut previous = s0;
        let mut t = input.la(1);
        loop {
            let edge = match self.dfa.edge(previous, t) {
                Some(edge) => edge,
                None => self.compute_target_state(input, previous, t, host),
            };
            let d = match edge {
                DfaEdge::Error => {
                    let configs = self.dfa.view(previous).configs;
                    input.seek(self.start_index);
                    let alt = self.syn_valid_or_sem_invalid_alt(input, host, &configs);
                    if alt != INVALID_ALT {
                        return Ok(alt);
                    }
                    return Err(self.no_viable_alt(input));
                }
                DfaEdge::State(d) => d,
            };
            let view = self.dfa.view(d);
            if view.requires_full_context && self.sim.mode != PredictionMode::Sll {
                return self.full_context_fallback(input, host, &view);
            }
            if view.is_accept {
                return self.accept(input, host, &view);
            }
            previous = d;
            if t != token::EOF {
                input.consume();
                t = input.la(1);
            }
        }
    }

    /// Accept in the SLL DFA, possibly gated on predicates.
    fn accept(
        &mut self,
        input: &mut dyn TokenStream,
        host: &mut dyn PredictionHost,
        view: &DfaStateView,
    ) -> Result<u32, RecognitionError> {
        use crate::stream::IntStream;
        let Some(predicates) = view.predicates.clone() else {
            return Ok(view.prediction);
        };
        let stop_index = input.index();
        input.seek(self.start_index);
        let alts = self.eval_predicate_pairs(host, &predicates, true);
        match alts.cardinality() {
            0 => Err(self.no_viable_alt(input)),
            1 => Ok(alts.min().map(|a| a as u32).unwrap_or(INVALID_ALT)),
            _ => {
                // more than one predicate fired: report and take the first
                host.report_ambiguity(
                    self.dfa.decision,
                    self.start_index,
                    stop_index,
                    false,
                    &alts,
                    &view.configs,
                );
                Ok(alts.min().map(|a| a as u32).unwrap_or(INVALID_ALT))
            }
        }
    }

    /// SLL found a genuine conflict: retry with the real parser stack.
    fn full_context_fallback(
        &mut self,
        input: &mut dyn TokenStream,
        host: &mut dyn PredictionHost,
        view: &DfaStateView,
    ) -> Result<u32, RecognitionError> {
        use crate::stream::IntStream;
        let conflicting = self.conflicting_or_unique_alts(&view.configs);
        if let Some(predicates) = view.predicates.clone() {
            // predicated conflicts can resolve without the stack
            let conflict_index = input.index();
            if conflict_index != self.start_index {
                input.seek(self.start_index);
            }
            let alts = self.eval_predicate_pairs(host, &predicates, true);
            if alts.cardinality() == 1 {
                return Ok(alts.min().map(|a| a as u32).unwrap_or(INVALID_ALT));
            }
            if conflict_index != self.start_index {
                input.seek(conflict_index);
            }
        }
        debug!(
            decision = self.dfa.decision,
            start_index = self.start_index,
            "conflict with local context, retrying with the full stack"
        );
        host.report_attempting_full_context(
            self.dfa.decision,
            self.start_index,
            input.index(),
            &conflicting,
            &view.configs,
        );
        let s0 = self.compute_start_state(input, true, host);
        self.exec_atn_full_context(input, host, s0)
    }

    /// The full-context loop. Accept states found here never land in the
    /// SLL DFA; the decision is resolved for this one invocation.
    fn exec_atn_full_context(
        &mut self,
        input: &mut dyn TokenStream,
        host: &mut dyn PredictionHost,
        s0: AtnConfigSet,
    ) -> Result<u32, RecognitionError> {
        use crate::stream::IntStream;
        let mut previous = s0;
        input.seek(self.start_index);
        let mut t = input.la(1);
        loop {
            let Some(mut reach) = self.compute_reach_set(input, host, &previous, t, true) else {
                input.seek(self.start_index);
                let alt = self.syn_valid_or_sem_invalid_alt(input, host, &previous);
                if alt != INVALID_ALT {
                    return Ok(alt);
                }
                return Err(self.no_viable_alt(input));
            };
            let alt_sub_sets = prediction_mode::conflicting_alt_subsets(&reach);
            reach.unique_alt = reach.unique_alt_of_configs();
            if reach.unique_alt != INVALID_ALT {
                // unique full-context answer after an SLL conflict: the
                // decision was context sensitive, not ambiguous
                let predicted = reach.unique_alt;
                debug!(
                    decision = self.dfa.decision,
                    predicted, "context sensitivity"
                );
                host.report_context_sensitivity(
                    self.dfa.decision,
                    self.start_index,
                    input.index(),
                    predicted,
                    &reach,
                );
                return Ok(predicted);
            }
            if self.sim.mode != PredictionMode::LlExactAmbigDetection {
                let predicted = prediction_mode::resolves_to_just_one_viable_alt(&alt_sub_sets);
                if predicted != INVALID_ALT {
                    host.report_ambiguity(
                        self.dfa.decision,
                        self.start_index,
                        input.index(),
                        false,
                        &reach.alts(),
                        &reach,
                    );
                    return Ok(predicted);
                }
            } else if prediction_mode::all_subsets_conflict(&alt_sub_sets)
                && prediction_mode::all_subsets_equal(&alt_sub_sets)
            {
                let alts = prediction_mode::union_alts(&alt_sub_sets);
                let predicted = alts.min().map(|a| a as u32).unwrap_or(INVALID_ALT);
                debug!(decision = self.dfa.decision, %alts, "exact ambiguity");
                host.report_ambiguity(
                    self.dfa.decision,
                    self.start_index,
                    input.index(),
                    true,
                    &alts,
                    &reach,
                );
                return Ok(predicted);
            }
            previous = reach;
            if t != token::EOF {
                input.consume();
                t = input.la(1);
            }
        }
    }

    /// DFA miss in the SLL loop: compute the reach, classify it, publish
    /// the new DFA state and the edge to it.
    fn compute_target_state(
        &mut self,
        input: &mut dyn TokenStream,
        previous: usize,
        t: i32,
        host: &mut dyn PredictionHost,
    ) -> DfaEdge {
        let closure_configs = self.dfa.view(previous).configs;
        let Some(mut reach) = self.compute_reach_set(input, host, &closure_configs, t, false)
        else {
            self.dfa.set_edge(previous, t, DfaEdge::Error);
            return DfaEdge::Error;
        };
        let predicted = reach.unique_alt_of_configs();
        reach.unique_alt = predicted;
        let mut is_accept = false;
        let mut prediction = INVALID_ALT;
        let mut requires_full_context = false;
        if predicted != INVALID_ALT {
            is_accept = true;
            prediction = predicted;
        } else if prediction_mode::has_sll_conflict_terminating_prediction(
            self.sim.mode,
            &reach,
            &self.sim.atn,
        ) {
            let conflicting =
                prediction_mode::union_alts(&prediction_mode::conflicting_alt_subsets(&reach));
            requires_full_context = true;
            is_accept = true;
            prediction = conflicting.min().map(|a| a as u32).unwrap_or(INVALID_ALT);
            reach.conflicting_alts = Some(conflicting);
        }
        let mut predicates = None;
        if is_accept && reach.has_semantic_context {
            let decision_state = self.sim.atn.decision_to_state[self.dfa.decision];
            let nalts = self.sim.atn.states[decision_state].transitions.len();
            let ambig_alts = self.conflicting_or_unique_alts(&reach);
            if let Some(alt_to_pred) = self.preds_for_ambig_alts(&ambig_alts, &reach, nalts) {
                predicates = Some(self.predicate_predictions(&ambig_alts, alt_to_pred));
                prediction = INVALID_ALT;
            } else {
                prediction = ambig_alts.min().map(|a| a as u32).unwrap_or(INVALID_ALT);
            }
        }
        let d = self.add_dfa_state(reach, is_accept, prediction, requires_full_context, predicates);
        self.dfa.set_edge(previous, t, DfaEdge::State(d));
        DfaEdge::State(d)
    }

    /// Image of `closure` under the symbol `t`, epsilon-closed.
    fn compute_reach_set(
        &mut self,
        input: &mut dyn TokenStream,
        host: &mut dyn PredictionHost,
        closure: &AtnConfigSet,
        t: i32,
        full_ctx: bool,
    ) -> Option<AtnConfigSet> {
        let atn = self.sim.atn.clone();
        let (min, max) = atn.symbol_universe();
        let mut intermediate = AtnConfigSet::new(full_ctx);
        // configs already at a rule end cannot match more input; they only
        // survive when the decision may legally end here
        let mut skipped_stop_states = Vec::new();
        for config in closure.iter() {
            if atn.states[config.state].is_rule_stop() {
                if full_ctx || t == token::EOF {
                    skipped_stop_states.push(config.clone());
                }
                continue;
            }
            for transition in &atn.states[config.state].transitions {
                if transition.matches(t, min, max) {
                    intermediate.add(config.moved_to(transition.target), &mut self.merge_cache);
                }
            }
        }
        // when the moved set is already unambiguous the closure cannot
        // change the outcome, skip it
        let shortcut = skipped_stop_states.is_empty()
            && t != token::EOF
            && (intermediate.len() == 1 || intermediate.unique_alt_of_configs() != INVALID_ALT);
        let mut reach = if shortcut {
            intermediate
        } else {
            let mut closed = AtnConfigSet::new(full_ctx);
            let mut busy = fxhashset![];
            let treat_eof_as_epsilon = t == token::EOF;
            let moved = intermediate.iter().cloned().collect::<Vec<_>>();
            for config in moved {
                self.closure(
                    input,
                    host,
                    config,
                    &mut closed,
                    &mut busy,
                    false,
                    full_ctx,
                    0,
                    treat_eof_as_epsilon,
                );
            }
            closed
        };
        if t == token::EOF {
            // only paths that can end the decision survive at EOF
            reach = self.keep_rule_stop_configs(reach, shortcut);
        }
        if !skipped_stop_states.is_empty()
            && (!full_ctx || !prediction_mode::has_config_in_rule_stop_state(&reach, &atn))
        {
            for config in skipped_stop_states {
                reach.add(config, &mut self.merge_cache);
            }
        }
        if reach.is_empty() {
            None
        } else {
            Some(reach)
        }
    }

    /// Restricts a reach set to configurations at rule stops. With
    /// `look_to_end` set, configurations that can still reach the rule end
    /// over epsilon edges count too.
    fn keep_rule_stop_configs(&mut self, configs: AtnConfigSet, look_to_end: bool) -> AtnConfigSet {
        let atn = self.sim.atn.clone();
        if prediction_mode::all_configs_in_rule_stop_states(&configs, &atn) {
            return configs;
        }
        let mut result = AtnConfigSet::new(configs.full_ctx);
        for config in configs.iter() {
            if atn.states[config.state].is_rule_stop() {
                result.add(config.clone(), &mut self.merge_cache);
                continue;
            }
            if look_to_end && atn.states[config.state].only_epsilon_transitions() {
                let next = atn.next_tokens(config.state);
                if next.contains(token::EPSILON) {
                    let stop = atn.rule_to_stop_state[atn.states[config.state].rule_index];
                    result.add(config.moved_to(stop), &mut self.merge_cache);
                }
            }
        }
        result
    }

    /// Start configurations of the decision: closure over every
    /// alternative's first state, with predicates collected.
    fn compute_start_state(
        &mut self,
        input: &mut dyn TokenStream,
        full_ctx: bool,
        host: &mut dyn PredictionHost,
    ) -> AtnConfigSet {
        let context = if full_ctx {
            self.outer_context.clone()
        } else {
            empty_context()
        };
        let atn = self.sim.atn.clone();
        let mut configs = AtnConfigSet::new(full_ctx);
        for (i, transition) in atn.states[self.dfa.atn_start_state]
            .transitions
            .iter()
            .enumerate()
        {
            let config = AtnConfig::new(transition.target, i as u32 + 1, context.clone());
            let mut busy = fxhashset![];
            self.closure(
                input, host, config, &mut configs, &mut busy, true, full_ctx, 0, false,
            );
        }
        configs
    }

    /// Drops configurations of a precedence decision that re-enter the
    /// rule below the current precedence, plus the alternative-1 ghosts
    /// that suppressed paths already cover.
    fn apply_precedence_filter(
        &mut self,
        configs: &AtnConfigSet,
        host: &mut dyn PredictionHost,
    ) -> AtnConfigSet {
        let mut states_from_alt1: FxHashMap<usize, Arc<PredictionContext>> = FxHashMap::default();
        let mut result = AtnConfigSet::new(configs.full_ctx);
        for config in configs.iter() {
            if config.alt != 1 {
                continue;
            }
            let Some(updated) = config
                .semantic_context
                .eval_precedence(&mut AsRecognizer(host))
            else {
                // precedence predicate failed, the path is dead here
                continue;
            };
            states_from_alt1.insert(config.state, config.context.clone());
            let mut kept = config.clone();
            if updated != *config.semantic_context {
                kept.semantic_context = Arc::new(updated);
            }
            result.add(kept, &mut self.merge_cache);
        }
        for config in configs.iter() {
            if config.alt == 1 {
                continue;
            }
            if !config.precedence_filter_suppressed {
                if let Some(context) = states_from_alt1.get(&config.state) {
                    if **context == *config.context {
                        // covered by the alternative-1 path
                        continue;
                    }
                }
            }
            result.add(config.clone(), &mut self.merge_cache);
        }
        result
    }

    /// Epsilon closure with rule-stop handling, predicate collection and
    /// outer-context bookkeeping.
    #[allow(clippy::too_many_arguments)]
    fn closure(
        &mut self,
        input: &mut dyn TokenStream,
        host: &mut dyn PredictionHost,
        config: AtnConfig,
        configs: &mut AtnConfigSet,
        busy: &mut FxHashSet<AtnConfig>,
        collect_predicates: bool,
        full_ctx: bool,
        depth: i32,
        treat_eof_as_epsilon: bool,
    ) {
        let atn = self.sim.atn.clone();
        if atn.states[config.state].is_rule_stop() {
            if !config.context.is_empty() {
                for i in 0..config.context.len() {
                    if config.context.return_state(i) == EMPTY_RETURN_STATE {
                        if full_ctx {
                            // reached the end of the start rule itself
                            configs.add(
                                config.with_context(config.state, empty_context()),
                                &mut self.merge_cache,
                            );
                            continue;
                        }
                        // stack exhausted locally: anything may follow,
                        // chase the global follow links
                        self.closure_work(
                            input,
                            host,
                            config.with_context(config.state, empty_context()),
                            configs,
                            busy,
                            collect_predicates,
                            full_ctx,
                            depth,
                            treat_eof_as_epsilon,
                        );
                        continue;
                    }
                    let return_state = config.context.return_state(i) as usize;
                    let popped =
                        config.with_context(return_state, config.context.parent(i).clone());
                    self.closure(
                        input,
                        host,
                        popped,
                        configs,
                        busy,
                        collect_predicates,
                        full_ctx,
                        depth - 1,
                        treat_eof_as_epsilon,
                    );
                }
                return;
            }
            if full_ctx {
                // empty stack in full-context mode is a real end
                configs.add(config, &mut self.merge_cache);
                return;
            }
            // SLL with an empty stack falls through to the follow links
        }
        self.closure_work(
            input,
            host,
            config,
            configs,
            busy,
            collect_predicates,
            full_ctx,
            depth,
            treat_eof_as_epsilon,
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn closure_work(
        &mut self,
        input: &mut dyn TokenStream,
        host: &mut dyn PredictionHost,
        config: AtnConfig,
        configs: &mut AtnConfigSet,
        busy: &mut FxHashSet<AtnConfig>,
        collect_predicates: bool,
        full_ctx: bool,
        depth: i32,
        treat_eof_as_epsilon: bool,
    ) {
        let atn = self.sim.atn.clone();
        let state = &atn.states[config.state];
        if !state.only_epsilon_transitions() {
            configs.add(config.clone(), &mut self.merge_cache);
        }
        for transition in &state.transitions {
            let continue_collecting =
                collect_predicates && !matches!(transition.label, TransitionKind::Action { .. });
            let target = self.epsilon_target(
                input,
                host,
                &config,
                transition,
                continue_collecting,
                depth == 0,
                full_ctx,
                treat_eof_as_epsilon,
            );
            let Some(mut next) = target else { continue };
            let mut new_depth = depth;
            if state.is_rule_stop() {
                // the closure fell off the end of the decision rule into
                // an unknown caller
                if self.dfa.is_precedence_dfa() {
                    if let TransitionKind::Epsilon {
                        outermost_precedence_return: Some(rule),
                    } = transition.label
                    {
                        if rule == atn.states[self.dfa.atn_start_state].rule_index {
                            next.precedence_filter_suppressed = true;
                        }
                    }
                }
                next.reaches_into_outer_context += 1;
                if !busy.insert(next.clone()) {
                    continue;
                }
                configs.dips_into_outer_context = true;
                new_depth -= 1;
            } else {
                if !transition.is_epsilon() && !busy.insert(next.clone()) {
                    continue;
                }
                if matches!(transition.label, TransitionKind::Rule { .. }) && new_depth >= 0 {
                    new_depth += 1;
                }
            }
            self.closure(
                input,
                host,
                next,
                configs,
                busy,
                continue_collecting,
                full_ctx,
                new_depth,
                treat_eof_as_epsilon,
            );
        }
    }

    /// Crosses one epsilon-class transition, or None when it is gated off.
    #[allow(clippy::too_many_arguments)]
    fn epsilon_target(
        &mut self,
        input: &mut dyn TokenStream,
        host: &mut dyn PredictionHost,
        config: &AtnConfig,
        transition: &Transition,
        collect_predicates: bool,
        in_context: bool,
        full_ctx: bool,
        treat_eof_as_epsilon: bool,
    ) -> Option<AtnConfig> {
        match &transition.label {
            TransitionKind::Rule { follow_state, .. } => {
                let context =
                    PredictionContext::singleton(config.context.clone(), *follow_state as i32);
                Some(config.with_context(transition.target, context))
            }
            TransitionKind::Precedence(precedence) => self.predicate_target(
                input,
                host,
                config,
                transition.target,
                SemanticContext::PrecedencePredicate {
                    precedence: *precedence,
                },
                collect_predicates && in_context,
                full_ctx,
            ),
            TransitionKind::Predicate {
                rule_index,
                pred_index,
                is_ctx_dependent,
            } => self.predicate_target(
                input,
                host,
                config,
                transition.target,
                SemanticContext::Predicate {
                    rule_index: *rule_index,
                    pred_index: *pred_index,
                    is_ctx_dependent: *is_ctx_dependent,
                },
                collect_predicates && (!*is_ctx_dependent || in_context),
                full_ctx,
            ),
            TransitionKind::Action { .. } => Some(config.moved_to(transition.target)),
            TransitionKind::Epsilon { .. } => Some(config.moved_to(transition.target)),
            TransitionKind::Atom(_) | TransitionKind::Range(_, _) | TransitionKind::Set(_) => {
                if treat_eof_as_epsilon {
                    let (min, max) = self.sim.atn.symbol_universe();
                    if transition.matches(token::EOF, min, max) {
                        return Some(config.moved_to(transition.target));
                    }
                }
                None
            }
            _ => None,
        }
    }

    /// Predicate-gated transition: collect the obligation, or judge it on
    /// the spot in full-context mode.
    #[allow(clippy::too_many_arguments)]
    fn predicate_target(
        &mut self,
        input: &mut dyn TokenStream,
        host: &mut dyn PredictionHost,
        config: &AtnConfig,
        target: usize,
        predicate: SemanticContext,
        collect: bool,
        full_ctx: bool,
    ) -> Option<AtnConfig> {
        use crate::stream::IntStream;
        if !collect {
            return Some(config.moved_to(target));
        }
        if full_ctx {
            // the stack is real here, judge the predicate now against the
            // decision entry position
            let current = input.index();
            input.seek(self.start_index);
            let passes = predicate.eval(&mut AsRecognizer(host));
            input.seek(current);
            return passes.then(|| config.moved_to(target));
        }
        let combined = SemanticContext::and(&config.semantic_context, &predicate);
        Some(config.with_semantic(target, Arc::new(combined)))
    }

    /// Publishes a frozen configuration set as a DFA state, canonicalizing
    /// stacks through the shared context cache first.
    fn add_dfa_state(
        &mut self,
        mut configs: AtnConfigSet,
        is_accept: bool,
        prediction: u32,
        requires_full_context: bool,
        predicates: Option<Vec<PredPrediction>>,
    ) -> usize {
        configs.optimize_contexts(&self.sim.context_cache);
        configs.freeze();
        let mut state = DfaState::new(Arc::new(configs));
        state.is_accept = is_accept;
        state.prediction = prediction;
        state.requires_full_context = requires_full_context;
        state.predicates = predicates.map(Arc::new);
        self.dfa.add_state(state)
    }

    /// The conflicting alternatives recorded on the set, or its unique
    /// alternative, or all of its alternatives.
    fn conflicting_or_unique_alts(&self, configs: &AtnConfigSet) -> BitSet {
        if configs.unique_alt != INVALID_ALT {
            let mut alts = BitSet::new();
            alts.insert(configs.unique_alt as usize);
            return alts;
        }
        configs
            .conflicting_alts
            .clone()
            .unwrap_or_else(|| configs.alts())
    }

    /// Per-alternative predicate formulas for the ambiguous alternatives,
    /// or None when no alternative actually carries a predicate.
    fn preds_for_ambig_alts(
        &self,
        ambig_alts: &BitSet,
        configs: &AtnConfigSet,
        nalts: usize,
    ) -> Option<Vec<Arc<SemanticContext>>> {
        let mut alt_to_pred: Vec<Option<Arc<SemanticContext>>> = vec![None; nalts + 1];
        for config in configs.iter() {
            if !ambig_alts.contains(config.alt as usize) {
                continue;
            }
            let slot = &mut alt_to_pred[config.alt as usize];
            *slot = Some(match slot.take() {
                None => config.semantic_context.clone(),
                Some(existing) => {
                    Arc::new(SemanticContext::or(&existing, &config.semantic_context))
                }
            });
        }
        let mut predicated = 0;
        let resolved: Vec<Arc<SemanticContext>> = alt_to_pred
            .into_iter()
            .map(|pred| match pred {
                None => SemanticContext::none(),
                Some(pred) => {
                    if !pred.is_none() {
                        predicated += 1;
                    }
                    pred
                }
            })
            .collect();
        if predicated == 0 {
            return None;
        }
        Some(resolved)
    }

    /// (predicate, alt) pairs in alternative order for a predicated
    /// accept state.
    fn predicate_predictions(
        &self,
        ambig_alts: &BitSet,
        alt_to_pred: Vec<Arc<SemanticContext>>,
    ) -> Vec<PredPrediction> {
        let mut pairs = Vec::new();
        for (alt, pred) in alt_to_pred.into_iter().enumerate().skip(1) {
            if ambig_alts.contains(alt) {
                pairs.push(PredPrediction {
                    pred,
                    alt: alt as u32,
                });
            }
        }
        pairs
    }

    /// Evaluates (predicate, alt) pairs against the live context; with
    /// `complete` false stops at the first passing alternative.
    fn eval_predicate_pairs(
        &mut self,
        host: &mut dyn PredictionHost,
        predicates: &[PredPrediction],
        complete: bool,
    ) -> BitSet {
        let mut predictions = BitSet::new();
        for pair in predicates {
            if pair.pred.is_none() {
                predictions.insert(pair.alt as usize);
                if !complete {
                    break;
                }
                continue;
            }
            if pair.pred.eval(&mut AsRecognizer(host)) {
                predictions.insert(pair.alt as usize);
                if !complete {
                    break;
                }
            }
        }
        predictions
    }

    /// Best-effort answer when the reach dies: an alternative that at
    /// least finished the decision entry rule, preferring semantically
    /// viable ones. The error strategy then has a sensible alternative to
    /// attach its recovery to.
    fn syn_valid_or_sem_invalid_alt(
        &mut self,
        input: &mut dyn TokenStream,
        host: &mut dyn PredictionHost,
        configs: &AtnConfigSet,
    ) -> u32 {
        let (valid, invalid) = self.split_by_semantic_validity(input, host, configs);
        let alt = self.alt_finishing_entry_rule(&valid);
        if alt != INVALID_ALT {
            return alt;
        }
        if !invalid.is_empty() {
            return self.alt_finishing_entry_rule(&invalid);
        }
        INVALID_ALT
    }

    fn alt_finishing_entry_rule(&self, configs: &AtnConfigSet) -> u32 {
        let atn = &self.sim.atn;
        let mut alts = BitSet::new();
        for config in configs.iter() {
            if config.outer_context_depth() > 0
                || (atn.states[config.state].is_rule_stop() && config.context.has_empty_path())
            {
                alts.insert(config.alt as usize);
            }
        }
        alts.min().map(|a| a as u32).unwrap_or(INVALID_ALT)
    }

    fn split_by_semantic_validity(
        &mut self,
        input: &mut dyn TokenStream,
        host: &mut dyn PredictionHost,
        configs: &AtnConfigSet,
    ) -> (AtnConfigSet, AtnConfigSet) {
        use crate::stream::IntStream;
        let mut valid = AtnConfigSet::new(configs.full_ctx);
        let mut invalid = AtnConfigSet::new(configs.full_ctx);
        for config in configs.iter() {
            if config.semantic_context.is_none() {
                valid.add(config.clone(), &mut self.merge_cache);
                continue;
            }
            let current = input.index();
            input.seek(self.start_index);
            let passes = config.semantic_context.eval(&mut AsRecognizer(host));
            input.seek(current);
            if passes {
                valid.add(config.clone(), &mut self.merge_cache);
            } else {
                invalid.add(config.clone(), &mut self.merge_cache);
            }
        }
        (valid, invalid)
    }

    fn no_viable_alt(&self, input: &mut dyn TokenStream) -> RecognitionError {
        let offending = input.lt(1).cloned().unwrap_or(token::CommonToken {
            token_type: token::EOF,
            channel: token::DEFAULT_CHANNEL,
            start: 0,
            stop: 0,
            index: None,
            line: 1,
            column: 0,
            text: "<EOF>".to_string(),
        });
        RecognitionError::NoViableAlt {
            offending,
            decision: self.dfa.decision,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{parser_dfas, ParserAtnSimulator, PredictionHost, PredictionMode};
    use crate::atn::config_set::AtnConfigSet;
    use crate::atn::{samples, Atn, Recognizer};
    use crate::context::{empty_context, PredictionContextCache};
    use crate::stream::{CommonTokenStream, IntStream, TokenSource};
    use crate::support::BitSet;
    use crate::token::{CommonToken, DEFAULT_CHANNEL, EOF};
    use std::sync::Arc;

    /// Token source replaying a fixed list of token types.
    struct Tokens {
        types: Vec<i32>,
        next: usize,
    }

    impl Tokens {
        fn new(types: &[i32]) -> Tokens {
            Tokens {
                types: types.to_vec(),
                next: 0,
            }
        }
    }

    impl TokenSource for Tokens {
        fn next_token(&mut self) -> CommonToken {
            let token_type = self.types.get(self.next).copied().unwrap_or(EOF);
            self.next += 1;
            CommonToken {
                token_type,
                channel: DEFAULT_CHANNEL,
                start: self.next,
                stop: self.next,
                index: None,
                line: 1,
                column: self.next as u32,
                text: format!("t{}", token_type),
            }
        }

        fn source_name(&self) -> &str {
            "<tokens>"
        }
    }

    #[derive(Default)]
    struct RecordingHost {
        ambiguities: Vec<BitSet>,
        full_context_attempts: usize,
        context_sensitivities: usize,
        precedence: i32,
    }

    impl Recognizer for RecordingHost {
        fn precpred(&mut self, precedence: i32) -> bool {
            precedence >= self.precedence
        }
    }

    impl PredictionHost for RecordingHost {
        fn precedence(&self) -> i32 {
            self.precedence
        }

        fn report_ambiguity(
            &mut self,
            _decision: usize,
            _start: usize,
            _stop: usize,
            _exact: bool,
            alts: &BitSet,
            _configs: &AtnConfigSet,
        ) {
            self.ambiguities.push(alts.clone());
        }

        fn report_attempting_full_context(
            &mut self,
            _decision: usize,
            _start: usize,
            _stop: usize,
            _alts: &BitSet,
            _configs: &AtnConfigSet,
        ) {
            self.full_context_attempts += 1;
        }

        fn report_context_sensitivity(
            &mut self,
            _decision: usize,
            _start: usize,
            _stop: usize,
            _prediction: u32,
            _configs: &AtnConfigSet,
        ) {
            self.context_sensitivities += 1;
        }
    }

    fn simulator(atn: Arc<Atn>) -> ParserAtnSimulator {
        let dfas = Arc::new(parser_dfas(&atn));
        ParserAtnSimulator::new(atn, dfas, Arc::new(PredictionContextCache::new()))
    }

    #[test]
    fn shared_prefix_resolves_on_second_token() {
        // s : A B | A C on "A B"
        let atn = samples::two_alts_shared_prefix();
        let sim = simulator(atn);
        let mut input = CommonTokenStream::new(Tokens::new(&[1, 2]));
        let mut host = RecordingHost::default();
        let alt = sim
            .adaptive_predict(&mut input, 0, &empty_context(), &mut host)
            .unwrap();
        assert_eq!(alt, 1);
        assert!(host.ambiguities.is_empty());
        assert_eq!(host.full_context_attempts, 0);
        // the walk over A and B created DFA states beyond the start state
        assert!(sim.dfas()[0].num_states() >= 2);
        // prediction restored the stream
        assert_eq!(input.index(), 0);
    }

    #[test]
    fn call_shape_picks_second_alt() {
        // s : ID EQ ID | ID LP ID RP on "ID LP ID RP"
        let atn = samples::assign_or_call();
        let sim = simulator(atn);
        let mut input = CommonTokenStream::new(Tokens::new(&[1, 3, 1, 4]));
        let mut host = RecordingHost::default();
        let alt = sim
            .adaptive_predict(&mut input, 0, &empty_context(), &mut host)
            .unwrap();
        assert_eq!(alt, 2);
        assert!(host.ambiguities.is_empty());
        assert_eq!(host.full_context_attempts, 0);
    }

    #[test]
    fn twin_alternatives_report_ambiguity_and_take_first() {
        // s : A | A on "A"
        let atn = samples::twin_alts();
        let sim = simulator(atn);
        let mut input = CommonTokenStream::new(Tokens::new(&[1]));
        let mut host = RecordingHost::default();
        let alt = sim
            .adaptive_predict(&mut input, 0, &empty_context(), &mut host)
            .unwrap();
        assert_eq!(alt, 1);
        assert_eq!(host.full_context_attempts, 1);
        assert_eq!(host.ambiguities.len(), 1);
        assert_eq!(host.ambiguities[0].iter().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn sll_mode_takes_minimum_without_fallback() {
        let atn = samples::twin_alts();
        let dfas = Arc::new(parser_dfas(&atn));
        let mut sim =
            ParserAtnSimulator::new(atn, dfas, Arc::new(PredictionContextCache::new()));
        sim.mode = PredictionMode::Sll;
        let mut input = CommonTokenStream::new(Tokens::new(&[1]));
        let mut host = RecordingHost::default();
        let alt = sim
            .adaptive_predict(&mut input, 0, &empty_context(), &mut host)
            .unwrap();
        assert_eq!(alt, 1);
        assert_eq!(host.full_context_attempts, 0);
    }

    #[test]
    fn no_viable_alt_names_the_decision() {
        let atn = samples::two_alts_shared_prefix();
        let sim = simulator(atn);
        // C alone matches neither alternative's first token
        let mut input = CommonTokenStream::new(Tokens::new(&[3]));
        let mut host = RecordingHost::default();
        let err = sim
            .adaptive_predict(&mut input, 0, &empty_context(), &mut host)
            .unwrap_err();
        match err {
            crate::error::RecognitionError::NoViableAlt { decision, .. } => {
                assert_eq!(decision, 0)
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn prediction_is_deterministic_cold_and_warm() {
        let atn = samples::assign_or_call();
        let sim = simulator(atn);
        let mut host = RecordingHost::default();
        let mut cold_input = CommonTokenStream::new(Tokens::new(&[1, 2, 1]));
        let cold = sim
            .adaptive_predict(&mut cold_input, 0, &empty_context(), &mut host)
            .unwrap();
        let states = sim.dfas()[0].num_states();
        // second run over the same lookahead must hit the DFA only
        let mut warm_input = CommonTokenStream::new(Tokens::new(&[1, 2, 1]));
        let warm = sim
            .adaptive_predict(&mut warm_input, 0, &empty_context(), &mut host)
            .unwrap();
        assert_eq!(cold, warm);
        assert_eq!(sim.dfas()[0].num_states(), states);
        assert_eq!(cold, 1);
    }

    #[test]
    fn precedence_decision_gates_low_precedence_loops() {
        // e : e MUL e | e ADD e | INT, sitting after "INT" with "ADD INT"
        // ahead; at precedence 0 the loop is viable, at precedence 3 the
        // ADD alternative (precedence 2) must not be entered
        let atn = samples::left_recursive_expr();
        let sim = simulator(atn);
        let decision = 0;
        let mut host = RecordingHost::default();
        host.precedence = 0;
        let mut input = CommonTokenStream::new(Tokens::new(&[2, 3]));
        let alt = sim
            .adaptive_predict(&mut input, decision, &empty_context(), &mut host)
            .unwrap();
        assert_eq!(alt, 1, "loop entered for ADD at precedence 0");
        let mut host = RecordingHost::default();
        host.precedence = 3;
        let mut input = CommonTokenStream::new(Tokens::new(&[2, 3]));
        let alt = sim
            .adaptive_predict(&mut input, decision, &empty_context(), &mut host)
            .unwrap();
        assert_eq!(alt, 2, "loop skipped for ADD at precedence 3");
    }
}
