mod prediction_mode;
mod simulator;

pub use self::prediction_mode::PredictionMode;
pub use self::simulator::{parser_dfas, ParserAtnSimulator, PredictionHost};

use crate::atn::config_set::AtnConfigSet;
use crate::atn::transition::TransitionKind;
use crate::atn::{Atn, AtnStateKind, Recognizer};
use crate::context::{PredictionContext, PredictionContextCache};
use crate::dfa::Dfa;
use crate::error::{ConsoleErrorListener, ErrorListener, RecognitionError};
use crate::interval::IntervalSet;
use crate::stream::{IntStream, TokenStream};
use crate::support::BitSet;
use crate::token::{CommonToken, Vocabulary};
use std::sync::Arc;

/// A finished parse tree.
///
/// `Rule` nodes mirror rule invocations, `Terminal` leaves hold matched
/// tokens and `Error` leaves hold tokens the error strategy deleted or
/// conjured up during recovery.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseTree {
    Rule {
        rule_index: usize,
        alt: u32,
        children: Vec<ParseTree>,
    },
    Terminal(CommonToken),
    Error(CommonToken),
}

impl ParseTree {
    pub fn children(&self) -> &[ParseTree] {
        match self {
            ParseTree::Rule { children, .. } => children,
            _ => &[],
        }
    }

    pub fn token(&self) -> Option<&CommonToken> {
        match self {
            ParseTree::Terminal(token) | ParseTree::Error(token) => Some(token),
            ParseTree::Rule { .. } => None,
        }
    }

    /// Concatenated text of every token under this node.
    pub fn text(&self) -> String {
        match self {
            ParseTree::Terminal(token) | ParseTree::Error(token) => token.text.clone(),
            ParseTree::Rule { children, .. } => {
                children.iter().map(ParseTree::text).collect::<String>()
            }
        }
    }
}

impl std::fmt::Display for ParseTree {
    /// Prints the lisp-style form `(rule child child ...)` with rule
    /// indices for rule nodes and token text for leaves.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseTree::Terminal(token) => write!(f, "{}", token.text),
            ParseTree::Error(token) => write!(f, "<error:{}>", token.text),
            ParseTree::Rule {
                rule_index,
                children,
                ..
            } => {
                write!(f, "({}", rule_index)?;
                for child in children {
                    write!(f, " {}", child)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// One live rule invocation on the parser's stack.
struct Frame {
    rule_index: usize,
    /// The state whose rule transition invoked this frame; None for the
    /// start rule.
    invoking_state: Option<usize>,
    alt: u32,
    children: Vec<ParseTree>,
}

/// The parser pieces prediction needs to call back into, split out so the
/// simulator can borrow them alongside the input stream.
pub struct ParserShared {
    listeners: Vec<Box<dyn ErrorListener>>,
    precedence_stack: Vec<i32>,
    sempred: Option<Box<dyn FnMut(usize, usize) -> bool>>,
}

impl Recognizer for ParserShared {
    fn sempred(&mut self, rule_index: usize, pred_index: usize) -> bool {
        match &mut self.sempred {
            Some(handler) => handler(rule_index, pred_index),
            None => true,
        }
    }

    fn precpred(&mut self, precedence: i32) -> bool {
        precedence >= self.precedence_stack.last().copied().unwrap_or(0)
    }
}

impl PredictionHost for ParserShared {
    fn precedence(&self) -> i32 {
        self.precedence_stack.last().copied().unwrap_or(-1)
    }

    fn report_ambiguity(
        &mut self,
        decision: usize,
        start_index: usize,
        stop_index: usize,
        exact: bool,
        ambig_alts: &BitSet,
        configs: &AtnConfigSet,
    ) {
        for listener in &mut self.listeners {
            listener.report_ambiguity(decision, start_index, stop_index, exact, ambig_alts, configs);
        }
    }

    fn report_attempting_full_context(
        &mut self,
        decision: usize,
        start_index: usize,
        stop_index: usize,
        conflicting_alts: &BitSet,
        configs: &AtnConfigSet,
    ) {
        for listener in &mut self.listeners {
            listener.report_attempting_full_context(
                decision,
                start_index,
                stop_index,
                conflicting_alts,
                configs,
            );
        }
    }

    fn report_context_sensitivity(
        &mut self,
        decision: usize,
        start_index: usize,
        stop_index: usize,
        prediction: u32,
        configs: &AtnConfigSet,
    ) {
        for listener in &mut self.listeners {
            listener.report_context_sensitivity(
                decision,
                start_index,
                stop_index,
                prediction,
                configs,
            );
        }
    }
}

/// Decides what happens after a recognition error.
///
/// `sync` runs before every decision and may abort the parse (this is the
/// host's cancellation point). `recover_inline` repairs a failed token
/// match and reports how it repaired the stream; `recover` resynchronizes
/// after an error inside a rule. Returning Err from either aborts the
/// parse with that error.
pub trait ErrorStrategy {
    fn reset(&mut self) {}

    fn sync(&mut self, _parser: &mut Parser) -> Result<(), RecognitionError> {
        Ok(())
    }

    /// A token match succeeded; recovery mode ends.
    fn report_match(&mut self, _parser: &mut Parser) {}

    fn report_error(&mut self, parser: &mut Parser, e: &RecognitionError);

    fn recover(&mut self, parser: &mut Parser, e: RecognitionError)
        -> Result<(), RecognitionError>;

    fn recover_inline(
        &mut self,
        parser: &mut Parser,
        expected: i32,
    ) -> Result<InlineRecovery, RecognitionError>;
}

/// How [ErrorStrategy::recover_inline] repaired a failed token match.
///
/// The distinction drives tree building: a deleted token becomes an error
/// leaf followed by the genuinely matched one as a normal terminal, while
/// a conjured token only ever appears as an error leaf.
#[derive(Debug)]
pub enum InlineRecovery {
    /// The offending token was dropped and the token after it matched.
    /// Both tokens were consumed from the stream.
    Deleted {
        deleted: CommonToken,
        matched: CommonToken,
    },
    /// Nothing was consumed; the payload is a synthetic token standing in
    /// for the one the input is missing.
    Inserted(CommonToken),
}

/// The shipped recovery strategy: report once per error burst, repair
/// single-token glitches inline, otherwise drop tokens until the input
/// resynchronizes with something the current rule stack expects.
///
/// Deliberately minimal; hosts wanting full-featured recovery install
/// their own [ErrorStrategy].
#[derive(Default)]
pub struct DefaultErrorStrategy {
    in_recovery: bool,
    last_error_index: Option<usize>,
}

impl DefaultErrorStrategy {
    pub fn new() -> DefaultErrorStrategy {
        DefaultErrorStrategy::default()
    }
}

impl ErrorStrategy for DefaultErrorStrategy {
    fn reset(&mut self) {
        self.in_recovery = false;
        self.last_error_index = None;
    }

    fn report_match(&mut self, _parser: &mut Parser) {
        self.in_recovery = false;
    }

    fn report_error(&mut self, parser: &mut Parser, e: &RecognitionError) {
        if self.in_recovery {
            return;
        }
        self.in_recovery = true;
        parser.notify(e);
    }

    fn recover(
        &mut self,
        parser: &mut Parser,
        e: RecognitionError,
    ) -> Result<(), RecognitionError> {
        let resync = parser.expected_tokens();
        loop {
            let t = parser.input.la(1);
            if t == crate::token::EOF {
                return Err(e);
            }
            if resync.contains(t) {
                return Ok(());
            }
            parser.input.consume();
        }
    }

    fn recover_inline(
        &mut self,
        parser: &mut Parser,
        expected: i32,
    ) -> Result<InlineRecovery, RecognitionError> {
        let offending = parser.current_token();
        let mismatch = RecognitionError::InputMismatch {
            offending: offending.clone(),
            expected: parser.display_token_set(&IntervalSet::of_one(expected)),
        };
        self.report_error(parser, &mismatch);
        // single-token deletion: the very next token is the one wanted
        if parser.input.la(2) == expected {
            parser.input.consume();
            let matched = parser.current_token();
            parser.input.consume();
            return Ok(InlineRecovery::Deleted {
                deleted: offending,
                matched,
            });
        }
        // single-token insertion, but never twice at the same spot
        if self.last_error_index == Some(parser.input.index()) {
            return Err(mismatch);
        }
        self.last_error_index = Some(parser.input.index());
        let mut missing = offending;
        missing.token_type = expected;
        missing.text = format!("<missing {}>", parser.vocabulary.display_name(expected));
        Ok(InlineRecovery::Inserted(missing))
    }
}

/// ATN-interpreting parser.
///
/// Walks the parser ATN directly: at every decision state it asks the
/// [ParserAtnSimulator] for the alternative, follows that alternative's
/// transitions, matches tokens against the stream and grows the parse
/// tree, until the start rule's stop state completes. Left-recursive
/// rules run through the same precedence bookkeeping the generated
/// recognizers use, so precedence climbing works unchanged.
///
/// A single decision can be overridden ([Parser::override_decision]) to
/// force an alternative at a given input index, for tools that resolve
/// ambiguities externally by reparsing.
pub struct Parser {
    input: Box<dyn TokenStream>,
    sim: ParserAtnSimulator,
    atn: Arc<Atn>,
    shared: ParserShared,
    strategy: Option<Box<dyn ErrorStrategy>>,
    vocabulary: Vocabulary,
    frames: Vec<Frame>,
    state: usize,
    override_decision: Option<(usize, usize, u32)>,
    override_reached: bool,
}

impl Parser {
    /// Builds a parser with fresh DFA and context caches.
    pub fn new(atn: Arc<Atn>, input: Box<dyn TokenStream>) -> Parser {
        let dfas = Arc::new(parser_dfas(&atn));
        Parser::with_shared(atn, dfas, Arc::new(PredictionContextCache::new()), input)
    }

    /// Builds a parser over caches shared between parser instances of the
    /// same grammar; prediction cost is paid once per distinct lookahead
    /// pattern across all of them.
    pub fn with_shared(
        atn: Arc<Atn>,
        dfas: Arc<Vec<Dfa>>,
        context_cache: Arc<PredictionContextCache>,
        input: Box<dyn TokenStream>,
    ) -> Parser {
        Parser {
            sim: ParserAtnSimulator::new(atn.clone(), dfas, context_cache),
            atn,
            input,
            shared: ParserShared {
                listeners: vec![Box::new(ConsoleErrorListener)],
                precedence_stack: Vec::new(),
                sempred: None,
            },
            strategy: Some(Box::new(DefaultErrorStrategy::new())),
            vocabulary: Vocabulary::default(),
            frames: Vec::new(),
            state: 0,
            override_decision: None,
            override_reached: false,
        }
    }

    pub fn atn(&self) -> &Arc<Atn> {
        &self.atn
    }

    pub fn set_prediction_mode(&mut self, mode: PredictionMode) {
        self.sim.mode = mode;
    }

    pub fn set_vocabulary(&mut self, vocabulary: Vocabulary) {
        self.vocabulary = vocabulary;
    }

    pub fn set_error_strategy(&mut self, strategy: Box<dyn ErrorStrategy>) {
        self.strategy = Some(strategy);
    }

    pub fn add_error_listener(&mut self, listener: Box<dyn ErrorListener>) {
        self.shared.listeners.push(listener);
    }

    pub fn remove_error_listeners(&mut self) {
        self.shared.listeners.clear();
    }

    /// Installs the evaluator for `{...}?` predicates in parser rules.
    pub fn set_predicate_handler(&mut self, handler: Box<dyn FnMut(usize, usize) -> bool>) {
        self.shared.sempred = Some(handler);
    }

    /// Forces `alt` the next time `decision` is predicted at input index
    /// `input_index`, instead of running prediction.
    pub fn override_decision(&mut self, decision: usize, input_index: usize, alt: u32) {
        self.override_decision = Some((decision, input_index, alt));
        self.override_reached = false;
    }

    /// Parses `start_rule` to completion and returns its tree.
    pub fn parse(&mut self, start_rule: usize) -> Result<ParseTree, RecognitionError> {
        let atn = self.atn.clone();
        let start_state = atn.rule_to_start_state[start_rule];
        let left_recursive = self.is_left_recursive(start_rule);
        self.frames.clear();
        self.frames.push(Frame {
            rule_index: start_rule,
            invoking_state: None,
            alt: 1,
            children: Vec::new(),
        });
        self.shared.precedence_stack.clear();
        if left_recursive {
            self.shared.precedence_stack.push(0);
        }
        if let Some(strategy) = &mut self.strategy {
            strategy.reset();
        }
        self.state = start_state;
        loop {
            if atn.states[self.state].is_rule_stop() {
                if self.frames.len() == 1 {
                    let frame = self
                        .frames
                        .pop()
                        .unwrap_or_else(|| panic!("parser finished without a root rule frame"));
                    if left_recursive {
                        self.shared.precedence_stack.pop();
                    }
                    return Ok(ParseTree::Rule {
                        rule_index: frame.rule_index,
                        alt: frame.alt,
                        children: frame.children,
                    });
                }
                self.visit_rule_stop();
                continue;
            }
            if let Err(e) = self.visit_state() {
                // park at the rule end so recovery resumes in the caller
                let rule = self.current_rule();
                self.state = atn.rule_to_stop_state[rule];
                let mut strategy = self.take_strategy();
                strategy.report_error(self, &e);
                let recovered = strategy.recover(self, e);
                self.strategy = Some(strategy);
                recovered?;
            }
        }
    }

    fn visit_state(&mut self) -> Result<(), RecognitionError> {
        let atn = self.atn.clone();
        let state = &atn.states[self.state];
        let mut alt = 1u32;
        if state.is_decision() && state.transitions.len() > 1 {
            let mut strategy = self.take_strategy();
            let sync = strategy.sync(self);
            self.strategy = Some(strategy);
            sync?;
            let decision = state
                .decision()
                .unwrap_or_else(|| panic!("decision state {} lost its number", self.state));
            alt = self.predict(decision)?;
            if let Some(frame) = self.frames.last_mut() {
                frame.alt = alt;
            }
        }
        let transition = state.transitions[(alt - 1) as usize].clone();
        match &transition.label {
            TransitionKind::Epsilon { .. } => {
                let precedence_loop = matches!(
                    state.kind,
                    AtnStateKind::StarLoopEntry {
                        precedence_decision: true,
                        ..
                    }
                );
                if precedence_loop
                    && !matches!(
                        atn.states[transition.target].kind,
                        AtnStateKind::LoopEnd { .. }
                    )
                {
                    // a new loop iteration wraps everything parsed so far
                    // into a fresh left operand
                    self.push_new_recursion_context();
                }
            }
            TransitionKind::Atom(label) => self.match_token(*label)?,
            TransitionKind::Range(_, _)
            | TransitionKind::Set(_)
            | TransitionKind::NotSet(_)
            | TransitionKind::Wildcard => self.match_one_of(&transition.label)?,
            TransitionKind::Rule {
                rule_index,
                precedence,
                ..
            } => {
                if self.is_left_recursive(*rule_index) {
                    self.shared.precedence_stack.push(*precedence);
                }
                self.frames.push(Frame {
                    rule_index: *rule_index,
                    invoking_state: Some(self.state),
                    alt: 1,
                    children: Vec::new(),
                });
            }
            TransitionKind::Predicate {
                rule_index,
                pred_index,
                ..
            } => {
                if !self.shared.sempred(*rule_index, *pred_index) {
                    return Err(RecognitionError::FailedPredicate {
                        offending: self.current_token(),
                        rule_index: *rule_index,
                        pred_index: *pred_index,
                    });
                }
            }
            TransitionKind::Precedence(precedence) => {
                if !self.shared.precpred(*precedence) {
                    return Err(RecognitionError::FailedPredicate {
                        offending: self.current_token(),
                        rule_index: self.current_rule(),
                        pred_index: *precedence as usize,
                    });
                }
            }
            TransitionKind::Action { .. } => {
                // embedded parser actions belong to generated code, the
                // interpreter steps over them
            }
        }
        self.state = transition.target;
        Ok(())
    }

    fn visit_rule_stop(&mut self) {
        let frame = self
            .frames
            .pop()
            .unwrap_or_else(|| panic!("rule stop with no frame"));
        if self.is_left_recursive(frame.rule_index) {
            self.shared.precedence_stack.pop();
        }
        let node = ParseTree::Rule {
            rule_index: frame.rule_index,
            alt: frame.alt,
            children: frame.children,
        };
        let invoking = frame
            .invoking_state
            .unwrap_or_else(|| panic!("non-root frame without an invocation site"));
        self.frames
            .last_mut()
            .unwrap_or_else(|| panic!("rule stop with no caller frame"))
            .children
            .push(node);
        self.state = self.atn.rule_invocation_follow(invoking);
    }

    fn push_new_recursion_context(&mut self) {
        let frame = self
            .frames
            .last_mut()
            .unwrap_or_else(|| panic!("recursion context outside any rule"));
        let node = ParseTree::Rule {
            rule_index: frame.rule_index,
            alt: frame.alt,
            children: std::mem::take(&mut frame.children),
        };
        frame.children.push(node);
    }

    fn predict(&mut self, decision: usize) -> Result<u32, RecognitionError> {
        if let Some((d, index, alt)) = self.override_decision {
            if d == decision && self.input.index() == index && !self.override_reached {
                self.override_reached = true;
                return Ok(alt);
            }
        }
        let context = self.full_context();
        self.sim
            .adaptive_predict(self.input.as_mut(), decision, &context, &mut self.shared)
    }

    /// The live call stack rendered as a prediction context.
    fn full_context(&self) -> Arc<PredictionContext> {
        let invoking: Vec<usize> = self
            .frames
            .iter()
            .filter_map(|f| f.invoking_state)
            .collect();
        PredictionContext::from_rule_invocations(&self.atn, &invoking)
    }

    fn match_token(&mut self, expected: i32) -> Result<(), RecognitionError> {
        let token = self.current_token();
        if token.token_type == expected {
            let mut strategy = self.take_strategy();
            strategy.report_match(self);
            self.strategy = Some(strategy);
            self.input.consume();
            self.add_child(ParseTree::Terminal(token));
            return Ok(());
        }
        let mut strategy = self.take_strategy();
        let repaired = strategy.recover_inline(self, expected);
        self.strategy = Some(strategy);
        match repaired? {
            InlineRecovery::Deleted { deleted, matched } => {
                // the dropped token stays visible as an error leaf, the
                // token that actually matched is a normal terminal
                self.add_child(ParseTree::Error(deleted));
                self.add_child(ParseTree::Terminal(matched));
            }
            InlineRecovery::Inserted(missing) => {
                self.add_child(ParseTree::Error(missing));
            }
        }
        Ok(())
    }

    fn match_one_of(&mut self, label: &TransitionKind) -> Result<(), RecognitionError> {
        let (min, max) = self.atn.symbol_universe();
        let token = self.current_token();
        let transition = crate::atn::transition::Transition {
            target: 0,
            label: label.clone(),
        };
        if transition.matches(token.token_type, min, max) && !token.is_eof() {
            let mut strategy = self.take_strategy();
            strategy.report_match(self);
            self.strategy = Some(strategy);
            self.input.consume();
            self.add_child(ParseTree::Terminal(token));
            return Ok(());
        }
        let expected = self.display_token_set(&self.expected_tokens());
        Err(RecognitionError::InputMismatch {
            offending: token,
            expected,
        })
    }

    fn add_child(&mut self, child: ParseTree) {
        if let Some(frame) = self.frames.last_mut() {
            frame.children.push(child);
        }
    }

    fn is_left_recursive(&self, rule_index: usize) -> bool {
        matches!(
            self.atn.states[self.atn.rule_to_start_state[rule_index]].kind,
            AtnStateKind::RuleStart {
                left_recursive: true,
                ..
            }
        )
    }

    fn current_rule(&self) -> usize {
        self.frames.last().map(|f| f.rule_index).unwrap_or(0)
    }

    /// Clone of LT(1); the stream always has one (EOF at worst).
    pub fn current_token(&mut self) -> CommonToken {
        self.input
            .lt(1)
            .cloned()
            .unwrap_or_else(|| panic!("token stream ended without an EOF token"))
    }

    /// Tokens acceptable at the current state given the rule stack.
    pub fn expected_tokens(&self) -> IntervalSet {
        let invoking: Vec<usize> = self
            .frames
            .iter()
            .rev()
            .filter_map(|f| f.invoking_state)
            .collect();
        self.atn.expected_tokens(self.state, &invoking)
    }

    fn display_token_set(&self, set: &IntervalSet) -> String {
        let names: Vec<String> = set
            .iter()
            .take(8)
            .map(|t| self.vocabulary.display_name(t))
            .collect();
        format!("{{{}}}", names.join(", "))
    }

    fn notify(&mut self, e: &RecognitionError) {
        let (line, column) = e.position().unwrap_or((0, 0));
        let msg = e.to_string();
        let offending = e.offending_token().cloned();
        for listener in &mut self.shared.listeners {
            listener.syntax_error(offending.as_ref(), line, column, &msg);
        }
    }

    fn take_strategy(&mut self) -> Box<dyn ErrorStrategy> {
        self.strategy
            .take()
            .unwrap_or_else(|| panic!("error strategy re-entered"))
    }
}
