mod simulator;

pub use self::simulator::{lexer_dfas, LexerAtnSimulator, LexerMatch};

use crate::atn::lexer_action::LexerActionSink;
use crate::atn::{Atn, Recognizer};
use crate::dfa::Dfa;
use crate::error::{ConsoleErrorListener, ErrorListener, RecognitionError};
use crate::stream::{CharStream, IntStream, TokenSource};
use crate::token::{CommonToken, CommonTokenFactory, TokenFactory, DEFAULT_CHANNEL, EOF};
use std::sync::Arc;

/// The mode every lexer starts in.
pub const DEFAULT_MODE: usize = 0;

/// What the replayed actions decided about the current token.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Command {
    Emit,
    Skip,
    More,
}

/// Per-token mutable state, separated from the lexer so action replay can
/// borrow it alongside the input stream.
struct TokenState {
    token_type: Option<i32>,
    channel: usize,
    mode: usize,
    mode_stack: Vec<usize>,
    command: Command,
    custom: Option<Box<dyn FnMut(usize, usize)>>,
}

impl LexerActionSink for TokenState {
    fn skip(&mut self) {
        self.command = Command::Skip;
    }

    fn more(&mut self) {
        self.command = Command::More;
    }

    fn set_type(&mut self, token_type: i32) {
        self.token_type = Some(token_type);
    }

    fn set_channel(&mut self, channel: usize) {
        self.channel = channel;
    }

    fn set_mode(&mut self, mode: usize) {
        self.mode = mode;
    }

    fn push_mode(&mut self, mode: usize) {
        self.mode_stack.push(self.mode);
        self.mode = mode;
    }

    fn pop_mode(&mut self) {
        self.mode = self
            .mode_stack
            .pop()
            .unwrap_or_else(|| panic!("cannot pop the empty lexer mode stack"));
    }

    fn custom_action(&mut self, rule_index: usize, action_index: usize) {
        if let Some(handler) = &mut self.custom {
            handler(rule_index, action_index);
        }
    }
}

/// Predicate evaluation hooks, defaulting to "every predicate passes".
struct PredicateHost {
    sempred: Option<Box<dyn FnMut(usize, usize) -> bool>>,
}

impl Recognizer for PredicateHost {
    fn sempred(&mut self, rule_index: usize, pred_index: usize) -> bool {
        match &mut self.sempred {
            Some(handler) => handler(rule_index, pred_index),
            None => true,
        }
    }
}

/// Tokenizer driving a [LexerAtnSimulator] over a character stream.
///
/// One call of [TokenSource::next_token] emits one token: the simulator
/// finds the longest match for the current mode, the recorded actions
/// replay against this lexer (skip, more, type/channel/mode changes), and
/// the token is built by the token factory. Recognition failures are
/// reported to the error listeners, one character is dropped and scanning
/// resumes, so the lexer always terminates with an EOF token and keeps
/// emitting EOF from then on.
pub struct Lexer<S: CharStream> {
    input: S,
    sim: LexerAtnSimulator,
    atn: Arc<Atn>,
    factory: Box<dyn TokenFactory>,
    listeners: Vec<Box<dyn ErrorListener>>,
    state: TokenState,
    host: PredicateHost,
    token_start_index: usize,
    token_start_line: u32,
    token_start_column: u32,
    hit_eof: bool,
}

impl<S: CharStream> Lexer<S> {
    /// Builds a lexer with its own fresh DFA caches.
    pub fn new(atn: Arc<Atn>, input: S) -> Lexer<S> {
        let dfas = Arc::new(lexer_dfas(&atn));
        Lexer::with_shared(atn, dfas, input)
    }

    /// Builds a lexer over DFA caches shared with other lexer instances
    /// of the same grammar. Prediction work done by any of them warms the
    /// caches for all.
    pub fn with_shared(atn: Arc<Atn>, dfas: Arc<Vec<Dfa>>, input: S) -> Lexer<S> {
        Lexer {
            sim: LexerAtnSimulator::new(atn.clone(), dfas),
            atn,
            input,
            factory: Box::new(CommonTokenFactory),
            listeners: vec![Box::new(ConsoleErrorListener)],
            state: TokenState {
                token_type: None,
                channel: DEFAULT_CHANNEL,
                mode: DEFAULT_MODE,
                mode_stack: Vec::new(),
                command: Command::Emit,
                custom: None,
            },
            host: PredicateHost { sempred: None },
            token_start_index: 0,
            token_start_line: 1,
            token_start_column: 0,
            hit_eof: false,
        }
    }

    pub fn atn(&self) -> &Arc<Atn> {
        &self.atn
    }

    /// The per-mode DFA caches driving this lexer.
    pub fn sim_dfas(&self) -> Arc<Vec<Dfa>> {
        self.sim.dfas().clone()
    }

    pub fn input(&self) -> &S {
        &self.input
    }

    pub fn mode(&self) -> usize {
        self.state.mode
    }

    pub fn set_mode(&mut self, mode: usize) {
        self.state.mode = mode;
    }

    pub fn line(&self) -> u32 {
        self.sim.line
    }

    pub fn column(&self) -> u32 {
        self.sim.column
    }

    pub fn set_token_factory(&mut self, factory: Box<dyn TokenFactory>) {
        self.factory = factory;
    }

    pub fn add_error_listener(&mut self, listener: Box<dyn ErrorListener>) {
        self.listeners.push(listener);
    }

    pub fn remove_error_listeners(&mut self) {
        self.listeners.clear();
    }

    /// Installs the evaluator for `{...}?` predicates in lexer rules.
    pub fn set_predicate_handler(&mut self, handler: Box<dyn FnMut(usize, usize) -> bool>) {
        self.host.sempred = Some(handler);
    }

    /// Installs the callback for embedded custom actions.
    pub fn set_custom_action_handler(&mut self, handler: Box<dyn FnMut(usize, usize)>) {
        self.state.custom = Some(handler);
    }

    fn next_token_inner(&mut self) -> Option<CommonToken> {
        self.token_start_index = self.input.index();
        self.token_start_line = self.sim.line;
        self.token_start_column = self.sim.column;
        loop {
            self.state.command = Command::Emit;
            self.state.token_type = None;
            self.state.channel = DEFAULT_CHANNEL;
            let mode = self.state.mode;
            match self.sim.match_token(&mut self.input, mode, &mut self.host) {
                Ok(matched) => {
                    if matched.token_type == EOF {
                        self.hit_eof = true;
                        return Some(self.emit_eof());
                    }
                    if let Some(executor) = &matched.executor {
                        executor.execute(&mut self.input, &mut self.state, self.token_start_index);
                    }
                    let token_type = self.state.token_type.unwrap_or(matched.token_type);
                    match self.state.command {
                        Command::Skip => return None,
                        Command::More => continue,
                        Command::Emit => return Some(self.emit(token_type)),
                    }
                }
                Err(e) => {
                    self.notify(&e);
                    if self.input.la(1) != EOF {
                        // drop the offending character and rescan
                        self.sim.consume(&mut self.input);
                    }
                    return None;
                }
            }
        }
    }

    fn emit(&mut self, token_type: i32) -> CommonToken {
        let stop = self.input.index().saturating_sub(1);
        let text = self.input.text(self.token_start_index, stop);
        self.factory.create(
            token_type,
            text,
            self.state.channel,
            self.token_start_index,
            stop,
            self.token_start_line,
            self.token_start_column,
        )
    }

    fn emit_eof(&mut self) -> CommonToken {
        let index = self.input.index();
        self.factory.create(
            EOF,
            "<EOF>".to_string(),
            DEFAULT_CHANNEL,
            index,
            index,
            self.sim.line,
            self.sim.column,
        )
    }

    fn notify(&mut self, e: &RecognitionError) {
        let (line, column) = e.position().unwrap_or((self.sim.line, self.sim.column));
        let msg = e.to_string();
        for listener in &mut self.listeners {
            listener.syntax_error(None, line, column, &msg);
        }
    }
}

impl<S: CharStream> TokenSource for Lexer<S> {
    /// Emits the next token, skipping and accumulating per the grammar's
    /// lexer commands, recovering from unrecognizable characters.
    fn next_token(&mut self) -> CommonToken {
        loop {
            if self.hit_eof {
                return self.emit_eof();
            }
            let marker = self.input.mark();
            let token = self.next_token_inner();
            self.input.release(marker);
            if let Some(token) = token {
                return token;
            }
        }
    }

    fn source_name(&self) -> &str {
        self.input.source_name()
    }
}

#[cfg(test)]
mod tests {
    use super::Lexer;
    use crate::atn::lexer_action::LexerAction;
    use crate::atn::samples::{self, AtnBuilder};
    use crate::atn::transition::TransitionKind;
    use crate::atn::{AtnStateKind, GrammarType};
    use crate::error::ErrorListener;
    use crate::stream::{InputStream, TokenSource};
    use crate::token::{CommonToken, EOF};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct CollectingListener {
        messages: Arc<Mutex<Vec<String>>>,
    }

    impl ErrorListener for CollectingListener {
        fn syntax_error(&mut self, _: Option<&CommonToken>, line: u32, col: u32, msg: &str) {
            self.messages
                .lock()
                .unwrap()
                .push(format!("line {}:{} {}", line, col, msg));
        }
    }

    fn token_types(lexer: &mut Lexer<InputStream>) -> Vec<i32> {
        let mut types = Vec::new();
        loop {
            let token = lexer.next_token();
            let is_eof = token.token_type == EOF;
            types.push(token.token_type);
            if is_eof {
                break;
            }
        }
        types
    }

    #[test]
    fn skips_whitespace_tokens() {
        let atn = samples::skip_whitespace_lexer();
        let input = InputStream::from_string("a a  a", "t");
        let mut lexer = Lexer::new(atn, input);
        assert_eq!(token_types(&mut lexer), vec![1, 1, 1, EOF]);
    }

    #[test]
    fn eof_is_pinned_after_first_hit() {
        let atn = samples::skip_whitespace_lexer();
        let input = InputStream::from_string("a", "t");
        let mut lexer = Lexer::new(atn, input);
        assert_eq!(lexer.next_token().token_type, 1);
        let first_eof = lexer.next_token();
        let second_eof = lexer.next_token();
        assert_eq!(first_eof.token_type, EOF);
        assert_eq!(second_eof.token_type, EOF);
        assert_eq!(first_eof.start, second_eof.start);
    }

    #[test]
    fn token_carries_position_and_text() {
        let atn = samples::keyword_or_identifier_lexer();
        let input = InputStream::from_string("if then", "t");
        let mut lexer = Lexer::new(atn, input);
        lexer.remove_error_listeners();
        let kw = lexer.next_token();
        assert_eq!(kw.token_type, 1);
        assert_eq!(kw.text, "if");
        assert_eq!((kw.start, kw.stop), (0, 1));
        assert_eq!((kw.line, kw.column), (1, 0));
    }

    #[test]
    fn recovers_from_unknown_character() {
        let atn = samples::skip_whitespace_lexer();
        let input = InputStream::from_string("!a", "t");
        let mut lexer = Lexer::new(atn, input);
        lexer.remove_error_listeners();
        let listener = CollectingListener::default();
        let messages = listener.messages.clone();
        lexer.add_error_listener(Box::new(listener));
        assert_eq!(token_types(&mut lexer), vec![1, EOF]);
        let messages = messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("token recognition error at: '!'"));
    }

    #[test]
    fn more_accumulates_into_next_token() {
        // A : 'a' -> more ; B : 'b' ;
        let mut b = AtnBuilder::new(GrammarType::Lexer, 2, 2);
        let (a_start, a_stop) = b.rule(0, false);
        let (b_start, b_stop) = b.rule(1, false);
        b.atn_mut().rule_to_token_type = vec![1, 2];
        b.atn_mut().lexer_actions = vec![LexerAction::More];
        let a1 = b.state(0, AtnStateKind::Basic);
        let a2 = b.state(0, AtnStateKind::Basic);
        let a3 = b.state(0, AtnStateKind::Basic);
        b.epsilon(a_start, a1);
        b.atom(a1, a2, 'a' as i32);
        b.transition(
            a2,
            a3,
            TransitionKind::Action {
                rule_index: 0,
                action_index: 0,
                is_ctx_dependent: false,
            },
        );
        b.epsilon(a3, a_stop);
        let b1 = b.state(1, AtnStateKind::Basic);
        let b2 = b.state(1, AtnStateKind::Basic);
        b.epsilon(b_start, b1);
        b.atom(b1, b2, 'b' as i32);
        b.epsilon(b2, b_stop);
        let mode = b.state(
            0,
            AtnStateKind::TokenStart {
                decision: 0,
                non_greedy: false,
            },
        );
        b.decision(mode);
        b.epsilon(mode, a_start);
        b.epsilon(mode, b_start);
        b.atn_mut().mode_to_start_state = vec![mode];
        let atn = b.build();

        let input = InputStream::from_string("ab", "t");
        let mut lexer = Lexer::new(atn, input);
        let token = lexer.next_token();
        assert_eq!(token.token_type, 2);
        assert_eq!(token.text, "ab");
        assert_eq!(lexer.next_token().token_type, EOF);
    }

    #[test]
    #[should_panic(expected = "empty lexer mode stack")]
    fn popping_empty_mode_stack_panics() {
        use crate::atn::lexer_action::LexerActionSink;
        let atn = samples::skip_whitespace_lexer();
        let input = InputStream::from_string("a", "t");
        let mut lexer = Lexer::new(atn, input);
        lexer.state.pop_mode();
    }
}
