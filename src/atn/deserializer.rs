use super::lexer_action::LexerAction;
use super::transition::{Transition, TransitionKind};
use super::{Atn, AtnState, AtnStateKind, GrammarType};
use crate::error::RecognitionError;
use crate::interval::IntervalSet;
use crate::token;

/// The only serialization version this runtime accepts.
pub const SERIALIZED_VERSION: u32 = 3;

/// Fingerprint of the serialization layout; the offline tool stamps every
/// blob with it and a mismatch means the layout drifted.
pub const SERIALIZED_UUID: [u8; 16] = [
    0x33, 0x04, 0xF1, 0x0E, 0xAA, 0x51, 0x4E, 0x2B, 0x89, 0x1C, 0x3F, 0xD0, 0x7C, 0x8A, 0xBE,
    0x09,
];

/// Word value standing in for -1 / "absent".
pub const NONE_WORD: u32 = 0xFFFF_FFFF;

pub const STATE_BASIC: u32 = 0;
pub const STATE_RULE_START: u32 = 1;
pub const STATE_RULE_STOP: u32 = 2;
pub const STATE_BLOCK_START: u32 = 3;
pub const STATE_STAR_BLOCK_START: u32 = 4;
pub const STATE_PLUS_BLOCK_START: u32 = 5;
pub const STATE_BLOCK_END: u32 = 6;
pub const STATE_STAR_LOOP_ENTRY: u32 = 7;
pub const STATE_STAR_LOOP_BACK: u32 = 8;
pub const STATE_PLUS_LOOP_BACK: u32 = 9;
pub const STATE_LOOP_END: u32 = 10;
pub const STATE_TOKEN_START: u32 = 11;

pub const EDGE_EPSILON: u32 = 1;
pub const EDGE_RANGE: u32 = 2;
pub const EDGE_RULE: u32 = 3;
pub const EDGE_PREDICATE: u32 = 4;
pub const EDGE_ATOM: u32 = 5;
pub const EDGE_ACTION: u32 = 6;
pub const EDGE_SET: u32 = 7;
pub const EDGE_NOT_SET: u32 = 8;
pub const EDGE_WILDCARD: u32 = 9;
pub const EDGE_PRECEDENCE: u32 = 10;

pub const ACTION_SKIP: u32 = 0;
pub const ACTION_MORE: u32 = 1;
pub const ACTION_POP_MODE: u32 = 2;
pub const ACTION_MODE: u32 = 3;
pub const ACTION_PUSH_MODE: u32 = 4;
pub const ACTION_CHANNEL: u32 = 5;
pub const ACTION_TYPE: u32 = 6;
pub const ACTION_CUSTOM: u32 = 7;

/// Cursor over the little-endian word stream of a serialized automaton.
struct WordReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> WordReader<'a> {
    fn new(data: &'a [u8]) -> WordReader<'a> {
        WordReader { data, offset: 0 }
    }

    fn error(&self, what: &str) -> RecognitionError {
        RecognitionError::Deserialize {
            message: format!("truncated automaton, expected {} at byte {}", what, self.offset),
        }
    }

    fn word(&mut self, what: &str) -> Result<u32, RecognitionError> {
        let bytes: [u8; 4] = self
            .data
            .get(self.offset..self.offset + 4)
            .ok_or_else(|| self.error(what))?
            .try_into()
            .map_err(|_| self.error(what))?;
        self.offset += 4;
        Ok(u32::from_le_bytes(bytes))
    }

    fn signed(&mut self, what: &str) -> Result<i32, RecognitionError> {
        Ok(self.word(what)? as i32)
    }

    fn index(&mut self, what: &str) -> Result<usize, RecognitionError> {
        Ok(self.word(what)? as usize)
    }

    fn flag(&mut self, what: &str) -> Result<bool, RecognitionError> {
        Ok(self.word(what)? != 0)
    }

    fn bytes(&mut self, n: usize, what: &str) -> Result<&'a [u8], RecognitionError> {
        let slice = self
            .data
            .get(self.offset..self.offset + n)
            .ok_or_else(|| self.error(what))?;
        self.offset += n;
        Ok(slice)
    }
}

/// Reads the byte sequence the offline tool emits and materializes the
/// automaton.
///
/// Layout, all multi-byte values little endian: version word, 16-byte
/// layout UUID, grammar type, max token type, state table, non-greedy
/// state list, rule table, mode table, set table, edge table, decision
/// table and (for lexer grammars) the lexer action table. Indices within
/// the tables are the identity generated recognizers use, so they are
/// preserved exactly. Follow links out of rule stop states are not
/// serialized; they are reconstructed here from the rule transitions.
pub struct AtnDeserializer;

impl AtnDeserializer {
    #[allow(clippy::new_without_default)]
    pub fn new() -> AtnDeserializer {
        AtnDeserializer
    }

    pub fn deserialize(&self, data: &[u8]) -> Result<Atn, RecognitionError> {
        let mut r = WordReader::new(data);
        let version = r.word("version")?;
        if version != SERIALIZED_VERSION {
            return Err(RecognitionError::Deserialize {
                message: format!(
                    "serialized automaton version {} is not supported (expected {})",
                    version, SERIALIZED_VERSION
                ),
            });
        }
        let uuid = r.bytes(16, "uuid")?;
        if uuid != SERIALIZED_UUID {
            return Err(RecognitionError::Deserialize {
                message: "serialized automaton layout fingerprint does not match".to_string(),
            });
        }
        let grammar_type = match r.word("grammar type")? {
            0 => GrammarType::Lexer,
            1 => GrammarType::Parser,
            other => {
                return Err(RecognitionError::Deserialize {
                    message: format!("unknown grammar type {}", other),
                })
            }
        };
        let max_token_type = r.signed("max token type")?;

        let mut atn = Atn {
            grammar_type,
            max_token_type,
            states: Vec::new(),
            decision_to_state: Vec::new(),
            rule_to_start_state: Vec::new(),
            rule_to_stop_state: Vec::new(),
            rule_to_token_type: Vec::new(),
            rule_to_bypass_token_type: Vec::new(),
            mode_to_start_state: Vec::new(),
            lexer_actions: Vec::new(),
        };

        self.read_states(&mut r, &mut atn)?;
        self.read_rules(&mut r, &mut atn)?;
        self.read_modes(&mut r, &mut atn)?;
        let sets = self.read_sets(&mut r)?;
        self.read_edges(&mut r, &mut atn, &sets)?;
        self.read_decisions(&mut r, &mut atn)?;
        if grammar_type == GrammarType::Lexer {
            self.read_lexer_actions(&mut r, &mut atn)?;
        }
        self.link_block_ends(&mut atn);
        self.link_loop_backs(&mut atn);
        self.add_follow_links(&mut atn);
        self.mark_precedence_decisions(&mut atn);
        self.verify(&atn)?;
        Ok(atn)
    }

    fn read_states(&self, r: &mut WordReader, atn: &mut Atn) -> Result<(), RecognitionError> {
        let nstates = r.index("state count")?;
        for number in 0..nstates {
            let kind_word = r.word("state kind")?;
            let rule_index = r.index("state rule")?;
            let kind = match kind_word {
                STATE_BASIC => AtnStateKind::Basic,
                STATE_RULE_START => AtnStateKind::RuleStart {
                    stop_state: 0,
                    left_recursive: false,
                },
                STATE_RULE_STOP => AtnStateKind::RuleStop,
                STATE_BLOCK_START => AtnStateKind::BlockStart {
                    end_state: r.index("block end")?,
                    decision: 0,
                    non_greedy: false,
                },
                STATE_STAR_BLOCK_START => AtnStateKind::StarBlockStart {
                    end_state: r.index("block end")?,
                    decision: 0,
                    non_greedy: false,
                },
                STATE_PLUS_BLOCK_START => AtnStateKind::PlusBlockStart {
                    end_state: r.index("block end")?,
                    loop_back: 0,
                    decision: 0,
                    non_greedy: false,
                },
                STATE_BLOCK_END => AtnStateKind::BlockEnd { start_state: 0 },
                STATE_STAR_LOOP_ENTRY => AtnStateKind::StarLoopEntry {
                    loop_back: 0,
                    precedence_decision: false,
                    decision: 0,
                    non_greedy: false,
                },
                STATE_STAR_LOOP_BACK => AtnStateKind::StarLoopBack,
                STATE_PLUS_LOOP_BACK => AtnStateKind::PlusLoopBack {
                    decision: 0,
                    non_greedy: false,
                },
                STATE_LOOP_END => AtnStateKind::LoopEnd {
                    loop_back: r.index("loop back")?,
                },
                STATE_TOKEN_START => AtnStateKind::TokenStart {
                    decision: 0,
                    non_greedy: false,
                },
                other => {
                    return Err(RecognitionError::Deserialize {
                        message: format!("unknown state kind {}", other),
                    })
                }
            };
            atn.states.push(AtnState {
                state_number: number,
                rule_index,
                kind,
                transitions: Vec::new(),
            });
        }
        let non_greedy = r.index("non-greedy count")?;
        for _ in 0..non_greedy {
            let state = r.index("non-greedy state")?;
            self.set_non_greedy(atn, state)?;
        }
        Ok(())
    }

    fn set_non_greedy(&self, atn: &mut Atn, state: usize) -> Result<(), RecognitionError> {
        let state_ref = atn.states.get_mut(state).ok_or_else(|| {
            RecognitionError::Deserialize {
                message: format!("non-greedy list names unknown state {}", state),
            }
        })?;
        match &mut state_ref.kind {
            AtnStateKind::BlockStart { non_greedy, .. }
            | AtnStateKind::StarBlockStart { non_greedy, .. }
            | AtnStateKind::PlusBlockStart { non_greedy, .. }
            | AtnStateKind::StarLoopEntry { non_greedy, .. }
            | AtnStateKind::PlusLoopBack { non_greedy, .. }
            | AtnStateKind::TokenStart { non_greedy, .. } => {
                *non_greedy = true;
                Ok(())
            }
            _ => Err(RecognitionError::Deserialize {
                message: format!("non-greedy list names non-decision state {}", state),
            }),
        }
    }

    fn read_rules(&self, r: &mut WordReader, atn: &mut Atn) -> Result<(), RecognitionError> {
        let nrules = r.index("rule count")?;
        for rule in 0..nrules {
            let start = r.index("rule start state")?;
            let stop = r.index("rule stop state")?;
            let token_type = r.signed("rule token type")?;
            let bypass = r.signed("rule bypass token type")?;
            let left_recursive = r.flag("rule left-recursive flag")?;
            atn.rule_to_start_state.push(start);
            atn.rule_to_stop_state.push(stop);
            atn.rule_to_token_type.push(token_type);
            atn.rule_to_bypass_token_type.push(bypass);
            let state = atn.states.get_mut(start).ok_or_else(|| {
                RecognitionError::Deserialize {
                    message: format!("rule {} starts at unknown state {}", rule, start),
                }
            })?;
            match &mut state.kind {
                AtnStateKind::RuleStart {
                    stop_state,
                    left_recursive: lr,
                } => {
                    *stop_state = stop;
                    *lr = left_recursive;
                }
                _ => {
                    return Err(RecognitionError::Deserialize {
                        message: format!("rule {} start state {} is not a rule start", rule, start),
                    })
                }
            }
        }
        Ok(())
    }

    fn read_modes(&self, r: &mut WordReader, atn: &mut Atn) -> Result<(), RecognitionError> {
        let nmodes = r.index("mode count")?;
        for _ in 0..nmodes {
            atn.mode_to_start_state.push(r.index("mode start state")?);
        }
        Ok(())
    }

    fn read_sets(&self, r: &mut WordReader) -> Result<Vec<IntervalSet>, RecognitionError> {
        let nsets = r.index("set count")?;
        let mut sets = Vec::with_capacity(nsets);
        for _ in 0..nsets {
            let nintervals = r.index("interval count")?;
            let mut set = IntervalSet::new();
            for _ in 0..nintervals {
                let lo = r.signed("interval low")?;
                let hi = r.signed("interval high")?;
                set.add_range(lo, hi);
            }
            sets.push(set);
        }
        Ok(sets)
    }

    fn read_edges(
        &self,
        r: &mut WordReader,
        atn: &mut Atn,
        sets: &[IntervalSet],
    ) -> Result<(), RecognitionError> {
        let nedges = r.index("edge count")?;
        for _ in 0..nedges {
            let src = r.index("edge source")?;
            let target = r.index("edge target")?;
            let kind = r.word("edge kind")?;
            let arg1 = r.word("edge arg1")?;
            let arg2 = r.word("edge arg2")?;
            let arg3 = r.word("edge arg3")?;
            let label = match kind {
                EDGE_EPSILON => TransitionKind::Epsilon {
                    outermost_precedence_return: None,
                },
                EDGE_RANGE => TransitionKind::Range(arg1 as i32, arg2 as i32),
                EDGE_RULE => TransitionKind::Rule {
                    rule_index: arg1 as usize,
                    precedence: arg2 as i32,
                    follow_state: arg3 as usize,
                },
                EDGE_PREDICATE => TransitionKind::Predicate {
                    rule_index: arg1 as usize,
                    pred_index: arg2 as usize,
                    is_ctx_dependent: arg3 != 0,
                },
                EDGE_ATOM => TransitionKind::Atom(arg1 as i32),
                EDGE_ACTION => TransitionKind::Action {
                    rule_index: arg1 as usize,
                    action_index: arg2 as usize,
                    is_ctx_dependent: arg3 != 0,
                },
                EDGE_SET | EDGE_NOT_SET => {
                    // a missing set collapses to the invalid token type
                    let set = if arg1 == NONE_WORD {
                        IntervalSet::of_one(token::INVALID_TYPE)
                    } else {
                        sets.get(arg1 as usize)
                            .cloned()
                            .ok_or_else(|| RecognitionError::Deserialize {
                                message: format!("edge names unknown set {}", arg1),
                            })?
                    };
                    if kind == EDGE_SET {
                        TransitionKind::Set(set)
                    } else {
                        TransitionKind::NotSet(set)
                    }
                }
                EDGE_WILDCARD => TransitionKind::Wildcard,
                EDGE_PRECEDENCE => TransitionKind::Precedence(arg1 as i32),
                other => {
                    return Err(RecognitionError::Deserialize {
                        message: format!("unknown edge kind {}", other),
                    })
                }
            };
            let src_state = atn.states.get_mut(src).ok_or_else(|| {
                RecognitionError::Deserialize {
                    message: format!("edge leaves unknown state {}", src),
                }
            })?;
            src_state.transitions.push(Transition { target, label });
        }
        Ok(())
    }

    fn read_decisions(&self, r: &mut WordReader, atn: &mut Atn) -> Result<(), RecognitionError> {
        let ndecisions = r.index("decision count")?;
        for decision_index in 0..ndecisions {
            let state = r.index("decision state")?;
            atn.decision_to_state.push(state);
            let state_ref = atn.states.get_mut(state).ok_or_else(|| {
                RecognitionError::Deserialize {
                    message: format!("decision {} names unknown state {}", decision_index, state),
                }
            })?;
            match &mut state_ref.kind {
                AtnStateKind::BlockStart { decision, .. }
                | AtnStateKind::StarBlockStart { decision, .. }
                | AtnStateKind::PlusBlockStart { decision, .. }
                | AtnStateKind::StarLoopEntry { decision, .. }
                | AtnStateKind::PlusLoopBack { decision, .. }
                | AtnStateKind::TokenStart { decision, .. } => *decision = decision_index,
                _ => {
                    return Err(RecognitionError::Deserialize {
                        message: format!(
                            "decision {} names non-decision state {}",
                            decision_index, state
                        ),
                    })
                }
            }
        }
        Ok(())
    }

    fn read_lexer_actions(&self, r: &mut WordReader, atn: &mut Atn) -> Result<(), RecognitionError> {
        let nactions = r.index("lexer action count")?;
        for _ in 0..nactions {
            let kind = r.word("lexer action kind")?;
            let data1 = r.word("lexer action data1")?;
            let data2 = r.word("lexer action data2")?;
            let action = match kind {
                ACTION_SKIP => LexerAction::Skip,
                ACTION_MORE => LexerAction::More,
                ACTION_POP_MODE => LexerAction::PopMode,
                ACTION_MODE => LexerAction::Mode(data1 as usize),
                ACTION_PUSH_MODE => LexerAction::PushMode(data1 as usize),
                ACTION_CHANNEL => LexerAction::Channel(data1 as usize),
                ACTION_TYPE => LexerAction::Type(data1 as i32),
                ACTION_CUSTOM => LexerAction::Custom {
                    rule_index: data1 as usize,
                    action_index: data2 as usize,
                },
                other => {
                    return Err(RecognitionError::Deserialize {
                        message: format!("unknown lexer action kind {}", other),
                    })
                }
            };
            atn.lexer_actions.push(action);
        }
        Ok(())
    }

    /// Points every block end back at its block start.
    fn link_block_ends(&self, atn: &mut Atn) {
        let mut pairs = Vec::new();
        for state in &atn.states {
            match state.kind {
                AtnStateKind::BlockStart { end_state, .. }
                | AtnStateKind::StarBlockStart { end_state, .. }
                | AtnStateKind::PlusBlockStart { end_state, .. } => {
                    pairs.push((end_state, state.state_number));
                }
                _ => {}
            }
        }
        for (end, start) in pairs {
            if let AtnStateKind::BlockEnd { start_state } = &mut atn.states[end].kind {
                *start_state = start;
            }
        }
    }

    /// Wires loop-back states into the entries/blocks they serve.
    fn link_loop_backs(&self, atn: &mut Atn) {
        let mut star_links = Vec::new();
        let mut plus_links = Vec::new();
        for state in &atn.states {
            match state.kind {
                AtnStateKind::StarLoopBack => {
                    for t in &state.transitions {
                        star_links.push((t.target, state.state_number));
                    }
                }
                AtnStateKind::PlusLoopBack { .. } => {
                    for t in &state.transitions {
                        plus_links.push((t.target, state.state_number));
                    }
                }
                _ => {}
            }
        }
        for (entry, back) in star_links {
            if let AtnStateKind::StarLoopEntry { loop_back, .. } = &mut atn.states[entry].kind {
                *loop_back = back;
            }
        }
        for (block, back) in plus_links {
            if let AtnStateKind::PlusBlockStart { loop_back, .. } = &mut atn.states[block].kind {
                *loop_back = back;
            }
        }
    }

    /// Synthesizes the epsilon edges from each rule's stop state to every
    /// site that invoked the rule.
    fn add_follow_links(&self, atn: &mut Atn) {
        let mut links = Vec::new();
        for state in &atn.states {
            for t in &state.transitions {
                if let TransitionKind::Rule {
                    rule_index,
                    follow_state,
                    ..
                } = t.label
                {
                    let stop = atn.rule_to_stop_state[rule_index];
                    let left_recursive = matches!(
                        atn.states[atn.rule_to_start_state[rule_index]].kind,
                        AtnStateKind::RuleStart {
                            left_recursive: true,
                            ..
                        }
                    );
                    let outermost = left_recursive.then_some(rule_index);
                    links.push((stop, follow_state, outermost));
                }
            }
        }
        for (stop, follow, outermost) in links {
            atn.states[stop].transitions.push(Transition {
                target: follow,
                label: TransitionKind::Epsilon {
                    outermost_precedence_return: outermost,
                },
            });
        }
    }

    /// Marks the star loop entry implementing each left-recursive rule.
    ///
    /// That entry is recognized by its loop-end neighbour falling straight
    /// through to the rule stop state.
    fn mark_precedence_decisions(&self, atn: &mut Atn) {
        let mut marks = Vec::new();
        for state in &atn.states {
            if let AtnStateKind::StarLoopEntry { .. } = state.kind {
                let rule_start = atn.rule_to_start_state[state.rule_index];
                let left_recursive = matches!(
                    atn.states[rule_start].kind,
                    AtnStateKind::RuleStart {
                        left_recursive: true,
                        ..
                    }
                );
                if !left_recursive {
                    continue;
                }
                let Some(last) = state.transitions.last() else {
                    continue;
                };
                let maybe_loop_end = &atn.states[last.target];
                if matches!(maybe_loop_end.kind, AtnStateKind::LoopEnd { .. })
                    && maybe_loop_end.only_epsilon_transitions()
                    && maybe_loop_end
                        .transitions
                        .first()
                        .map(|t| atn.states[t.target].is_rule_stop())
                        .unwrap_or(false)
                {
                    marks.push(state.state_number);
                }
            }
        }
        for state in marks {
            if let AtnStateKind::StarLoopEntry {
                precedence_decision,
                ..
            } = &mut atn.states[state].kind
            {
                *precedence_decision = true;
            }
        }
    }

    /// Structural invariants every automaton must satisfy.
    fn verify(&self, atn: &Atn) -> Result<(), RecognitionError> {
        let check = |cond: bool, message: String| {
            if cond {
                Ok(())
            } else {
                Err(RecognitionError::Deserialize { message })
            }
        };
        for (rule, (&start, &stop)) in atn
            .rule_to_start_state
            .iter()
            .zip(atn.rule_to_stop_state.iter())
            .enumerate()
        {
            check(
                matches!(atn.states[start].kind, AtnStateKind::RuleStart { .. }),
                format!("rule {} start is not a rule start state", rule),
            )?;
            check(
                atn.states[stop].is_rule_stop(),
                format!("rule {} stop is not a rule stop state", rule),
            )?;
        }
        for state in &atn.states {
            for t in &state.transitions {
                check(
                    t.target < atn.states.len(),
                    format!("state {} has an edge to nowhere", state.state_number),
                )?;
            }
            // a token start over a single rule is the one decision state
            // allowed a lone alternative
            if state.is_decision() && !matches!(state.kind, AtnStateKind::TokenStart { .. }) {
                check(
                    state.transitions.len() >= 2,
                    format!(
                        "decision state {} has fewer than two alternatives",
                        state.state_number
                    ),
                )?;
            }
            match state.kind {
                AtnStateKind::StarLoopEntry { loop_back, .. } => check(
                    matches!(atn.states[loop_back].kind, AtnStateKind::StarLoopBack),
                    format!("star loop entry {} lost its loop back", state.state_number),
                )?,
                AtnStateKind::BlockEnd { start_state } => check(
                    matches!(
                        atn.states[start_state].kind,
                        AtnStateKind::BlockStart { .. }
                            | AtnStateKind::StarBlockStart { .. }
                            | AtnStateKind::PlusBlockStart { .. }
                    ),
                    format!("block end {} lost its block start", state.state_number),
                )?,
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod blob {
    //! Byte-level writer mirroring the reader, for tests that need
    //! serialized automata.

    use super::*;

    #[derive(Default)]
    pub(crate) struct AtnBlob {
        bytes: Vec<u8>,
    }

    impl AtnBlob {
        pub fn new() -> AtnBlob {
            let mut blob = AtnBlob::default();
            blob.word(SERIALIZED_VERSION);
            blob.bytes(&SERIALIZED_UUID);
            blob
        }

        pub fn word(&mut self, w: u32) -> &mut Self {
            self.bytes.extend(w.to_le_bytes());
            self
        }

        pub fn signed(&mut self, w: i32) -> &mut Self {
            self.word(w as u32)
        }

        pub fn bytes(&mut self, b: &[u8]) -> &mut Self {
            self.bytes.extend_from_slice(b);
            self
        }

        pub fn finish(self) -> Vec<u8> {
            self.bytes
        }
    }
}
