use crate::stream::{CharStream, IntStream};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// One lexer command attached to a rule by the grammar author.
///
/// `Custom` stands for an embedded action; the runtime only records its
/// coordinates and hands them to the host through [LexerActionSink].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LexerAction {
    Skip,
    More,
    PopMode,
    Mode(usize),
    PushMode(usize),
    Channel(usize),
    Type(i32),
    Custom {
        rule_index: usize,
        action_index: usize,
    },
}

impl LexerAction {
    /// Whether replaying the action needs the input positioned where the
    /// action originally fired. Only embedded actions observe the stream.
    pub fn is_position_dependent(&self) -> bool {
        matches!(self, LexerAction::Custom { .. })
    }
}

/// Mutations a lexer exposes to replayed actions.
pub trait LexerActionSink {
    fn skip(&mut self);
    fn more(&mut self);
    fn set_type(&mut self, token_type: i32);
    fn set_channel(&mut self, channel: usize);
    fn set_mode(&mut self, mode: usize);
    fn push_mode(&mut self, mode: usize);
    fn pop_mode(&mut self);
    fn custom_action(&mut self, rule_index: usize, action_index: usize);
}

/// An action paired with the token-relative offset it must replay at, for
/// position-dependent actions matched mid-token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct IndexedAction {
    offset: Option<usize>,
    action: LexerAction,
}

/// The ordered list of actions to run when a token is accepted.
///
/// Executors are immutable and shared between configurations and DFA
/// states; growing one (another action transition crossed during closure)
/// builds a new executor. The hash is precomputed since executors take
/// part in configuration equality.
#[derive(Debug, Clone)]
pub struct LexerActionExecutor {
    actions: Vec<IndexedAction>,
    hash: u64,
}

impl LexerActionExecutor {
    fn from_actions(actions: Vec<IndexedAction>) -> Arc<LexerActionExecutor> {
        let mut hasher = rustc_hash::FxHasher::default();
        actions.hash(&mut hasher);
        Arc::new(LexerActionExecutor {
            hash: hasher.finish(),
            actions,
        })
    }

    /// Extends `previous` (possibly absent) with one more action.
    pub fn append(
        previous: Option<&Arc<LexerActionExecutor>>,
        action: LexerAction,
    ) -> Arc<LexerActionExecutor> {
        let mut actions = previous.map(|e| e.actions.clone()).unwrap_or_default();
        actions.push(IndexedAction {
            offset: None,
            action,
        });
        LexerActionExecutor::from_actions(actions)
    }

    /// Pins every position-dependent action without an offset to `offset`
    /// (characters from the token start). Called when a configuration
    /// crosses an action transition before the token's end is known.
    pub fn fix_offset_before_match(self: &Arc<Self>, offset: usize) -> Arc<LexerActionExecutor> {
        if self
            .actions
            .iter()
            .all(|a| !a.action.is_position_dependent() || a.offset.is_some())
        {
            return self.clone();
        }
        let actions = self
            .actions
            .iter()
            .map(|a| {
                if a.action.is_position_dependent() && a.offset.is_none() {
                    IndexedAction {
                        offset: Some(offset),
                        action: a.action.clone(),
                    }
                } else {
                    a.clone()
                }
            })
            .collect();
        LexerActionExecutor::from_actions(actions)
    }

    /// Replays the actions against the lexer.
    ///
    /// `start_index` is the char index of the token start; the input is
    /// seeked for position-dependent actions and always restored.
    pub fn execute(
        &self,
        input: &mut dyn CharStream,
        sink: &mut dyn LexerActionSink,
        start_index: usize,
    ) {
        let saved_index = input.index();
        for indexed in &self.actions {
            if let Some(offset) = indexed.offset {
                input.seek(start_index + offset);
            }
            match &indexed.action {
                LexerAction::Skip => sink.skip(),
                LexerAction::More => sink.more(),
                LexerAction::PopMode => sink.pop_mode(),
                LexerAction::Mode(mode) => sink.set_mode(*mode),
                LexerAction::PushMode(mode) => sink.push_mode(*mode),
                LexerAction::Channel(channel) => sink.set_channel(*channel),
                LexerAction::Type(token_type) => sink.set_type(*token_type),
                LexerAction::Custom {
                    rule_index,
                    action_index,
                } => sink.custom_action(*rule_index, *action_index),
            }
        }
        input.seek(saved_index);
    }
}

impl PartialEq for LexerActionExecutor {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.actions == other.actions
    }
}

impl Eq for LexerActionExecutor {}

impl Hash for LexerActionExecutor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}
