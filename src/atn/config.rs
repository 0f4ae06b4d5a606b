use crate::atn::lexer_action::LexerActionExecutor;
use crate::atn::semantic_context::SemanticContext;
use crate::context::PredictionContext;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// One thread of an ATN simulation: a state, the alternative it is working
/// for, the predicted call stack and the predicates collected on the way.
///
/// Lexer simulations additionally carry the action executor accumulated so
/// far and whether the path crossed a non-greedy decision.
#[derive(Debug, Clone)]
pub struct AtnConfig {
    pub state: usize,
    pub alt: u32,
    pub context: Arc<PredictionContext>,
    pub semantic_context: Arc<SemanticContext>,
    /// How many times the closure fell off the end of the decision rule
    /// into callers the seed context does not know. Excluded from equality;
    /// colliding set members keep the maximum.
    pub reaches_into_outer_context: u32,
    pub precedence_filter_suppressed: bool,
    pub lexer_executor: Option<Arc<LexerActionExecutor>>,
    pub passed_through_non_greedy: bool,
}

impl AtnConfig {
    pub fn new(state: usize, alt: u32, context: Arc<PredictionContext>) -> AtnConfig {
        AtnConfig {
            state,
            alt,
            context,
            semantic_context: SemanticContext::none(),
            reaches_into_outer_context: 0,
            precedence_filter_suppressed: false,
            lexer_executor: None,
            passed_through_non_greedy: false,
        }
    }

    /// Same thread, moved to another state.
    pub fn moved_to(&self, state: usize) -> AtnConfig {
        AtnConfig {
            state,
            ..self.clone()
        }
    }

    /// Moved to another state with a new stack.
    pub fn with_context(&self, state: usize, context: Arc<PredictionContext>) -> AtnConfig {
        AtnConfig {
            state,
            context,
            ..self.clone()
        }
    }

    /// Moved to another state with additional predicate obligations.
    pub fn with_semantic(&self, state: usize, semantic: Arc<SemanticContext>) -> AtnConfig {
        AtnConfig {
            state,
            semantic_context: semantic,
            ..self.clone()
        }
    }

    /// Moved to another state with a replacement action executor.
    pub fn with_executor(
        &self,
        state: usize,
        executor: Option<Arc<LexerActionExecutor>>,
    ) -> AtnConfig {
        AtnConfig {
            state,
            lexer_executor: executor,
            ..self.clone()
        }
    }

    pub fn outer_context_depth(&self) -> u32 {
        self.reaches_into_outer_context
    }
}

impl PartialEq for AtnConfig {
    fn eq(&self, other: &Self) -> bool {
        self.state == other.state
            && self.alt == other.alt
            && self.semantic_context == other.semantic_context
            && self.precedence_filter_suppressed == other.precedence_filter_suppressed
            && self.passed_through_non_greedy == other.passed_through_non_greedy
            && match (&self.lexer_executor, &other.lexer_executor) {
                (None, None) => true,
                (Some(a), Some(b)) => a == b,
                _ => false,
            }
            && (Arc::ptr_eq(&self.context, &other.context) || self.context == other.context)
    }
}

impl Eq for AtnConfig {}

impl Hash for AtnConfig {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_usize(self.state);
        state.write_u32(self.alt);
        self.semantic_context.hash(state);
        state.write_u64(self.context.cached_hash());
        state.write_u8(self.passed_through_non_greedy as u8);
        if let Some(executor) = &self.lexer_executor {
            executor.hash(state);
        }
    }
}

impl std::fmt::Display for AtnConfig {
    /// Prints as `(state,alt,[stack])`, with predicate and outer-context
    /// markers when set.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{},[{}]", self.state, self.alt, self.context)?;
        if !self.semantic_context.is_none() {
            write!(f, ",{}", self.semantic_context)?;
        }
        if self.reaches_into_outer_context > 0 {
            write!(f, ",up={}", self.reaches_into_outer_context)?;
        }
        write!(f, ")")
    }
}
