use crate::atn::config_set::AtnConfigSet;
use crate::atn::lexer_action::LexerActionExecutor;
use crate::atn::semantic_context::SemanticContext;
use crate::atn::INVALID_ALT;
use fnv::FnvHashMap;
use std::fmt::Write;
use std::sync::{Arc, RwLock};

/// Outcome cached on a DFA edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DfaEdge {
    /// The symbol is known to kill the simulation from this state.
    Error,
    State(usize),
}

/// A (predicate, alternative) pair on a predicated accept state; the
/// prediction is the first pair whose predicate passes at match time.
#[derive(Debug, Clone)]
pub struct PredPrediction {
    pub pred: Arc<SemanticContext>,
    pub alt: u32,
}

/// One memoized prediction state: an immutable configuration set plus the
/// verdict reached for it.
#[derive(Debug)]
pub struct DfaState {
    pub configs: Arc<AtnConfigSet>,
    /// Lazily grown transition cache, indexed by `symbol + 1` so EOF (-1)
    /// lands on slot 0.
    edges: Vec<Option<DfaEdge>>,
    pub is_accept: bool,
    pub prediction: u32,
    /// Context-free lookahead was not enough; full-context prediction must
    /// finish this decision.
    pub requires_full_context: bool,
    pub predicates: Option<Arc<Vec<PredPrediction>>>,
    pub lexer_executor: Option<Arc<LexerActionExecutor>>,
}

impl DfaState {
    pub fn new(configs: Arc<AtnConfigSet>) -> DfaState {
        DfaState {
            configs,
            edges: Vec::new(),
            is_accept: false,
            prediction: INVALID_ALT,
            requires_full_context: false,
            predicates: None,
            lexer_executor: None,
        }
    }
}

/// Cheap copy of a DFA state's verdict, handed out so simulators never
/// hold the cache lock across a closure computation.
#[derive(Debug, Clone)]
pub struct DfaStateView {
    pub index: usize,
    pub configs: Arc<AtnConfigSet>,
    pub is_accept: bool,
    pub prediction: u32,
    pub requires_full_context: bool,
    pub predicates: Option<Arc<Vec<PredPrediction>>>,
    pub lexer_executor: Option<Arc<LexerActionExecutor>>,
}

#[derive(Default)]
struct DfaCore {
    states: Vec<DfaState>,
    /// Structural config-set hash to candidate state indices.
    index: FnvHashMap<u64, Vec<usize>>,
    s0: Option<usize>,
    /// For precedence DFAs, one start state per precedence level.
    s0_by_precedence: Vec<Option<usize>>,
}

/// The memoization cache for one decision.
///
/// States accumulate monotonically for the lifetime of the grammar's
/// shared caches; the only mutations are appending states, appending
/// edges and publishing start states. A single reader/writer lock guards
/// the whole decision, writers are rare once the cache is warm.
pub struct Dfa {
    pub decision: usize,
    pub atn_start_state: usize,
    precedence_dfa: bool,
    core: RwLock<DfaCore>,
}

impl Dfa {
    pub fn new(decision: usize, atn_start_state: usize, precedence_dfa: bool) -> Dfa {
        Dfa {
            decision,
            atn_start_state,
            precedence_dfa,
            core: RwLock::new(DfaCore::default()),
        }
    }

    pub fn is_precedence_dfa(&self) -> bool {
        self.precedence_dfa
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, DfaCore> {
        self.core.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, DfaCore> {
        self.core.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn s0(&self) -> Option<usize> {
        self.read().s0
    }

    pub fn set_s0(&self, state: usize) {
        if self.precedence_dfa {
            panic!("plain start state on a precedence DFA");
        }
        self.write().s0 = Some(state);
    }

    pub fn precedence_s0(&self, precedence: i32) -> Option<usize> {
        if precedence < 0 {
            return None;
        }
        self.read()
            .s0_by_precedence
            .get(precedence as usize)
            .copied()
            .flatten()
    }

    pub fn set_precedence_s0(&self, precedence: i32, state: usize) {
        if !self.precedence_dfa {
            panic!("precedence start state on a plain DFA");
        }
        if precedence < 0 {
            return;
        }
        let mut core = self.write();
        let slot = precedence as usize;
        if core.s0_by_precedence.len() <= slot {
            core.s0_by_precedence.resize(slot + 1, None);
        }
        core.s0_by_precedence[slot] = Some(state);
    }

    /// Publishes a state, or returns the index of the structurally equal
    /// state already in the cache. The configuration set must be frozen.
    pub fn add_state(&self, state: DfaState) -> usize {
        let hash = state.configs.frozen_hash();
        let mut core = self.write();
        if let Some(candidates) = core.index.get(&hash) {
            for &i in candidates {
                if core.states[i].configs == state.configs {
                    return i;
                }
            }
        }
        let i = core.states.len();
        core.states.push(state);
        core.index.entry(hash).or_default().push(i);
        i
    }

    pub fn num_states(&self) -> usize {
        self.read().states.len()
    }

    pub fn view(&self, state: usize) -> DfaStateView {
        let core = self.read();
        let s = &core.states[state];
        DfaStateView {
            index: state,
            configs: s.configs.clone(),
            is_accept: s.is_accept,
            prediction: s.prediction,
            requires_full_context: s.requires_full_context,
            predicates: s.predicates.clone(),
            lexer_executor: s.lexer_executor.clone(),
        }
    }

    pub fn edge(&self, from: usize, symbol: i32) -> Option<DfaEdge> {
        let slot = (symbol + 1) as usize;
        self.read().states[from].edges.get(slot).copied().flatten()
    }

    pub fn set_edge(&self, from: usize, symbol: i32, edge: DfaEdge) {
        if symbol < -1 {
            return;
        }
        let slot = (symbol + 1) as usize;
        let mut core = self.write();
        let edges = &mut core.states[from].edges;
        if edges.len() <= slot {
            edges.resize(slot + 1, None);
        }
        edges[slot] = Some(edge);
    }

    /// Graphviz dump of the cached states and edges.
    pub fn to_dot(&self) -> String {
        let core = self.read();
        let mut f = String::new();
        write!(&mut f, "digraph{{start[shape=point];").unwrap();
        for (i, state) in core.states.iter().enumerate() {
            if state.is_accept {
                write!(&mut f, "{}[shape=doublecircle;xlabel=\"ACC({})\"];", i, state.prediction)
                    .unwrap();
            }
        }
        if let Some(s0) = core.s0 {
            write!(&mut f, "start->{};", s0).unwrap();
        }
        for (i, state) in core.states.iter().enumerate() {
            for (slot, edge) in state.edges.iter().enumerate() {
                if let Some(DfaEdge::State(target)) = edge {
                    let symbol = slot as i32 - 1;
                    write!(&mut f, "{}->{}[label=\"{}\"];", i, target, symbol).unwrap();
                }
            }
        }
        write!(&mut f, "}}").unwrap();
        f
    }
}

impl std::fmt::Display for Dfa {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.read();
        let edges = core.states.iter().map(|s| s.edges.iter().flatten().count()).sum::<usize>();
        write!(f, "DFA({},{})", core.states.len(), edges)
    }
}
