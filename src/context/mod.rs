use crate::atn::transition::TransitionKind;
use crate::atn::Atn;
use rustc_hash::FxHashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, OnceLock};

/// Sentinel return state marking the root of every context chain.
pub const EMPTY_RETURN_STATE: i32 = 0x7FFF_FFFF;

/// An immutable summary of parser call stacks, shared as a DAG.
///
/// A node lists the return states the parser would pop back to, paired with
/// the context that was current at the call site. A `Singleton` tracks one
/// call site; merging two contexts produces an `Array` whose return states
/// are kept sorted so structurally equal stacks are value equal. The shared
/// `Empty` node is the root: its only return state is [EMPTY_RETURN_STATE].
///
/// Hashes are computed once at construction, equality short-circuits on
/// them, and nodes are only ever built through the constructors here, so a
/// context can be shared freely between recognizers and threads.
#[derive(Debug)]
pub enum PredictionContext {
    Empty,
    Singleton {
        parent: Arc<PredictionContext>,
        return_state: i32,
        hash: u64,
    },
    Array {
        parents: Vec<Arc<PredictionContext>>,
        return_states: Vec<i32>,
        hash: u64,
    },
}

static EMPTY_CONTEXT: OnceLock<Arc<PredictionContext>> = OnceLock::new();

/// The shared root context.
pub fn empty_context() -> Arc<PredictionContext> {
    EMPTY_CONTEXT
        .get_or_init(|| Arc::new(PredictionContext::Empty))
        .clone()
}

const EMPTY_HASH: u64 = 0x9E37_79B9_7F4A_7C15;

fn singleton_hash(parent: &Arc<PredictionContext>, return_state: i32) -> u64 {
    let mut hasher = rustc_hash::FxHasher::default();
    hasher.write_u64(parent.cached_hash());
    hasher.write_i32(return_state);
    hasher.finish()
}

fn array_hash(parents: &[Arc<PredictionContext>], return_states: &[i32]) -> u64 {
    let mut hasher = rustc_hash::FxHasher::default();
    for parent in parents {
        hasher.write_u64(parent.cached_hash());
    }
    for rs in return_states {
        hasher.write_i32(*rs);
    }
    hasher.finish()
}

impl PredictionContext {
    /// Builds a context recording a call that will return to `return_state`.
    ///
    /// Reduces to the shared [empty_context] when the arguments describe it.
    pub fn singleton(parent: Arc<PredictionContext>, return_state: i32) -> Arc<PredictionContext> {
        if return_state == EMPTY_RETURN_STATE && parent.is_empty() {
            return empty_context();
        }
        let hash = singleton_hash(&parent, return_state);
        Arc::new(PredictionContext::Singleton {
            parent,
            return_state,
            hash,
        })
    }

    /// Builds an array context. `return_states` must be sorted ascending and
    /// aligned with `parents`; single-entry arrays reduce to singletons.
    fn array(
        parents: Vec<Arc<PredictionContext>>,
        return_states: Vec<i32>,
    ) -> Arc<PredictionContext> {
        debug_assert_eq!(parents.len(), return_states.len());
        debug_assert!(return_states.windows(2).all(|w| w[0] <= w[1]));
        if return_states.len() == 1 {
            return PredictionContext::singleton(parents.into_iter().next().unwrap(), return_states[0]);
        }
        let hash = array_hash(&parents, &return_states);
        Arc::new(PredictionContext::Array {
            parents,
            return_states,
            hash,
        })
    }

    /// Converts the parser's live invocation chain into a context.
    ///
    /// `invoking_states`, ordered from the start rule down to the current
    /// rule, holds the states whose rule transition was taken for each
    /// nested invocation; the recorded return states are those transitions'
    /// follow states.
    pub fn from_rule_invocations(atn: &Atn, invoking_states: &[usize]) -> Arc<PredictionContext> {
        let mut context = empty_context();
        for &state in invoking_states {
            let follow = atn.states[state]
                .transitions
                .iter()
                .find_map(|t| match t.label {
                    TransitionKind::Rule { follow_state, .. } => Some(follow_state),
                    _ => None,
                })
                .unwrap_or_else(|| panic!("state {} is not a rule invocation site", state));
            context = PredictionContext::singleton(context, follow as i32);
        }
        context
    }

    /// Number of (parent, return state) pairs. The empty context reports 1.
    pub fn len(&self) -> usize {
        match self {
            PredictionContext::Empty => 1,
            PredictionContext::Singleton { .. } => 1,
            PredictionContext::Array { return_states, .. } => return_states.len(),
        }
    }

    pub fn return_state(&self, i: usize) -> i32 {
        match self {
            PredictionContext::Empty => EMPTY_RETURN_STATE,
            PredictionContext::Singleton { return_state, .. } => {
                debug_assert_eq!(i, 0);
                *return_state
            }
            PredictionContext::Array { return_states, .. } => return_states[i],
        }
    }

    /// Parent at slot `i`. The empty context has no parents.
    pub fn parent(&self, i: usize) -> &Arc<PredictionContext> {
        match self {
            PredictionContext::Empty => panic!("the empty context has no parent"),
            PredictionContext::Singleton { parent, .. } => {
                debug_assert_eq!(i, 0);
                parent
            }
            PredictionContext::Array { parents, .. } => &parents[i],
        }
    }

    /// True only for the shared root node.
    pub fn is_empty(&self) -> bool {
        matches!(self, PredictionContext::Empty)
    }

    /// True when some path ends at the root, i.e. the stack may be empty.
    pub fn has_empty_path(&self) -> bool {
        self.return_state(self.len() - 1) == EMPTY_RETURN_STATE
    }

    pub fn cached_hash(&self) -> u64 {
        match self {
            PredictionContext::Empty => EMPTY_HASH,
            PredictionContext::Singleton { hash, .. } => *hash,
            PredictionContext::Array { hash, .. } => *hash,
        }
    }
}

impl PartialEq for PredictionContext {
    fn eq(&self, other: &Self) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        if self.cached_hash() != other.cached_hash() {
            return false;
        }
        match (self, other) {
            (PredictionContext::Empty, PredictionContext::Empty) => true,
            (
                PredictionContext::Singleton {
                    parent: pa,
                    return_state: ra,
                    ..
                },
                PredictionContext::Singleton {
                    parent: pb,
                    return_state: rb,
                    ..
                },
            ) => ra == rb && (Arc::ptr_eq(pa, pb) || pa == pb),
            (
                PredictionContext::Array {
                    parents: pa,
                    return_states: ra,
                    ..
                },
                PredictionContext::Array {
                    parents: pb,
                    return_states: rb,
                    ..
                },
            ) => {
                ra == rb
                    && pa
                        .iter()
                        .zip(pb.iter())
                        .all(|(x, y)| Arc::ptr_eq(x, y) || x == y)
            }
            _ => false,
        }
    }
}

impl Eq for PredictionContext {}

impl Hash for PredictionContext {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.cached_hash());
    }
}

impl std::fmt::Display for PredictionContext {
    /// Prints return-state chains as `[2 7 $]` style paths, parents first.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PredictionContext::Empty => write!(f, "$"),
            PredictionContext::Singleton {
                parent,
                return_state,
                ..
            } => {
                if parent.is_empty() {
                    write!(f, "{} $", return_state)
                } else {
                    write!(f, "{} {}", return_state, parent)
                }
            }
            PredictionContext::Array {
                parents,
                return_states,
                ..
            } => {
                write!(f, "[")?;
                for (i, rs) in return_states.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    if *rs == EMPTY_RETURN_STATE {
                        write!(f, "$")?;
                    } else {
                        write!(f, "{} {}", rs, parents[i])?;
                    }
                }
                write!(f, "]")
            }
        }
    }
}

/// Hashes and compares an `Arc` by the address of its target.
#[derive(Clone)]
struct ByIdentity(Arc<PredictionContext>);

impl PartialEq for ByIdentity {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for ByIdentity {}

impl Hash for ByIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_usize(Arc::as_ptr(&self.0) as usize);
    }
}

/// Memoizes merge results for the duration of one prediction.
///
/// Deep merges revisit the same pairs of sub-contexts over and over; the
/// cache both bounds the work and preserves sharing in the merged DAG. Keys
/// hold strong references, so node addresses stay valid for the cache's
/// lifetime.
#[derive(Default)]
pub struct MergeCache {
    map: FxHashMap<(ByIdentity, ByIdentity), Arc<PredictionContext>>,
}

impl MergeCache {
    pub fn new() -> MergeCache {
        MergeCache::default()
    }

    fn get(
        &self,
        a: &Arc<PredictionContext>,
        b: &Arc<PredictionContext>,
    ) -> Option<Arc<PredictionContext>> {
        let key = (ByIdentity(a.clone()), ByIdentity(b.clone()));
        if let Some(hit) = self.map.get(&key) {
            return Some(hit.clone());
        }
        let mirrored = (ByIdentity(b.clone()), ByIdentity(a.clone()));
        self.map.get(&mirrored).cloned()
    }

    fn put(
        &mut self,
        a: &Arc<PredictionContext>,
        b: &Arc<PredictionContext>,
        merged: Arc<PredictionContext>,
    ) {
        self.map
            .insert((ByIdentity(a.clone()), ByIdentity(b.clone())), merged);
    }
}

/// Merges two contexts, preserving the set of root-to-leaf paths of both.
///
/// `root_is_wildcard` selects the local-context interpretation used by SLL
/// prediction, where the root stands for "any caller" and absorbs the other
/// operand; with it false (full-context mode) the root is a real empty
/// stack and survives as an explicit path.
pub fn merge(
    a: &Arc<PredictionContext>,
    b: &Arc<PredictionContext>,
    root_is_wildcard: bool,
    cache: &mut MergeCache,
) -> Arc<PredictionContext> {
    if Arc::ptr_eq(a, b) || a == b {
        return a.clone();
    }
    // root handling, both interpretations
    if root_is_wildcard {
        if a.is_empty() {
            return a.clone();
        }
        if b.is_empty() {
            return b.clone();
        }
    } else if a.is_empty() && b.is_empty() {
        return a.clone();
    }
    if let Some(hit) = cache.get(a, b) {
        return hit;
    }
    let merged = match (&**a, &**b) {
        (
            PredictionContext::Singleton { .. } | PredictionContext::Empty,
            PredictionContext::Singleton { .. } | PredictionContext::Empty,
        ) => merge_singletons(a, b, root_is_wildcard, cache),
        _ => merge_arrays(a, b, root_is_wildcard, cache),
    };
    cache.put(a, b, merged.clone());
    merged
}

/// Singleton x singleton merge; either operand may be the root (full-context
/// mode only, the wildcard cases were peeled off by [merge]).
fn merge_singletons(
    a: &Arc<PredictionContext>,
    b: &Arc<PredictionContext>,
    root_is_wildcard: bool,
    cache: &mut MergeCache,
) -> Arc<PredictionContext> {
    if a.is_empty() || b.is_empty() {
        // full context: the empty stack becomes an explicit $ path
        let other = if a.is_empty() { b } else { a };
        let parents = vec![other.parent(0).clone(), empty_context()];
        let states = vec![other.return_state(0), EMPTY_RETURN_STATE];
        return PredictionContext::array(parents, states);
    }
    let (ra, rb) = (a.return_state(0), b.return_state(0));
    if ra == rb {
        // same call site, merge what was underneath it
        let parent = merge(a.parent(0), b.parent(0), root_is_wildcard, cache);
        if Arc::ptr_eq(&parent, a.parent(0)) {
            return a.clone();
        }
        if Arc::ptr_eq(&parent, b.parent(0)) {
            return b.clone();
        }
        return PredictionContext::singleton(parent, ra);
    }
    // distinct call sites, interleave sorted
    let shared_parent = if a.parent(0) == b.parent(0) {
        Some(a.parent(0).clone())
    } else {
        None
    };
    let (first, second) = if ra <= rb { (a, b) } else { (b, a) };
    let parents = match shared_parent {
        Some(p) => vec![p.clone(), p],
        None => vec![first.parent(0).clone(), second.parent(0).clone()],
    };
    let states = vec![first.return_state(0), second.return_state(0)];
    PredictionContext::array(parents, states)
}

/// Pairwise merge of sorted parallel arrays; singleton operands are viewed
/// as one-element arrays.
fn merge_arrays(
    a: &Arc<PredictionContext>,
    b: &Arc<PredictionContext>,
    root_is_wildcard: bool,
    cache: &mut MergeCache,
) -> Arc<PredictionContext> {
    let mut parents = Vec::with_capacity(a.len() + b.len());
    let mut states = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        let (ra, rb) = (a.return_state(i), b.return_state(j));
        if ra == rb {
            let pa = slot_parent(a, i);
            let pb = slot_parent(b, j);
            let parent = if pa == pb {
                pa
            } else {
                merge(&pa, &pb, root_is_wildcard, cache)
            };
            parents.push(parent);
            states.push(ra);
            i += 1;
            j += 1;
        } else if ra < rb {
            parents.push(slot_parent(a, i));
            states.push(ra);
            i += 1;
        } else {
            parents.push(slot_parent(b, j));
            states.push(rb);
            j += 1;
        }
    }
    while i < a.len() {
        parents.push(slot_parent(a, i));
        states.push(a.return_state(i));
        i += 1;
    }
    while j < b.len() {
        parents.push(slot_parent(b, j));
        states.push(b.return_state(j));
        j += 1;
    }
    let merged = PredictionContext::array(parents, states);
    // degenerate merges collapse back onto an operand, keep that identity
    if *merged == **a {
        return a.clone();
    }
    if *merged == **b {
        return b.clone();
    }
    merged
}

/// Parent at slot `i`, with the root's phantom slot mapped to the root.
fn slot_parent(ctx: &Arc<PredictionContext>, i: usize) -> Arc<PredictionContext> {
    if ctx.is_empty() {
        empty_context()
    } else {
        ctx.parent(i).clone()
    }
}

/// Process-wide hash-consing cache shared by every recognizer of a grammar.
///
/// Interning contexts when DFA states are published keeps the steady-state
/// graph small: structurally equal stacks collapse onto one allocation, and
/// later equality checks succeed on pointer identity. Insert-only.
#[derive(Default)]
pub struct PredictionContextCache {
    map: Mutex<FxHashMap<Arc<PredictionContext>, Arc<PredictionContext>>>,
}

impl PredictionContextCache {
    pub fn new() -> PredictionContextCache {
        PredictionContextCache::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FxHashMap<Arc<PredictionContext>, Arc<PredictionContext>>> {
        // a poisoned cache still holds only valid interned nodes
        self.map.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns the canonical node for `context`, rebuilding it over
    /// canonical parents and interning every node not seen before.
    pub fn canonicalize(&self, context: &Arc<PredictionContext>) -> Arc<PredictionContext> {
        let mut visited = FxHashMap::default();
        self.canonicalize_rec(context, &mut visited)
    }

    fn canonicalize_rec(
        &self,
        context: &Arc<PredictionContext>,
        visited: &mut FxHashMap<ByIdentity, Arc<PredictionContext>>,
    ) -> Arc<PredictionContext> {
        if context.is_empty() {
            return context.clone();
        }
        let key = ByIdentity(context.clone());
        if let Some(hit) = visited.get(&key) {
            return hit.clone();
        }
        if let Some(hit) = self.lock().get(context) {
            visited.insert(key, hit.clone());
            return hit.clone();
        }
        let mut changed = false;
        let mut parents = Vec::with_capacity(context.len());
        for i in 0..context.len() {
            let parent = self.canonicalize_rec(context.parent(i), visited);
            changed |= !Arc::ptr_eq(&parent, context.parent(i));
            parents.push(parent);
        }
        let updated = if !changed {
            context.clone()
        } else {
            let states = (0..context.len()).map(|i| context.return_state(i)).collect();
            PredictionContext::array(parents, states)
        };
        let interned = {
            let mut map = self.lock();
            match map.get(&updated) {
                Some(existing) => existing.clone(),
                None => {
                    map.insert(updated.clone(), updated.clone());
                    updated
                }
            }
        };
        visited.insert(key, interned.clone());
        interned
    }
}

#[cfg(test)]
mod tests {
    use super::{
        empty_context, merge, MergeCache, PredictionContext, PredictionContextCache,
        EMPTY_RETURN_STATE,
    };
    use proptest::prelude::*;
    use std::sync::Arc;

    fn chain(states: &[i32]) -> Arc<PredictionContext> {
        let mut ctx = empty_context();
        for s in states.iter().rev() {
            ctx = PredictionContext::singleton(ctx, *s);
        }
        ctx
    }

    #[test]
    fn singleton_of_root_sentinel_is_empty() {
        let ctx = PredictionContext::singleton(empty_context(), EMPTY_RETURN_STATE);
        assert!(ctx.is_empty());
        assert!(Arc::ptr_eq(&ctx, &empty_context()));
    }

    #[test]
    fn empty_path_detection() {
        assert!(empty_context().has_empty_path());
        let ctx = chain(&[7]);
        assert!(!ctx.is_empty());
        assert!(ctx.parent(0).has_empty_path());
    }

    #[test]
    fn merge_identical_returns_identity() {
        let a = chain(&[3, 9]);
        let mut cache = MergeCache::new();
        let merged = merge(&a, &a, true, &mut cache);
        assert!(Arc::ptr_eq(&a, &merged));
        // structurally equal but distinct allocations also short-circuit
        let b = chain(&[3, 9]);
        let merged = merge(&a, &b, true, &mut cache);
        assert!(Arc::ptr_eq(&a, &merged));
    }

    #[test]
    fn merge_with_root_wildcard_absorbs() {
        let a = chain(&[5]);
        let mut cache = MergeCache::new();
        let merged = merge(&a, &empty_context(), true, &mut cache);
        assert!(merged.is_empty());
        let merged = merge(&empty_context(), &a, true, &mut cache);
        assert!(merged.is_empty());
    }

    #[test]
    fn merge_with_root_full_context_keeps_both_paths() {
        let a = chain(&[5]);
        let mut cache = MergeCache::new();
        let merged = merge(&a, &empty_context(), false, &mut cache);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.return_state(0), 5);
        assert_eq!(merged.return_state(1), EMPTY_RETURN_STATE);
        assert!(merged.has_empty_path());
    }

    #[test]
    fn merge_same_return_state_merges_parents() {
        let a = chain(&[7, 2]);
        let b = chain(&[7, 4]);
        let mut cache = MergeCache::new();
        let merged = merge(&a, &b, true, &mut cache);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged.return_state(0), 7);
        let parent = merged.parent(0);
        assert_eq!(parent.len(), 2);
        assert_eq!(parent.return_state(0), 2);
        assert_eq!(parent.return_state(1), 4);
    }

    #[test]
    fn merge_interleaves_sorted() {
        let a = chain(&[9]);
        let b = chain(&[3]);
        let mut cache = MergeCache::new();
        let merged = merge(&a, &b, true, &mut cache);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.return_state(0), 3);
        assert_eq!(merged.return_state(1), 9);
    }

    #[test]
    fn merge_arrays_dedups_common_entries() {
        let mut cache = MergeCache::new();
        let ab = merge(&chain(&[1]), &chain(&[2]), true, &mut cache);
        let bc = merge(&chain(&[2]), &chain(&[3]), true, &mut cache);
        let merged = merge(&ab, &bc, true, &mut cache);
        assert_eq!(merged.len(), 3);
        assert_eq!(
            (0..3).map(|i| merged.return_state(i)).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn cache_interns_structural_duplicates() {
        let cache = PredictionContextCache::new();
        let a = cache.canonicalize(&chain(&[4, 8]));
        let b = cache.canonicalize(&chain(&[4, 8]));
        assert!(Arc::ptr_eq(&a, &b));
        // the parent chain was interned too
        let parent = cache.canonicalize(&chain(&[8]));
        assert!(Arc::ptr_eq(a.parent(0), &parent));
    }

    fn small_chain() -> impl Strategy<Value = Vec<i32>> {
        prop::collection::vec(1i32..6, 0..4)
    }

    proptest! {
        #[test]
        fn merge_is_commutative(x in small_chain(), y in small_chain()) {
            let a = chain(&x);
            let b = chain(&y);
            let ab = merge(&a, &b, true, &mut MergeCache::new());
            let ba = merge(&b, &a, true, &mut MergeCache::new());
            prop_assert_eq!(ab, ba);
        }

        #[test]
        fn merge_is_associative(x in small_chain(), y in small_chain(), z in small_chain()) {
            let a = chain(&x);
            let b = chain(&y);
            let c = chain(&z);
            let left = merge(&merge(&a, &b, true, &mut MergeCache::new()), &c, true, &mut MergeCache::new());
            let right = merge(&a, &merge(&b, &c, true, &mut MergeCache::new()), true, &mut MergeCache::new());
            prop_assert_eq!(left, right);
        }

        #[test]
        fn merge_is_idempotent(x in small_chain(), y in small_chain()) {
            let a = chain(&x);
            let b = chain(&y);
            let ab = merge(&a, &b, true, &mut MergeCache::new());
            let again = merge(&ab, &b, true, &mut MergeCache::new());
            prop_assert_eq!(ab, again);
        }
    }
}
