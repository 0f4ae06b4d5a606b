use crate::atn::config_set::AtnConfigSet;
use crate::atn::{Atn, INVALID_ALT};
use crate::context::{MergeCache, PredictionContext};
use crate::support::BitSet;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// How eagerly prediction gives up on context-free lookahead.
///
/// `Sll` never consults the parser stack: conflicts resolve to the lowest
/// alternative immediately. `Ll` retries conflicted decisions with the
/// full stack and stops as soon as one alternative is viable.
/// `LlExactAmbigDetection` keeps simulating until the exact ambiguous set
/// is known, which costs more lookahead but gives precise reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictionMode {
    Sll,
    Ll,
    LlExactAmbigDetection,
}

/// Whether a context-free simulation must stop at this configuration set.
///
/// True when every configuration sits at a rule end (no more input can be
/// matched), or when the set has a genuine conflict: some (state, stack)
/// pair is claimed by more than one alternative and no state pins the
/// prediction down to a single alternative.
pub fn has_sll_conflict_terminating_prediction(
    mode: PredictionMode,
    configs: &AtnConfigSet,
    atn: &Atn,
) -> bool {
    if all_configs_in_rule_stop_states(configs, atn) {
        return true;
    }
    let stripped;
    let configs = if mode == PredictionMode::Sll && configs.has_semantic_context {
        // pure SLL has no later chance to discharge predicates, compare
        // configurations modulo their semantic contexts
        stripped = configs.without_predicates(&mut MergeCache::new());
        &stripped
    } else {
        configs
    };
    let altsets = conflicting_alt_subsets(configs);
    has_conflicting_alt_set(&altsets) && !has_state_associated_with_one_alt(configs)
}

pub fn has_config_in_rule_stop_state(configs: &AtnConfigSet, atn: &Atn) -> bool {
    configs.iter().any(|c| atn.states[c.state].is_rule_stop())
}

pub fn all_configs_in_rule_stop_states(configs: &AtnConfigSet, atn: &Atn) -> bool {
    configs.iter().all(|c| atn.states[c.state].is_rule_stop())
}

/// Groups configurations by (state, stack) and reports the alternative
/// set of each group. A group with more than one alternative is the
/// signature of a conflict: identical futures claimed by different alts.
pub fn conflicting_alt_subsets(configs: &AtnConfigSet) -> Vec<BitSet> {
    let mut groups: FxHashMap<(usize, Arc<PredictionContext>), BitSet> = FxHashMap::default();
    let mut order = Vec::new();
    for config in configs.iter() {
        let key = (config.state, config.context.clone());
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().insert(config.alt as usize);
    }
    order.into_iter().map(|key| groups[&key].clone()).collect()
}

/// Alternative set per ATN state, ignoring stacks.
pub fn state_to_alt_map(configs: &AtnConfigSet) -> FxHashMap<usize, BitSet> {
    let mut map: FxHashMap<usize, BitSet> = FxHashMap::default();
    for config in configs.iter() {
        map.entry(config.state)
            .or_default()
            .insert(config.alt as usize);
    }
    map
}

fn has_state_associated_with_one_alt(configs: &AtnConfigSet) -> bool {
    state_to_alt_map(configs)
        .values()
        .any(|alts| alts.cardinality() == 1)
}

fn has_conflicting_alt_set(altsets: &[BitSet]) -> bool {
    altsets.iter().any(|alts| alts.cardinality() > 1)
}

pub fn all_subsets_conflict(altsets: &[BitSet]) -> bool {
    altsets.iter().all(|alts| alts.cardinality() > 1)
}

pub fn all_subsets_equal(altsets: &[BitSet]) -> bool {
    match altsets.first() {
        None => true,
        Some(first) => altsets.iter().all(|alts| alts == first),
    }
}

/// Full-context termination test: when every group resolves to the same
/// single minimum alternative the prediction is decided, even if groups
/// still hold competing alternatives.
pub fn resolves_to_just_one_viable_alt(altsets: &[BitSet]) -> u32 {
    let mut viable = BitSet::new();
    for alts in altsets {
        if let Some(min) = alts.min() {
            viable.insert(min);
        }
    }
    if viable.cardinality() == 1 {
        viable.min().map(|a| a as u32).unwrap_or(INVALID_ALT)
    } else {
        INVALID_ALT
    }
}

/// Union of all alternative subsets.
pub fn union_alts(altsets: &[BitSet]) -> BitSet {
    let mut union = BitSet::new();
    for alts in altsets {
        union.or(alts);
    }
    union
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atn::config::AtnConfig;
    use crate::atn::samples;
    use crate::context::empty_context;

    fn set_of(entries: &[(usize, u32, i32)]) -> AtnConfigSet {
        let mut configs = AtnConfigSet::new(false);
        let mut cache = MergeCache::new();
        for &(state, alt, stack) in entries {
            let ctx = if stack < 0 {
                empty_context()
            } else {
                PredictionContext::singleton(empty_context(), stack)
            };
            configs.add(AtnConfig::new(state, alt, ctx), &mut cache);
        }
        configs
    }

    #[test]
    fn groups_by_state_and_stack() {
        let configs = set_of(&[(1, 1, -1), (1, 2, -1), (2, 1, -1), (1, 1, 5)]);
        let subsets = conflicting_alt_subsets(&configs);
        assert_eq!(subsets.len(), 3);
        assert_eq!(subsets[0].cardinality(), 2, "same state+stack, two alts");
    }

    #[test]
    fn conflict_requires_every_state_undecided() {
        // states 1 and 2 both claimed by alts 1 and 2: conflict
        let conflicted = set_of(&[(1, 1, -1), (1, 2, -1), (2, 1, -1), (2, 2, -1)]);
        let atn = samples::two_alts_shared_prefix();
        assert!(has_sll_conflict_terminating_prediction(
            PredictionMode::Ll,
            &conflicted,
            &atn
        ));
        // a state owned by a single alt keeps prediction alive
        let alive = set_of(&[(1, 1, -1), (1, 2, -1), (3, 2, -1)]);
        assert!(!has_sll_conflict_terminating_prediction(
            PredictionMode::Ll,
            &alive,
            &atn
        ));
    }

    #[test]
    fn resolves_when_minimums_agree() {
        let mut a = BitSet::new();
        a.insert(1);
        a.insert(2);
        let mut b = BitSet::new();
        b.insert(1);
        b.insert(3);
        assert_eq!(resolves_to_just_one_viable_alt(&[a.clone(), b]), 1);
        let mut c = BitSet::new();
        c.insert(2);
        assert_eq!(resolves_to_just_one_viable_alt(&[a, c]), INVALID_ALT);
    }

    #[test]
    fn subset_equality_and_union() {
        let mut a = BitSet::new();
        a.insert(1);
        a.insert(2);
        let b = a.clone();
        assert!(all_subsets_equal(&[a.clone(), b.clone()]));
        assert!(all_subsets_conflict(&[a.clone(), b]));
        let mut c = BitSet::new();
        c.insert(3);
        let union = union_alts(&[a, c]);
        assert_eq!(union.iter().collect::<Vec<_>>(), vec![1, 2, 3]);
    }
}
