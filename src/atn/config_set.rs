use crate::atn::config::AtnConfig;
use crate::atn::semantic_context::SemanticContext;
use crate::atn::INVALID_ALT;
use crate::context::{merge, MergeCache, PredictionContextCache};
use crate::support::BitSet;
use fnv::FnvHashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A set of [AtnConfig] with merge-on-insert semantics.
///
/// Two structures cooperate: `configs` preserves insertion order so every
/// iteration over the set is deterministic, and `lookup` indexes configs by
/// their dedup key. In the parser's merged mode the key is (state, alt,
/// semantic context) and a collision merges the prediction contexts; in the
/// lexer's ordered mode the key is the whole configuration and collisions
/// are dropped, because lexer configs differing in stack or executor must
/// stay distinct.
#[derive(Debug, Default)]
pub struct AtnConfigSet {
    configs: Vec<AtnConfig>,
    lookup: FnvHashMap<u64, Vec<usize>>,
    ordered: bool,
    readonly: bool,
    cached_hash: Option<u64>,
    pub full_ctx: bool,
    pub unique_alt: u32,
    pub conflicting_alts: Option<BitSet>,
    pub has_semantic_context: bool,
    pub dips_into_outer_context: bool,
}

impl AtnConfigSet {
    pub fn new(full_ctx: bool) -> AtnConfigSet {
        AtnConfigSet {
            full_ctx,
            unique_alt: INVALID_ALT,
            ..Default::default()
        }
    }

    /// Builds a set with full-configuration dedup, for lexer simulation.
    pub fn new_ordered() -> AtnConfigSet {
        AtnConfigSet {
            ordered: true,
            unique_alt: INVALID_ALT,
            ..Default::default()
        }
    }

    pub fn configs(&self) -> &[AtnConfig] {
        &self.configs
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, AtnConfig> {
        self.configs.iter()
    }

    /// Adds a configuration, merging stacks on a dedup hit.
    ///
    /// Returns false when the set already covered the configuration.
    /// Panics if the set was frozen.
    pub fn add(&mut self, config: AtnConfig, merge_cache: &mut MergeCache) -> bool {
        if self.readonly {
            panic!("cannot alter a frozen configuration set");
        }
        if !config.semantic_context.is_none() {
            self.has_semantic_context = true;
        }
        if config.outer_context_depth() > 0 {
            self.dips_into_outer_context = true;
        }
        let key = self.key_hash(&config);
        if let Some(candidates) = self.lookup.get(&key) {
            for &i in candidates {
                if self.key_eq(&self.configs[i], &config) {
                    if self.ordered {
                        return false;
                    }
                    // same thread seen through another epsilon path: union
                    // the stacks, keep the deepest outer-context escape
                    let existing = &self.configs[i];
                    let root_is_wildcard = !self.full_ctx;
                    let merged = merge(
                        &existing.context,
                        &config.context,
                        root_is_wildcard,
                        merge_cache,
                    );
                    let existing = &mut self.configs[i];
                    existing.reaches_into_outer_context = existing
                        .reaches_into_outer_context
                        .max(config.reaches_into_outer_context);
                    if config.precedence_filter_suppressed {
                        existing.precedence_filter_suppressed = true;
                    }
                    existing.context = merged;
                    return false;
                }
            }
        }
        self.lookup.entry(key).or_default().push(self.configs.len());
        self.configs.push(config);
        true
    }

    fn key_hash(&self, config: &AtnConfig) -> u64 {
        let mut hasher = fnv::FnvHasher::default();
        if self.ordered {
            config.hash(&mut hasher);
        } else {
            hasher.write_usize(config.state);
            hasher.write_u32(config.alt);
            config.semantic_context.hash(&mut hasher);
        }
        hasher.finish()
    }

    fn key_eq(&self, a: &AtnConfig, b: &AtnConfig) -> bool {
        if self.ordered {
            a == b
        } else {
            a.state == b.state && a.alt == b.alt && a.semantic_context == b.semantic_context
        }
    }

    /// The alternatives present in the set.
    pub fn alts(&self) -> BitSet {
        self.configs.iter().map(|c| c.alt as usize).collect()
    }

    /// The alternative shared by every configuration, or
    /// [INVALID_ALT](crate::atn::INVALID_ALT) when they disagree.
    pub fn unique_alt_of_configs(&self) -> u32 {
        let mut alt = INVALID_ALT;
        for config in &self.configs {
            if alt == INVALID_ALT {
                alt = config.alt;
            } else if config.alt != alt {
                return INVALID_ALT;
            }
        }
        alt
    }

    /// Replaces every stack with its canonical shared node.
    pub fn optimize_contexts(&mut self, cache: &PredictionContextCache) {
        if self.readonly {
            panic!("cannot alter a frozen configuration set");
        }
        for config in &mut self.configs {
            config.context = cache.canonicalize(&config.context);
        }
    }

    /// Strips predicate obligations, used by the conflict heuristics to
    /// compare configurations modulo semantics.
    pub fn without_predicates(&self, merge_cache: &mut MergeCache) -> AtnConfigSet {
        let mut dup = AtnConfigSet::new(self.full_ctx);
        for config in &self.configs {
            let mut stripped = config.clone();
            stripped.semantic_context = SemanticContext::none();
            dup.add(stripped, merge_cache);
        }
        dup
    }

    /// Makes the set immutable; required before it is published in a DFA
    /// state. The dedup index is dropped, iteration stays available.
    pub fn freeze(&mut self) {
        if self.readonly {
            return;
        }
        self.readonly = true;
        self.lookup.clear();
        let mut hasher = fnv::FnvHasher::default();
        for config in &self.configs {
            config.hash(&mut hasher);
        }
        hasher.write_u8(self.full_ctx as u8);
        self.cached_hash = Some(hasher.finish());
    }

    pub fn is_frozen(&self) -> bool {
        self.readonly
    }

    /// Structural hash, available once frozen.
    pub fn frozen_hash(&self) -> u64 {
        self.cached_hash
            .unwrap_or_else(|| panic!("configuration set hashed before freezing"))
    }
}

impl PartialEq for AtnConfigSet {
    fn eq(&self, other: &Self) -> bool {
        if let (Some(a), Some(b)) = (self.cached_hash, other.cached_hash) {
            if a != b {
                return false;
            }
        }
        self.full_ctx == other.full_ctx && self.configs == other.configs
    }
}

impl Eq for AtnConfigSet {}

impl std::fmt::Display for AtnConfigSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        for (i, config) in self.configs.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", config)?;
        }
        write!(f, "]")
    }
}
