/// Builds an `FxHashSet` from a list of elements, sized up front.
///
/// The simulators allocate many short-lived scratch sets (closure-busy
/// sets, visited-state sets); this keeps those construction sites terse.
#[macro_export]
macro_rules! fxhashset {
    (@single $($x:tt)*) => (());
    (@count $($rest:expr),*) => (<[()]>::len(&[$(fxhashset!(@single $rest)),*]));

    ($($key:expr,)+) => { fxhashset!($($key),+) };
    ($($key:expr),*) => {
        {
            let _cap = fxhashset!(@count $($key),*);
            let _h = ::std::hash::BuildHasherDefault::<rustc_hash::FxHasher>::default();
            let mut _set = ::std::collections::HashSet::with_capacity_and_hasher(_cap, _h);
            $(
                let _ = _set.insert($key);
            )*
            _set
        }
    };
}

#[cfg(test)]
mod tests {
    use rustc_hash::FxHashSet;

    #[test]
    fn empty_invocation_builds_empty_set() {
        let set: FxHashSet<usize> = fxhashset![];
        assert!(set.is_empty());
    }

    #[test]
    fn elements_are_deduplicated() {
        let set: FxHashSet<i32> = fxhashset![3, 1, 3];
        assert_eq!(set.len(), 2);
        assert!(set.contains(&1) && set.contains(&3));
    }

    #[test]
    fn trailing_comma_is_accepted() {
        let set: FxHashSet<&str> = fxhashset!["a", "b",];
        assert_eq!(set.len(), 2);
    }
}
