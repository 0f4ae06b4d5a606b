use std::fmt::Write;

/// Largest Unicode scalar value, upper bound of the lexer symbol universe.
pub const MAX_CHAR: i32 = 0x10FFFF;

/// A closed range of integers, `a..=b`.
///
/// Symbols are `i32` so the same type covers token types (small positives,
/// with -1 for EOF) and Unicode scalar values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Interval {
    pub a: i32,
    pub b: i32,
}

impl Interval {
    pub fn new(a: i32, b: i32) -> Interval {
        Interval { a, b }
    }

    pub fn contains(&self, v: i32) -> bool {
        self.a <= v && v <= self.b
    }

    /// Number of elements in the range. Empty ranges report 0.
    pub fn length(&self) -> usize {
        if self.b < self.a {
            0
        } else {
            (self.b - self.a + 1) as usize
        }
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.a == self.b {
            write!(f, "{}", self.a)
        } else {
            write!(f, "{}..{}", self.a, self.b)
        }
    }
}

/// An ordered set of integers stored as sorted, disjoint, non-adjacent
/// closed ranges.
///
/// This is the representation used for every symbol set in the runtime:
/// transition labels, expected-token sets and lookahead sets. After any
/// mutation the ranges are renormalized so overlapping or touching ranges
/// collapse into one, which keeps equality structural.
/// # Examples
/// Basic usage:
/// ```
/// use tarpan::interval::IntervalSet;
///
/// let mut set = IntervalSet::new();
/// set.add_range(10, 12);
/// set.add_one(13);
///
/// assert!(set.contains(11));
/// assert_eq!(set.size(), 4);
/// assert_eq!(set.to_string(), "{10..13}");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct IntervalSet {
    intervals: Vec<Interval>,
}

impl IntervalSet {
    pub fn new() -> IntervalSet {
        IntervalSet {
            intervals: Vec::new(),
        }
    }

    /// Builds a set holding the single range `a..=b`.
    pub fn of(a: i32, b: i32) -> IntervalSet {
        let mut set = IntervalSet::new();
        set.add_range(a, b);
        set
    }

    /// Builds a set holding only `v`.
    pub fn of_one(v: i32) -> IntervalSet {
        IntervalSet::of(v, v)
    }

    pub fn add_one(&mut self, v: i32) {
        self.add_range(v, v);
    }

    /// Adds `lo..=hi` to the set, merging with existing ranges.
    ///
    /// Ranges with `hi < lo` are ignored.
    pub fn add_range(&mut self, lo: i32, hi: i32) {
        if hi < lo {
            return;
        }
        // find the insertion point, then swallow every range that overlaps
        // or touches the new one
        let mut lo = lo;
        let mut hi = hi;
        let mut i = 0;
        while i < self.intervals.len() && self.intervals[i].b < lo.saturating_sub(1) {
            i += 1;
        }
        let start = i;
        while i < self.intervals.len() && self.intervals[i].a <= hi.saturating_add(1) {
            lo = lo.min(self.intervals[i].a);
            hi = hi.max(self.intervals[i].b);
            i += 1;
        }
        self.intervals.splice(start..i, [Interval::new(lo, hi)]);
    }

    /// Adds every range of `other` to this set.
    pub fn add_set(&mut self, other: &IntervalSet) {
        for iv in &other.intervals {
            self.add_range(iv.a, iv.b);
        }
    }

    pub fn contains(&self, v: i32) -> bool {
        // ranges are sorted, binary search by lower bound
        match self.intervals.binary_search_by(|iv| {
            if v < iv.a {
                std::cmp::Ordering::Greater
            } else if v > iv.b {
                std::cmp::Ordering::Less
            } else {
                std::cmp::Ordering::Equal
            }
        }) {
            Ok(_) => true,
            Err(_) => false,
        }
    }

    /// Set union, leaving both inputs untouched.
    pub fn or(&self, other: &IntervalSet) -> IntervalSet {
        let mut ret = self.clone();
        ret.add_set(other);
        ret
    }

    /// Set intersection.
    pub fn and(&self, other: &IntervalSet) -> IntervalSet {
        let mut ret = IntervalSet::new();
        let mut i = 0;
        let mut j = 0;
        while i < self.intervals.len() && j < other.intervals.len() {
            let x = self.intervals[i];
            let y = other.intervals[j];
            let lo = x.a.max(y.a);
            let hi = x.b.min(y.b);
            if lo <= hi {
                ret.add_range(lo, hi);
            }
            // advance whichever range ends first
            if x.b < y.b {
                i += 1;
            } else {
                j += 1;
            }
        }
        ret
    }

    /// Elements of `self` not in `other`.
    pub fn subtract(&self, other: &IntervalSet) -> IntervalSet {
        let mut ret = IntervalSet::new();
        for x in &self.intervals {
            let mut lo = x.a;
            for y in &other.intervals {
                if y.b < lo {
                    continue;
                }
                if y.a > x.b {
                    break;
                }
                if y.a > lo {
                    ret.add_range(lo, y.a - 1);
                }
                lo = lo.max(y.b.saturating_add(1));
            }
            if lo <= x.b {
                ret.add_range(lo, x.b);
            }
        }
        ret
    }

    /// Elements of `[min, max]` not in `self`.
    pub fn complement(&self, min: i32, max: i32) -> IntervalSet {
        IntervalSet::of(min, max).subtract(self)
    }

    /// Total number of elements across all ranges.
    pub fn size(&self) -> usize {
        self.intervals.iter().map(Interval::length).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn min_element(&self) -> Option<i32> {
        self.intervals.first().map(|iv| iv.a)
    }

    pub fn max_element(&self) -> Option<i32> {
        self.intervals.last().map(|iv| iv.b)
    }

    pub fn intervals(&self) -> &[Interval] {
        &self.intervals
    }

    /// Iterates over every element in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = i32> + '_ {
        self.intervals.iter().flat_map(|iv| iv.a..=iv.b)
    }
}

impl std::fmt::Display for IntervalSet {
    /// Prints the ranges as `{1..3, 7}`.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_char('{')?;
        for (i, iv) in self.intervals.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", iv)?;
        }
        f.write_char('}')
    }
}
