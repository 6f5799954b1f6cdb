//! Interval nodes and endpoint comparisons.
//!
//! A [`RangeNode`] holds the ordered, disjoint intervals of *one* key part of
//! one index. Each interval may link to the node describing the next key part
//! (`next_key_part`), which restricts the following column only for keys
//! whose current column falls inside that interval:
//!
//! ```text
//!   part 0:   [1,1] ──────────── [5,9]
//!               │                  │
//!   part 1:   [2,2] ── (7,+inf)   [0,3]
//! ```
//!
//! reads as `(kp0 = 1 AND (kp1 = 2 OR kp1 > 7)) OR (kp0 BETWEEN 5 AND 9 AND kp1 <= 3)`.
//!
//! Endpoints are `std::ops::Bound` values over [`ScalarValue`] in key order,
//! so NULL (the smallest key) is represented by `Included(Null)` /
//! `Excluded(Null)` and "no bound" by `Unbounded`.

use crate::expr::ScalarValue;
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;
use std::ops::Bound;

/// Handle of a node inside a [`RangeArena`](super::RangeArena).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a node says about its key part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// No key can satisfy the condition.
    Impossible,
    /// The key part is compared with a value unknown while optimizing. The
    /// node carries a single unbounded interval whose `next_key_part` still
    /// applies.
    MaybeKey,
    /// Ordinary interval list.
    KeyRange,
}

/// One interval of a key part.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Interval {
    pub min: Bound<ScalarValue>,
    pub max: Bound<ScalarValue>,
    /// Condition on the following key part, owned (one reference) by this interval.
    #[serde(skip)]
    pub next_key_part: Option<NodeId>,
}

impl Interval {
    pub fn new(min: Bound<ScalarValue>, max: Bound<ScalarValue>) -> Self {
        Self {
            min,
            max,
            next_key_part: None,
        }
    }

    pub fn point(value: ScalarValue) -> Self {
        Self::new(Bound::Included(value.clone()), Bound::Included(value))
    }

    pub fn full() -> Self {
        Self::new(Bound::Unbounded, Bound::Unbounded)
    }

    /// `[v, v]`: exactly one key value.
    pub fn is_singlepoint(&self) -> bool {
        match (&self.min, &self.max) {
            (Bound::Included(a), Bound::Included(b)) => a.key_cmp(b) == Ordering::Equal,
            _ => false,
        }
    }

    pub fn point_value(&self) -> Option<&ScalarValue> {
        match &self.min {
            Bound::Included(v) if self.is_singlepoint() => Some(v),
            _ => None,
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(
            (&self.min, &self.max),
            (Bound::Unbounded, Bound::Unbounded)
        )
    }

    pub fn is_empty(&self) -> bool {
        cmp_min_to_max(&self.min, &self.max) == Ordering::Greater
    }

    /// Whether `value` falls inside the interval.
    pub fn contains(&self, value: &ScalarValue) -> bool {
        let above_min = match &self.min {
            Bound::Unbounded => true,
            Bound::Included(m) => value.key_cmp(m) != Ordering::Less,
            Bound::Excluded(m) => value.key_cmp(m) == Ordering::Greater,
        };
        let below_max = match &self.max {
            Bound::Unbounded => true,
            Bound::Included(m) => value.key_cmp(m) != Ordering::Greater,
            Bound::Excluded(m) => value.key_cmp(m) == Ordering::Less,
        };
        above_min && below_max
    }

    /// Whether the two intervals share at least one key.
    pub fn overlaps(&self, other: &Interval) -> bool {
        cmp_min_to_max(&self.min, &other.max) != Ordering::Greater
            && cmp_min_to_max(&other.min, &self.max) != Ordering::Greater
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.min {
            Bound::Unbounded => write!(f, "(-inf")?,
            Bound::Included(v) => write!(f, "[{v}")?,
            Bound::Excluded(v) => write!(f, "({v}")?,
        }
        write!(f, ", ")?;
        match &self.max {
            Bound::Unbounded => write!(f, "+inf)"),
            Bound::Included(v) => write!(f, "{v}]"),
            Bound::Excluded(v) => write!(f, "{v})"),
        }
    }
}

/// Compare two lower bounds: `Less` means `a` admits smaller keys than `b`.
pub fn cmp_min_to_min(a: &Bound<ScalarValue>, b: &Bound<ScalarValue>) -> Ordering {
    match (a, b) {
        (Bound::Unbounded, Bound::Unbounded) => Ordering::Equal,
        (Bound::Unbounded, _) => Ordering::Less,
        (_, Bound::Unbounded) => Ordering::Greater,
        (Bound::Included(x), Bound::Included(y)) | (Bound::Excluded(x), Bound::Excluded(y)) => {
            x.key_cmp(y)
        }
        (Bound::Included(x), Bound::Excluded(y)) => x.key_cmp(y).then(Ordering::Less),
        (Bound::Excluded(x), Bound::Included(y)) => x.key_cmp(y).then(Ordering::Greater),
    }
}

/// Compare two upper bounds: `Greater` means `a` admits larger keys than `b`.
pub fn cmp_max_to_max(a: &Bound<ScalarValue>, b: &Bound<ScalarValue>) -> Ordering {
    match (a, b) {
        (Bound::Unbounded, Bound::Unbounded) => Ordering::Equal,
        (Bound::Unbounded, _) => Ordering::Greater,
        (_, Bound::Unbounded) => Ordering::Less,
        (Bound::Included(x), Bound::Included(y)) | (Bound::Excluded(x), Bound::Excluded(y)) => {
            x.key_cmp(y)
        }
        (Bound::Included(x), Bound::Excluded(y)) => x.key_cmp(y).then(Ordering::Greater),
        (Bound::Excluded(x), Bound::Included(y)) => x.key_cmp(y).then(Ordering::Less),
    }
}

/// Compare a lower bound with an upper bound.
///
/// `Greater` means no key lies between them (the lower bound is past the
/// upper one); `Equal` means they meet in exactly one key.
pub fn cmp_min_to_max(min: &Bound<ScalarValue>, max: &Bound<ScalarValue>) -> Ordering {
    match (min, max) {
        (Bound::Unbounded, _) | (_, Bound::Unbounded) => Ordering::Less,
        (Bound::Included(x), Bound::Included(y)) => x.key_cmp(y),
        (Bound::Included(x), Bound::Excluded(y))
        | (Bound::Excluded(x), Bound::Included(y))
        | (Bound::Excluded(x), Bound::Excluded(y)) => x.key_cmp(y).then(Ordering::Greater),
    }
}

/// Whether an interval ending at `prev_max` and one starting at `next_min`
/// leave no key in between, so their union is a single interval.
pub fn touches(prev_max: &Bound<ScalarValue>, next_min: &Bound<ScalarValue>) -> bool {
    match (prev_max, next_min) {
        (Bound::Unbounded, _) | (_, Bound::Unbounded) => true,
        (Bound::Included(a), Bound::Included(b))
        | (Bound::Included(a), Bound::Excluded(b))
        | (Bound::Excluded(a), Bound::Included(b)) => a.key_cmp(b) != Ordering::Less,
        (Bound::Excluded(a), Bound::Excluded(b)) => a.key_cmp(b) == Ordering::Greater,
    }
}

/// The upper bound ending just before lower bound `min` starts.
pub(crate) fn max_before(min: &Bound<ScalarValue>) -> Bound<ScalarValue> {
    match min {
        Bound::Included(v) => Bound::Excluded(v.clone()),
        Bound::Excluded(v) => Bound::Included(v.clone()),
        Bound::Unbounded => Bound::Unbounded,
    }
}

/// The lower bound starting just after upper bound `max` ends.
pub(crate) fn min_after(max: &Bound<ScalarValue>) -> Bound<ScalarValue> {
    match max {
        Bound::Included(v) => Bound::Excluded(v.clone()),
        Bound::Excluded(v) => Bound::Included(v.clone()),
        Bound::Unbounded => Bound::Unbounded,
    }
}

/// The interval list of one key part of one index.
#[derive(Debug, Clone)]
pub struct RangeNode {
    pub kind: NodeKind,
    /// Key part number within the index, 0-based.
    pub part: u16,
    /// Sorted, pairwise disjoint intervals.
    pub intervals: Vec<Interval>,
    /// Number of owners: parent intervals, tree slots and in-flight results.
    pub use_count: u32,
    /// Intervals reachable from this node, counting shared subgraphs once per link.
    pub weight: u32,
    /// Highest key part reachable from this node.
    pub max_part: u16,
}

impl RangeNode {
    pub fn elements(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_impossible(&self) -> bool {
        self.kind == NodeKind::Impossible
    }

    pub fn is_maybe(&self) -> bool {
        self.kind == NodeKind::MaybeKey
    }

    /// Position of the interval containing `value`, if any.
    pub fn find(&self, value: &ScalarValue) -> Option<usize> {
        // First interval whose max is not below the value.
        let pos = self.intervals.partition_point(|iv| match &iv.max {
            Bound::Unbounded => false,
            Bound::Included(m) => m.key_cmp(value) == Ordering::Less,
            Bound::Excluded(m) => m.key_cmp(value) != Ordering::Greater,
        });
        self.intervals
            .get(pos)
            .filter(|iv| iv.contains(value))
            .map(|_| pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inc(v: i64) -> Bound<ScalarValue> {
        Bound::Included(ScalarValue::Int64(v))
    }

    fn exc(v: i64) -> Bound<ScalarValue> {
        Bound::Excluded(ScalarValue::Int64(v))
    }

    #[test]
    fn test_min_comparisons() {
        assert_eq!(cmp_min_to_min(&Bound::Unbounded, &inc(0)), Ordering::Less);
        assert_eq!(cmp_min_to_min(&inc(3), &exc(3)), Ordering::Less);
        assert_eq!(cmp_min_to_min(&exc(3), &inc(4)), Ordering::Less);
        assert_eq!(cmp_min_to_min(&exc(3), &exc(3)), Ordering::Equal);
    }

    #[test]
    fn test_max_comparisons() {
        assert_eq!(cmp_max_to_max(&inc(3), &exc(3)), Ordering::Greater);
        assert_eq!(cmp_max_to_max(&Bound::Unbounded, &inc(9)), Ordering::Greater);
        assert_eq!(cmp_max_to_max(&exc(3), &inc(2)), Ordering::Greater);
    }

    #[test]
    fn test_min_to_max_emptiness() {
        assert_eq!(cmp_min_to_max(&inc(3), &inc(3)), Ordering::Equal);
        assert_eq!(cmp_min_to_max(&inc(3), &exc(3)), Ordering::Greater);
        assert_eq!(cmp_min_to_max(&exc(2), &inc(3)), Ordering::Less);
        assert!(Interval::new(exc(5), exc(5)).is_empty());
    }

    #[test]
    fn test_touching_endpoints() {
        assert!(touches(&inc(3), &exc(3)));
        assert!(touches(&exc(3), &inc(3)));
        assert!(!touches(&exc(3), &exc(3)));
        assert!(!touches(&inc(2), &inc(3)));
    }

    #[test]
    fn test_find_interval() {
        let node = RangeNode {
            kind: NodeKind::KeyRange,
            part: 0,
            intervals: vec![
                Interval::new(Bound::Unbounded, exc(2)),
                Interval::point(ScalarValue::Int64(5)),
                Interval::new(exc(7), Bound::Unbounded),
            ],
            use_count: 1,
            weight: 3,
            max_part: 0,
        };
        assert_eq!(node.find(&ScalarValue::Int64(1)), Some(0));
        assert_eq!(node.find(&ScalarValue::Int64(2)), None);
        assert_eq!(node.find(&ScalarValue::Int64(5)), Some(1));
        assert_eq!(node.find(&ScalarValue::Int64(7)), None);
        assert_eq!(node.find(&ScalarValue::Int64(100)), Some(2));
    }
}
