//! Flattening an interval graph into the key ranges an index scan reads.
//!
//! Every root-to-leaf path through the graph becomes one [`KeyRange`].
//! Single-point intervals followed by a condition on the next key part extend
//! the key prefix; the first non-point interval (or the last key part) closes
//! the range. Its endpoints are then stretched with the first (last) interval
//! of any further key parts, which is what lets `kp0 >= 5 AND kp1 >= 3` start
//! reading at key `(5, 3)` rather than at `(5)`.
//!
//! Endpoints are expressed in *index order*: for a descending key part the
//! larger column value comes first, so the interval's bounds swap roles.

use super::arena::RangeArena;
use super::node::{Interval, NodeId, NodeKind};
use super::KeyPart;
use crate::expr::ScalarValue;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::ops::Bound;

/// Properties of a materialized key range.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RangeFlags(u16);

impl RangeFlags {
    /// No lower endpoint.
    pub const NO_MIN_RANGE: RangeFlags = RangeFlags(1);
    /// No upper endpoint.
    pub const NO_MAX_RANGE: RangeFlags = RangeFlags(1 << 1);
    /// The lower endpoint itself is excluded.
    pub const NEAR_MIN: RangeFlags = RangeFlags(1 << 2);
    /// The upper endpoint itself is excluded.
    pub const NEAR_MAX: RangeFlags = RangeFlags(1 << 3);
    /// Both endpoints are the same included key.
    pub const EQ_RANGE: RangeFlags = RangeFlags(1 << 4);
    /// Equality range with a NULL component.
    pub const NULL_RANGE: RangeFlags = RangeFlags(1 << 5);
    /// Equality on every part of a unique index: at most one row.
    pub const UNIQUE_RANGE: RangeFlags = RangeFlags(1 << 6);

    pub fn empty() -> Self {
        RangeFlags(0)
    }

    pub fn contains(self, other: RangeFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: RangeFlags) {
        self.0 |= other.0;
    }

    pub fn bits(self) -> u16 {
        self.0
    }
}

impl fmt::Debug for RangeFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(RangeFlags, &str); 7] = [
            (RangeFlags::NO_MIN_RANGE, "NO_MIN_RANGE"),
            (RangeFlags::NO_MAX_RANGE, "NO_MAX_RANGE"),
            (RangeFlags::NEAR_MIN, "NEAR_MIN"),
            (RangeFlags::NEAR_MAX, "NEAR_MAX"),
            (RangeFlags::EQ_RANGE, "EQ_RANGE"),
            (RangeFlags::NULL_RANGE, "NULL_RANGE"),
            (RangeFlags::UNIQUE_RANGE, "UNIQUE_RANGE"),
        ];
        let set: Vec<&str> = NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "{}", set.join("|"))
    }
}

/// One contiguous stretch of index keys, bounded by key prefixes.
///
/// `Included(p)` as a lower bound admits every key whose prefix is `>= p`;
/// `Excluded(p)` admits keys whose prefix is `> p`. Upper bounds mirror this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyRange {
    pub min: Bound<Vec<ScalarValue>>,
    pub max: Bound<Vec<ScalarValue>>,
    pub flags: RangeFlags,
}

impl KeyRange {
    pub fn new(min: Bound<Vec<ScalarValue>>, max: Bound<Vec<ScalarValue>>) -> Self {
        let mut flags = RangeFlags::empty();
        match &min {
            Bound::Unbounded => flags.insert(RangeFlags::NO_MIN_RANGE),
            Bound::Excluded(_) => flags.insert(RangeFlags::NEAR_MIN),
            Bound::Included(_) => {}
        }
        match &max {
            Bound::Unbounded => flags.insert(RangeFlags::NO_MAX_RANGE),
            Bound::Excluded(_) => flags.insert(RangeFlags::NEAR_MAX),
            Bound::Included(_) => {}
        }
        if let (Bound::Included(lo), Bound::Included(hi)) = (&min, &max) {
            let equal = lo.len() == hi.len()
                && lo.iter().zip(hi).all(|(a, b)| a.key_cmp(b) == Ordering::Equal);
            if equal {
                flags.insert(RangeFlags::EQ_RANGE);
                if lo.iter().any(ScalarValue::is_null) {
                    flags.insert(RangeFlags::NULL_RANGE);
                }
            }
        }
        Self { min, max, flags }
    }

    /// The range covering the whole index.
    pub fn full() -> Self {
        Self::new(Bound::Unbounded, Bound::Unbounded)
    }

    pub fn is_eq(&self) -> bool {
        self.flags.contains(RangeFlags::EQ_RANGE)
    }

    /// Whether `key` (a full index key, in index column order) lies in the
    /// range. `descending` gives the direction of each key part.
    pub fn contains(&self, key: &[ScalarValue], descending: &[bool]) -> bool {
        let above = match &self.min {
            Bound::Unbounded => true,
            Bound::Included(p) => prefix_cmp(key, p, descending) != Ordering::Less,
            Bound::Excluded(p) => prefix_cmp(key, p, descending) == Ordering::Greater,
        };
        let below = match &self.max {
            Bound::Unbounded => true,
            Bound::Included(p) => prefix_cmp(key, p, descending) != Ordering::Greater,
            Bound::Excluded(p) => prefix_cmp(key, p, descending) == Ordering::Less,
        };
        above && below
    }
}

impl fmt::Display for KeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn tuple(values: &[ScalarValue]) -> String {
            let items: Vec<String> = values.iter().map(|v| v.to_string()).collect();
            format!("({})", items.join(", "))
        }
        match &self.min {
            Bound::Unbounded => write!(f, "-inf")?,
            Bound::Included(p) => write!(f, "{} <=", tuple(p))?,
            Bound::Excluded(p) => write!(f, "{} <", tuple(p))?,
        }
        write!(f, " key ")?;
        match &self.max {
            Bound::Unbounded => write!(f, "< +inf"),
            Bound::Included(p) => write!(f, "<= {}", tuple(p)),
            Bound::Excluded(p) => write!(f, "< {}", tuple(p)),
        }
    }
}

/// Compare the leading components of `key` with `prefix` in index order.
pub fn prefix_cmp(key: &[ScalarValue], prefix: &[ScalarValue], descending: &[bool]) -> Ordering {
    for (i, p) in prefix.iter().enumerate() {
        let Some(k) = key.get(i) else {
            return Ordering::Less;
        };
        let mut c = k.key_cmp(p);
        if descending.get(i).copied().unwrap_or(false) {
            c = c.reverse();
        }
        if c != Ordering::Equal {
            return c;
        }
    }
    Ordering::Equal
}

/// Interval bounds in index order.
fn oriented(iv: &Interval, descending: bool) -> (&Bound<ScalarValue>, &Bound<ScalarValue>) {
    if descending {
        (&iv.max, &iv.min)
    } else {
        (&iv.min, &iv.max)
    }
}

impl RangeArena {
    /// Materialize the key ranges of an index graph, considering at most the
    /// first `max_parts` key parts. `unique` marks a unique index, for which
    /// full-key equality ranges are flagged `UNIQUE_RANGE`.
    pub fn key_ranges(
        &self,
        root: NodeId,
        parts: &[KeyPart],
        max_parts: usize,
        unique: bool,
    ) -> Vec<KeyRange> {
        let mut out = Vec::new();
        match self.node(root).kind {
            NodeKind::Impossible => {}
            NodeKind::MaybeKey => out.push(KeyRange::full()),
            NodeKind::KeyRange => {
                let mut prefix = Vec::new();
                self.walk(root, parts, max_parts.max(1), &mut prefix, &mut out);
            }
        }
        if unique {
            for r in &mut out {
                if r.is_eq() && !r.flags.contains(RangeFlags::NULL_RANGE) {
                    if let Bound::Included(key) = &r.min {
                        if key.len() == parts.len() {
                            r.flags.insert(RangeFlags::UNIQUE_RANGE);
                        }
                    }
                }
            }
        }
        out
    }

    /// The next-part node of `iv` if it continues the key contiguously.
    fn usable_next(&self, iv: &Interval, part: u16, max_parts: usize) -> Option<NodeId> {
        let next = iv.next_key_part?;
        let node = self.node(next);
        let contiguous = node.part == part + 1 && (node.part as usize) < max_parts;
        (contiguous && node.kind == NodeKind::KeyRange).then_some(next)
    }

    fn ordered<'a>(&self, node: &'a super::node::RangeNode, descending: bool) -> Vec<&'a Interval> {
        if descending {
            node.intervals.iter().rev().collect()
        } else {
            node.intervals.iter().collect()
        }
    }

    fn walk(
        &self,
        id: NodeId,
        parts: &[KeyPart],
        max_parts: usize,
        prefix: &mut Vec<ScalarValue>,
        out: &mut Vec<KeyRange>,
    ) {
        let node = self.node(id);
        let descending = parts.get(node.part as usize).is_some_and(|p| p.descending);
        for iv in self.ordered(node, descending) {
            let next = self.usable_next(iv, node.part, max_parts);
            if let (Some(value), Some(next)) = (iv.point_value(), next) {
                prefix.push(value.clone());
                self.walk(next, parts, max_parts, prefix, out);
                prefix.pop();
                continue;
            }
            let (lo, hi) = oriented(iv, descending);
            let min = self.close_endpoint(lo, next, prefix, parts, max_parts, true);
            let max = self.close_endpoint(hi, next, prefix, parts, max_parts, false);
            out.push(KeyRange::new(min, max));
        }
    }

    /// Build one endpoint of a range from the closing interval's bound,
    /// stretched through the following key parts.
    fn close_endpoint(
        &self,
        bound: &Bound<ScalarValue>,
        next: Option<NodeId>,
        prefix: &[ScalarValue],
        parts: &[KeyPart],
        max_parts: usize,
        lower: bool,
    ) -> Bound<Vec<ScalarValue>> {
        let mut key = prefix.to_vec();
        match bound {
            Bound::Unbounded if prefix.is_empty() => Bound::Unbounded,
            Bound::Unbounded => Bound::Included(key),
            Bound::Excluded(v) => {
                key.push(v.clone());
                Bound::Excluded(key)
            }
            Bound::Included(v) => {
                key.push(v.clone());
                let inclusive = match next {
                    Some(n) => self.stretch(n, parts, max_parts, lower, &mut key),
                    None => true,
                };
                if inclusive {
                    Bound::Included(key)
                } else {
                    Bound::Excluded(key)
                }
            }
        }
    }

    /// Append the outermost bound of the following key parts to `key`.
    /// Returns whether the resulting endpoint is inclusive.
    fn stretch(
        &self,
        id: NodeId,
        parts: &[KeyPart],
        max_parts: usize,
        lower: bool,
        key: &mut Vec<ScalarValue>,
    ) -> bool {
        let node = self.node(id);
        let descending = parts.get(node.part as usize).is_some_and(|p| p.descending);
        let ordered = self.ordered(node, descending);
        let edge = if lower { ordered.first() } else { ordered.last() };
        let Some(iv) = edge else {
            return true;
        };
        let (lo, hi) = oriented(iv, descending);
        match if lower { lo } else { hi } {
            Bound::Unbounded => true,
            Bound::Excluded(v) => {
                key.push(v.clone());
                false
            }
            Bound::Included(v) => {
                key.push(v.clone());
                match self.usable_next(iv, node.part, max_parts) {
                    Some(n) => self.stretch(n, parts, max_parts, lower, key),
                    None => true,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::DataType;

    fn int(v: i64) -> ScalarValue {
        ScalarValue::Int64(v)
    }

    fn parts(n: usize) -> Vec<KeyPart> {
        (0..n)
            .map(|i| KeyPart {
                column: i,
                data_type: DataType::Int { bits: 32, unsigned: false },
                nullable: true,
                descending: false,
            })
            .collect()
    }

    #[test]
    fn test_points_extend_prefix() {
        let mut arena = RangeArena::new(1000, 0);
        let kp0 = arena.alloc(NodeKind::KeyRange, 0, vec![Interval::point(int(1)), Interval::point(int(2))]).unwrap();
        let kp1 = arena.leaf(1, Bound::Excluded(int(5)), Bound::Unbounded).unwrap();
        let root = arena.key_and(Some(kp0), Some(kp1)).unwrap().unwrap();
        let ranges = arena.key_ranges(root, &parts(2), 2, false);
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0].min, Bound::Excluded(vec![int(1), int(5)]));
        assert_eq!(ranges[0].max, Bound::Included(vec![int(1)]));
        assert!(ranges[0].contains(&[int(1), int(6)], &[false, false]));
        assert!(!ranges[0].contains(&[int(1), int(5)], &[false, false]));
        assert!(!ranges[0].contains(&[int(2), int(6)], &[false, false]));
    }

    #[test]
    fn test_truncation_to_prefix() {
        let mut arena = RangeArena::new(1000, 0);
        let kp0 = arena.leaf(0, Bound::Included(int(3)), Bound::Included(int(3))).unwrap();
        let kp1 = arena.leaf(1, Bound::Included(int(7)), Bound::Included(int(7))).unwrap();
        let root = arena.key_and(Some(kp0), Some(kp1)).unwrap().unwrap();
        let full = arena.key_ranges(root, &parts(2), 2, true);
        assert!(full[0].flags.contains(RangeFlags::UNIQUE_RANGE));
        let truncated = arena.key_ranges(root, &parts(2), 1, true);
        assert_eq!(truncated.len(), 1);
        assert!(truncated[0].is_eq());
        assert!(!truncated[0].flags.contains(RangeFlags::UNIQUE_RANGE));
        assert_eq!(truncated[0].min, Bound::Included(vec![int(3)]));
    }

    #[test]
    fn test_lower_bound_stretches_through_next_part() {
        let mut arena = RangeArena::new(1000, 0);
        let kp0 = arena.leaf(0, Bound::Included(int(5)), Bound::Unbounded).unwrap();
        let kp1 = arena.leaf(1, Bound::Included(int(3)), Bound::Unbounded).unwrap();
        let root = arena.key_and(Some(kp0), Some(kp1)).unwrap().unwrap();
        let ranges = arena.key_ranges(root, &parts(2), 2, false);
        assert_eq!(ranges[0].min, Bound::Included(vec![int(5), int(3)]));
        assert_eq!(ranges[0].max, Bound::Unbounded);
        assert!(ranges[0].flags.contains(RangeFlags::NO_MAX_RANGE));
    }

    #[test]
    fn test_descending_part_swaps_bounds() {
        let mut arena = RangeArena::new(1000, 0);
        let kp0 = arena.leaf(0, Bound::Included(int(2)), Bound::Excluded(int(8))).unwrap();
        let mut desc = parts(1);
        desc[0].descending = true;
        let ranges = arena.key_ranges(kp0, &desc, 1, false);
        assert_eq!(ranges[0].min, Bound::Excluded(vec![int(8)]));
        assert_eq!(ranges[0].max, Bound::Included(vec![int(2)]));
        assert!(ranges[0].contains(&[int(7)], &[true]));
        assert!(!ranges[0].contains(&[int(8)], &[true]));
        assert!(!ranges[0].contains(&[int(1)], &[true]));
    }

    #[test]
    fn test_null_point_range() {
        let mut arena = RangeArena::new(1000, 0);
        let kp0 = arena.leaf(0, Bound::Included(ScalarValue::Null), Bound::Included(ScalarValue::Null)).unwrap();
        let ranges = arena.key_ranges(kp0, &parts(1), 1, true);
        assert!(ranges[0].flags.contains(RangeFlags::NULL_RANGE));
        assert!(!ranges[0].flags.contains(RangeFlags::UNIQUE_RANGE));
    }
}
