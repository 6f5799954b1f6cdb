//! Conjunction of two interval graphs of the same index.

use super::arena::RangeArena;
use super::node::{cmp_max_to_max, cmp_min_to_max, cmp_min_to_min, Interval, NodeId, NodeKind};
use crate::error::OptResult;
use std::cmp::Ordering;
use tracing::trace;

impl RangeArena {
    /// `a AND b` for two graphs over the same index. `None` stands for "no
    /// restriction" on either side and in the result.
    ///
    /// Both references are consumed.
    pub fn key_and(&mut self, a: Option<NodeId>, b: Option<NodeId>) -> OptResult<Option<NodeId>> {
        let (a, b) = match (a, b) {
            (None, x) | (x, None) => return Ok(x),
            (Some(a), Some(b)) => (a, b),
        };
        // Impossibility survives an exhausted budget: it allocates nothing.
        if self.node(a).is_impossible() {
            self.release(b);
            return Ok(Some(a));
        }
        if self.node(b).is_impossible() {
            self.release(a);
            return Ok(Some(b));
        }
        if self.is_exhausted() {
            // Dropping one operand of an AND only widens the result.
            self.note_cap_fallback();
            self.release(b);
            return Ok(Some(a));
        }

        let (a, b) = if self.node(a).part > self.node(b).part {
            (b, a)
        } else {
            (a, b)
        };
        if self.node(a).part < self.node(b).part {
            return self.and_on_later_part(a, b);
        }

        // Same key part.
        match (self.node(a).kind, self.node(b).kind) {
            (NodeKind::MaybeKey, NodeKind::MaybeKey) => {
                let next_a = self.share_opt(self.node(a).intervals[0].next_key_part);
                let next_b = self.share_opt(self.node(b).intervals[0].next_key_part);
                let part = self.node(a).part;
                self.release(a);
                self.release(b);
                let next = self.key_and(next_a, next_b)?;
                if let Some(n) = next {
                    if self.node(n).is_impossible() {
                        return Ok(Some(n));
                    }
                }
                let mut iv = Interval::full();
                iv.next_key_part = next;
                Ok(Some(self.alloc(NodeKind::MaybeKey, part, vec![iv])?))
            }
            (NodeKind::MaybeKey, _) => self.and_with_maybe(b, a),
            (_, NodeKind::MaybeKey) => self.and_with_maybe(a, b),
            _ => self.and_same_part(a, b),
        }
    }

    /// `a AND b` where `b` restricts a later key part than `a`: distribute `b`
    /// into the `next_key_part` of every interval of `a`.
    fn and_on_later_part(&mut self, a: NodeId, b: NodeId) -> OptResult<Option<NodeId>> {
        let (a_node, b_node) = (self.node(a), self.node(b));
        let projected = a_node.weight as u64 + a_node.elements() as u64 * b_node.weight as u64;
        if self.max_weight != 0 && projected > self.max_weight as u64 {
            trace!(
                part = a_node.part,
                later_part = b_node.part,
                projected,
                "dropping later key part condition to bound graph weight"
            );
            self.counters.and_drops += 1;
            self.release(b);
            return Ok(Some(a));
        }
        self.and_all_keys(a, b)
    }

    /// AND `b` into every interval's next-part chain of `a`, dropping
    /// intervals whose chain becomes impossible.
    fn and_all_keys(&mut self, a: NodeId, b: NodeId) -> OptResult<Option<NodeId>> {
        let a = self.make_mut(a)?;
        let count = self.node(a).intervals.len();
        let mut keep = Vec::with_capacity(count);
        for i in 0..count {
            let next = self.node_mut(a).intervals[i].next_key_part.take();
            let shared_b = self.share(b);
            match self.key_and(next, Some(shared_b))? {
                Some(n) if self.node(n).is_impossible() => {
                    self.release(n);
                    keep.push(false);
                }
                other => {
                    self.node_mut(a).intervals[i].next_key_part = other;
                    keep.push(true);
                }
            }
        }
        self.release(b);
        let part = self.node(a).part;
        let mut keep = keep.into_iter();
        self.node_mut(a)
            .intervals
            .retain(|_| keep.next().unwrap_or(true));
        if self.node(a).intervals.is_empty() {
            self.release(a);
            return Ok(Some(self.impossible(part)?));
        }
        self.refresh(a);
        Ok(Some(a))
    }

    /// KeyRange `a` AND MaybeKey `m` on the same part: the ranges of `a`
    /// stay, further restricted by whatever `m` links to the next part.
    fn and_with_maybe(&mut self, a: NodeId, m: NodeId) -> OptResult<Option<NodeId>> {
        let next = self.share_opt(self.node(m).intervals[0].next_key_part);
        self.release(m);
        match next {
            None => Ok(Some(a)),
            Some(next) => self.and_all_keys(a, next),
        }
    }

    /// Intersect two interval lists on the same key part.
    fn and_same_part(&mut self, a: NodeId, b: NodeId) -> OptResult<Option<NodeId>> {
        let part = self.node(a).part;
        let xs = self.node(a).intervals.clone();
        let ys = self.node(b).intervals.clone();
        let mut out: Vec<Interval> = Vec::new();
        let (mut i, mut j) = (0, 0);
        while i < xs.len() && j < ys.len() {
            let (x, y) = (&xs[i], &ys[j]);
            if !x.overlaps(y) {
                if cmp_min_to_max(&y.min, &x.max) == Ordering::Greater {
                    i += 1;
                } else {
                    j += 1;
                }
                continue;
            }
            let min = if cmp_min_to_min(&x.min, &y.min) == Ordering::Less {
                y.min.clone()
            } else {
                x.min.clone()
            };
            let max = if cmp_max_to_max(&x.max, &y.max) == Ordering::Greater {
                y.max.clone()
            } else {
                x.max.clone()
            };
            let next_x = self.share_opt(x.next_key_part);
            let next_y = self.share_opt(y.next_key_part);
            let next = self.key_and(next_x, next_y)?;
            match next {
                Some(n) if self.node(n).is_impossible() => self.release(n),
                next => out.push(Interval {
                    min,
                    max,
                    next_key_part: next,
                }),
            }
            match cmp_max_to_max(&x.max, &y.max) {
                Ordering::Less => i += 1,
                Ordering::Greater => j += 1,
                Ordering::Equal => {
                    i += 1;
                    j += 1;
                }
            }
        }
        self.release(a);
        self.release(b);
        if out.is_empty() {
            return Ok(Some(self.impossible(part)?));
        }
        Ok(Some(self.alloc(NodeKind::KeyRange, part, out)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::ScalarValue;
    use std::ops::Bound;

    fn int(v: i64) -> ScalarValue {
        ScalarValue::Int64(v)
    }

    fn range(arena: &mut RangeArena, part: u16, lo: i64, hi: i64) -> NodeId {
        arena
            .leaf(part, Bound::Included(int(lo)), Bound::Included(int(hi)))
            .unwrap()
    }

    #[test]
    fn test_and_same_part_intersects() {
        let mut arena = RangeArena::new(1000, 0);
        let a = range(&mut arena, 0, 1, 10);
        let b = range(&mut arena, 0, 5, 20);
        let r = arena.key_and(Some(a), Some(b)).unwrap().unwrap();
        let node = arena.node(r);
        assert_eq!(node.intervals.len(), 1);
        assert_eq!(node.intervals[0].min, Bound::Included(int(5)));
        assert_eq!(node.intervals[0].max, Bound::Included(int(10)));
    }

    #[test]
    fn test_and_disjoint_is_impossible() {
        let mut arena = RangeArena::new(1000, 0);
        let a = range(&mut arena, 0, 1, 3);
        let b = range(&mut arena, 0, 5, 9);
        let r = arena.key_and(Some(a), Some(b)).unwrap().unwrap();
        assert!(arena.node(r).is_impossible());
    }

    #[test]
    fn test_and_later_part_links_children() {
        let mut arena = RangeArena::new(1000, 0);
        let a = range(&mut arena, 0, 1, 1);
        let b = range(&mut arena, 1, 2, 2);
        let r = arena.key_and(Some(b), Some(a)).unwrap().unwrap();
        let node = arena.node(r);
        assert_eq!(node.part, 0);
        let next = node.intervals[0].next_key_part.expect("linked kp1");
        assert_eq!(arena.node(next).part, 1);
        assert_eq!(arena.node(r).weight, 2);
    }

    #[test]
    fn test_and_with_none_is_identity() {
        let mut arena = RangeArena::new(1000, 0);
        let a = range(&mut arena, 0, 1, 1);
        assert_eq!(arena.key_and(Some(a), None).unwrap(), Some(a));
        assert_eq!(arena.key_and(None, None).unwrap(), None);
    }

    #[test]
    fn test_and_maybe_keeps_ranges() {
        let mut arena = RangeArena::new(1000, 0);
        let a = range(&mut arena, 0, 1, 4);
        let m = arena.maybe_key(0).unwrap();
        let r = arena.key_and(Some(m), Some(a)).unwrap().unwrap();
        assert_eq!(arena.node(r).kind, NodeKind::KeyRange);
        assert_eq!(arena.node(r).intervals[0].max, Bound::Included(int(4)));
    }

    #[test]
    fn test_weight_heuristic_drops_later_part() {
        let mut arena = RangeArena::new(1000, 3);
        let a = arena
            .alloc(
                NodeKind::KeyRange,
                0,
                vec![
                    Interval::point(int(1)),
                    Interval::point(int(2)),
                    Interval::point(int(3)),
                ],
            )
            .unwrap();
        let b = range(&mut arena, 1, 0, 0);
        let r = arena.key_and(Some(a), Some(b)).unwrap().unwrap();
        assert_eq!(r, a);
        assert!(arena.node(r).intervals.iter().all(|iv| iv.next_key_part.is_none()));
        assert_eq!(arena.counters().and_drops, 1);
    }

    #[test]
    fn test_impossible_chain_removes_interval() {
        let mut arena = RangeArena::new(1000, 0);
        // (kp0 = 1 AND kp1 = 5) OR kp0 = 2, then AND kp1 = 7.
        let child = range(&mut arena, 1, 5, 5);
        let mut first = Interval::point(int(1));
        first.next_key_part = Some(child);
        let a = arena
            .alloc(NodeKind::KeyRange, 0, vec![first, Interval::point(int(2))])
            .unwrap();
        let b = range(&mut arena, 1, 7, 7);
        let r = arena.key_and(Some(a), Some(b)).unwrap().unwrap();
        let node = arena.node(r);
        assert_eq!(node.intervals.len(), 1);
        assert_eq!(node.intervals[0].min, Bound::Included(int(2)));
    }

    #[test]
    fn test_exhausted_budget_keeps_impossible() {
        let mut arena = RangeArena::new(1, 0);
        let a = range(&mut arena, 0, 1, 4);
        let b = range(&mut arena, 0, 2, 6);
        assert!(arena.is_exhausted());
        let none = arena.impossible(0).unwrap();
        let r = arena.key_and(Some(a), Some(none)).unwrap().unwrap();
        assert!(arena.node(r).is_impossible());
        assert_eq!(arena.counters().cap_fallbacks, 0);

        // Without an impossible side the budget keeps the first operand.
        let a = range(&mut arena, 0, 1, 4);
        assert_eq!(arena.key_and(Some(a), Some(b)).unwrap(), Some(a));
        assert_eq!(arena.counters().cap_fallbacks, 1);
    }
}

