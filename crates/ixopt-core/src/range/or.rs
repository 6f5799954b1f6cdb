//! Disjunction of two interval graphs of the same index.
//!
//! Both interval lists are swept in key order. Wherever they overlap, the
//! overlap becomes its own interval whose next-part condition is the OR of
//! both sides' next-part conditions; the non-overlapping pieces keep their own
//! chains. Adjacent output pieces with structurally equal chains are
//! coalesced, so `a < 2 OR a = 2` comes out as the single `a <= 2`.

use super::arena::RangeArena;
use super::node::{
    cmp_max_to_max, cmp_min_to_max, cmp_min_to_min, max_before, min_after, touches, Interval,
    NodeId, NodeKind,
};
use crate::error::OptResult;
use std::cmp::Ordering;
use std::collections::VecDeque;

impl RangeArena {
    /// `a OR b` for two graphs over the same index. `None` stands for "no
    /// restriction"; a result of `None` means the disjunction cannot be
    /// expressed as ranges over this index.
    ///
    /// Both references are consumed.
    pub fn key_or(&mut self, a: Option<NodeId>, b: Option<NodeId>) -> OptResult<Option<NodeId>> {
        let (a, b) = match (a, b) {
            (Some(a), Some(b)) => (a, b),
            (x, y) => {
                self.release_opt(x);
                self.release_opt(y);
                return Ok(None);
            }
        };
        if self.node(a).is_impossible() {
            self.release(a);
            return Ok(Some(b));
        }
        if self.node(b).is_impossible() {
            self.release(b);
            return Ok(Some(a));
        }
        if self.is_exhausted() {
            self.note_cap_fallback();
            self.release(a);
            self.release(b);
            return Ok(None);
        }
        if self.node(a).part != self.node(b).part {
            // Conditions on different key parts do not combine into ranges.
            self.release(a);
            self.release(b);
            return Ok(None);
        }
        let part = self.node(a).part;
        if self.node(a).is_maybe() || self.node(b).is_maybe() {
            self.release(a);
            self.release(b);
            return Ok(Some(self.maybe_key(part)?));
        }
        if a == b {
            return self.or_with_self(a, b);
        }
        self.or_same_part(part, a, b)
    }

    fn or_with_self(&mut self, a: NodeId, b: NodeId) -> OptResult<Option<NodeId>> {
        self.release(b);
        Ok(Some(a))
    }

    fn or_same_part(&mut self, part: u16, a: NodeId, b: NodeId) -> OptResult<Option<NodeId>> {
        let mut xs = self.take_pieces(a);
        let mut ys = self.take_pieces(b);
        self.release(a);
        self.release(b);

        let mut out: Vec<Interval> = Vec::new();
        let mut x = xs.pop_front();
        let mut y = ys.pop_front();
        loop {
            match (x.take(), y.take()) {
                (None, None) => break,
                (Some(p), None) => {
                    self.push_piece(&mut out, p);
                    x = xs.pop_front();
                }
                (None, Some(q)) => {
                    self.push_piece(&mut out, q);
                    y = ys.pop_front();
                }
                (Some(mut p), Some(mut q)) => {
                    // Keep `p` as the piece starting first.
                    if cmp_min_to_min(&p.min, &q.min) == Ordering::Greater {
                        std::mem::swap(&mut p, &mut q);
                        std::mem::swap(&mut xs, &mut ys);
                    }
                    if cmp_min_to_max(&q.min, &p.max) == Ordering::Greater {
                        self.push_piece(&mut out, p);
                        x = xs.pop_front();
                        y = Some(q);
                        continue;
                    }
                    if cmp_min_to_min(&p.min, &q.min) == Ordering::Less {
                        let head = Interval {
                            min: p.min.clone(),
                            max: max_before(&q.min),
                            next_key_part: self.share_opt(p.next_key_part),
                        };
                        self.push_piece(&mut out, head);
                        p.min = q.min.clone();
                    }
                    // Both pieces now start at the same key.
                    match cmp_max_to_max(&p.max, &q.max) {
                        Ordering::Less => {
                            let q_next = self.share_opt(q.next_key_part);
                            let next = self.key_or(p.next_key_part, q_next)?;
                            q.min = min_after(&p.max);
                            let common = Interval {
                                min: p.min,
                                max: p.max,
                                next_key_part: next,
                            };
                            self.push_piece(&mut out, common);
                            x = xs.pop_front();
                            y = Some(q);
                        }
                        Ordering::Greater => {
                            let p_next = self.share_opt(p.next_key_part);
                            let next = self.key_or(p_next, q.next_key_part)?;
                            p.min = min_after(&q.max);
                            let common = Interval {
                                min: q.min,
                                max: q.max,
                                next_key_part: next,
                            };
                            self.push_piece(&mut out, common);
                            x = Some(p);
                            y = ys.pop_front();
                        }
                        Ordering::Equal => {
                            let next = self.key_or(p.next_key_part, q.next_key_part)?;
                            let common = Interval {
                                min: p.min,
                                max: p.max,
                                next_key_part: next,
                            };
                            self.push_piece(&mut out, common);
                            x = xs.pop_front();
                            y = ys.pop_front();
                        }
                    }
                }
            }
        }

        if out.len() == 1 && out[0].is_full() && out[0].next_key_part.is_none() {
            return Ok(None);
        }
        Ok(Some(self.alloc(NodeKind::KeyRange, part, out)?))
    }

    /// Copy the intervals of `id` as independently owned pieces.
    fn take_pieces(&mut self, id: NodeId) -> VecDeque<Interval> {
        let intervals = self.node(id).intervals.clone();
        intervals
            .into_iter()
            .map(|mut iv| {
                iv.next_key_part = self.share_opt(iv.next_key_part);
                iv
            })
            .collect()
    }

    /// Append a piece, merging it into the previous one when they touch and
    /// carry the same next-part condition.
    fn push_piece(&mut self, out: &mut Vec<Interval>, piece: Interval) {
        if let Some(last) = out.last_mut() {
            if touches(&last.max, &piece.min)
                && self.same_graph(last.next_key_part, piece.next_key_part)
            {
                if cmp_max_to_max(&piece.max, &last.max) == Ordering::Greater {
                    last.max = piece.max;
                }
                self.release_opt(piece.next_key_part);
                return;
            }
        }
        out.push(piece);
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

    fn leaf(arena: &mut RangeArena, part: u16, min: Bound<ScalarValue>, max: Bound<ScalarValue>) -> NodeId {
        arena.leaf(part, min, max).unwrap()
    }

    #[test]
    fn test_or_disjoint_keeps_both() {
        let mut arena = RangeArena::new(1000, 0);
        let a = leaf(&mut arena, 0, Bound::Unbounded, Bound::Excluded(int(2)));
        let b = leaf(&mut arena, 0, Bound::Excluded(int(4)), Bound::Unbounded);
        let r = arena.key_or(Some(a), Some(b)).unwrap().unwrap();
        let node = arena.node(r);
        assert_eq!(node.intervals.len(), 2);
        assert_eq!(node.intervals[0].max, Bound::Excluded(int(2)));
        assert_eq!(node.intervals[1].min, Bound::Excluded(int(4)));
    }

    #[test]
    fn test_or_touching_coalesces() {
        let mut arena = RangeArena::new(1000, 0);
        let a = leaf(&mut arena, 0, Bound::Unbounded, Bound::Excluded(int(2)));
        let b = leaf(&mut arena, 0, Bound::Included(int(2)), Bound::Included(int(2)));
        let r = arena.key_or(Some(a), Some(b)).unwrap().unwrap();
        let node = arena.node(r);
        assert_eq!(node.intervals.len(), 1);
        assert_eq!(node.intervals[0].max, Bound::Included(int(2)));
    }

    #[test]
    fn test_or_covering_everything_is_unrestricted() {
        let mut arena = RangeArena::new(1000, 0);
        let a = leaf(&mut arena, 0, Bound::Unbounded, Bound::Included(int(5)));
        let b = leaf(&mut arena, 0, Bound::Excluded(int(3)), Bound::Unbounded);
        assert_eq!(arena.key_or(Some(a), Some(b)).unwrap(), None);
    }

    #[test]
    fn test_or_splits_overlap_with_next_parts() {
        let mut arena = RangeArena::new(1000, 0);
        // (kp0 in [1,10] AND kp1 = 1) OR (kp0 in [5,20] AND kp1 = 2)
        let c1 = leaf(&mut arena, 1, Bound::Included(int(1)), Bound::Included(int(1)));
        let c2 = leaf(&mut arena, 1, Bound::Included(int(2)), Bound::Included(int(2)));
        let mut x = Interval::new(Bound::Included(int(1)), Bound::Included(int(10)));
        x.next_key_part = Some(c1);
        let mut y = Interval::new(Bound::Included(int(5)), Bound::Included(int(20)));
        y.next_key_part = Some(c2);
        let a = arena.alloc(NodeKind::KeyRange, 0, vec![x]).unwrap();
        let b = arena.alloc(NodeKind::KeyRange, 0, vec![y]).unwrap();
        let r = arena.key_or(Some(a), Some(b)).unwrap().unwrap();
        let node = arena.node(r).clone();
        assert_eq!(node.intervals.len(), 3);
        assert_eq!(node.intervals[0].max, Bound::Excluded(int(5)));
        assert_eq!(node.intervals[1].min, Bound::Included(int(5)));
        assert_eq!(node.intervals[1].max, Bound::Included(int(10)));
        assert_eq!(node.intervals[2].min, Bound::Excluded(int(10)));
        let middle = node.intervals[1].next_key_part.unwrap();
        assert_eq!(arena.node(middle).intervals.len(), 2);
    }

    #[test]
    fn test_or_different_parts_unrestricted() {
        let mut arena = RangeArena::new(1000, 0);
        let a = leaf(&mut arena, 0, Bound::Included(int(1)), Bound::Included(int(1)));
        let b = leaf(&mut arena, 1, Bound::Included(int(1)), Bound::Included(int(1)));
        assert_eq!(arena.key_or(Some(a), Some(b)).unwrap(), None);
        assert_eq!(arena.node(a).use_count, 0);
        assert_eq!(arena.node(b).use_count, 0);
    }

    #[test]
    fn test_or_with_impossible_returns_other() {
        let mut arena = RangeArena::new(1000, 0);
        let a = arena.impossible(0).unwrap();
        let b = leaf(&mut arena, 0, Bound::Included(int(1)), Bound::Included(int(1)));
        assert_eq!(arena.key_or(Some(a), Some(b)).unwrap(), Some(b));
    }

    #[test]
    fn test_exhausted_budget_still_drops_impossible_side() {
        let mut arena = RangeArena::new(1, 0);
        let b = leaf(&mut arena, 0, Bound::Included(int(1)), Bound::Included(int(3)));
        let a = arena.impossible(0).unwrap();
        let c = leaf(&mut arena, 0, Bound::Included(int(7)), Bound::Included(int(9)));
        assert!(arena.is_exhausted());
        assert_eq!(arena.key_or(Some(a), Some(b)).unwrap(), Some(b));
        // Two real ranges cannot be merged any more: no restriction.
        assert_eq!(arena.key_or(Some(b), Some(c)).unwrap(), None);
        assert_eq!(arena.counters().cap_fallbacks, 1);
    }
}
