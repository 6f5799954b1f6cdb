//! Weight control for interval graphs.
//!
//! An index graph whose weight exceeds the configured limit is pruned from
//! the deepest key part upwards: every link into the highest key part is cut,
//! which drops that column's conditions (the ranges only get wider). When
//! only the root key part would remain the graph is discarded altogether.

use super::arena::RangeArena;
use super::node::NodeId;
use crate::error::OptResult;
use std::collections::HashMap;
use tracing::debug;

impl RangeArena {
    /// `key_and` followed by weight control of the result.
    pub fn key_and_with_limit(
        &mut self,
        a: Option<NodeId>,
        b: Option<NodeId>,
    ) -> OptResult<Option<NodeId>> {
        let r = self.key_and(a, b)?;
        self.enforce_weight_limit(r)
    }

    /// `key_or` followed by weight control of the result.
    pub fn key_or_with_limit(
        &mut self,
        a: Option<NodeId>,
        b: Option<NodeId>,
    ) -> OptResult<Option<NodeId>> {
        let r = self.key_or(a, b)?;
        self.enforce_weight_limit(r)
    }

    /// Prune `id` until its weight is within the limit. Consumes the reference.
    pub fn enforce_weight_limit(&mut self, id: Option<NodeId>) -> OptResult<Option<NodeId>> {
        let Some(mut id) = id else {
            return Ok(None);
        };
        if self.max_weight == 0 {
            return Ok(Some(id));
        }
        while self.node(id).weight > self.max_weight {
            let (part, max_part) = (self.node(id).part, self.node(id).max_part);
            self.counters.weight_prunes += 1;
            if max_part <= part {
                debug!(
                    weight = self.node(id).weight,
                    limit = self.max_weight,
                    "range graph over weight limit, discarding it"
                );
                self.release(id);
                return Ok(None);
            }
            debug!(
                weight = self.node(id).weight,
                limit = self.max_weight,
                dropped_part = max_part,
                "range graph over weight limit, pruning deepest key part"
            );
            let mut memo = HashMap::new();
            id = self.prune_after(id, max_part - 1, &mut memo)?;
        }
        Ok(Some(id))
    }

    /// Cut every link to key parts beyond `last_part`. Consumes `id`; shared
    /// subgraphs are pruned once and shared again by all their parents.
    fn prune_after(
        &mut self,
        id: NodeId,
        last_part: u16,
        memo: &mut HashMap<NodeId, NodeId>,
    ) -> OptResult<NodeId> {
        if self.node(id).max_part <= last_part {
            return Ok(id);
        }
        if let Some(&done) = memo.get(&id) {
            self.release(id);
            return Ok(self.share(done));
        }
        let original = id;
        let shared = self.node(id).use_count > 1;
        let id = self.make_mut(id)?;
        for i in 0..self.node(id).intervals.len() {
            let Some(next) = self.node_mut(id).intervals[i].next_key_part.take() else {
                continue;
            };
            let pruned = if self.node(next).part > last_part {
                self.release(next);
                None
            } else {
                Some(self.prune_after(next, last_part, memo)?)
            };
            self.node_mut(id).intervals[i].next_key_part = pruned;
        }
        self.refresh(id);
        if shared {
            memo.insert(original, id);
        }
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::ScalarValue;
    use crate::range::node::{Interval, NodeKind};

    fn points(arena: &mut RangeArena, part: u16, values: &[i64]) -> NodeId {
        let ivs = values
            .iter()
            .map(|v| Interval::point(ScalarValue::Int64(*v)))
            .collect();
        arena.alloc(NodeKind::KeyRange, part, ivs).unwrap()
    }

    #[test]
    fn test_prunes_deepest_part_first() {
        let mut arena = RangeArena::new(10_000, 0);
        // kp0 IN (1..4) AND kp1 IN (1..4) AND kp2 IN (1..4)
        let kp0 = points(&mut arena, 0, &[1, 2, 3, 4]);
        let kp1 = points(&mut arena, 1, &[1, 2, 3, 4]);
        let kp2 = points(&mut arena, 2, &[1, 2, 3, 4]);
        let t = arena.key_and(Some(kp0), Some(kp1)).unwrap();
        let t = arena.key_and(t, Some(kp2)).unwrap().unwrap();
        assert_eq!(arena.node(t).weight, 4 + 16 + 64);

        arena.max_weight = 30;
        let t = arena.enforce_weight_limit(Some(t)).unwrap().unwrap();
        assert_eq!(arena.node(t).max_part, 1);
        assert_eq!(arena.node(t).weight, 20);
        assert_eq!(arena.verify_weight(t), 20);
        assert!(arena.counters().weight_prunes >= 1);
    }

    #[test]
    fn test_root_only_graph_over_limit_is_dropped() {
        let mut arena = RangeArena::new(10_000, 0);
        let kp0 = points(&mut arena, 0, &[1, 2, 3, 4, 5]);
        arena.max_weight = 3;
        assert_eq!(arena.enforce_weight_limit(Some(kp0)).unwrap(), None);
        assert_eq!(arena.node(kp0).use_count, 0);
    }

    #[test]
    fn test_within_limit_untouched() {
        let mut arena = RangeArena::new(10_000, 100);
        let kp0 = points(&mut arena, 0, &[1, 2]);
        assert_eq!(arena.enforce_weight_limit(Some(kp0)).unwrap(), Some(kp0));
    }
}
