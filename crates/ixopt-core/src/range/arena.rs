//! Arena owning every interval node built for one table's optimization.
//!
//! ## Sharing and Copy-on-Write
//!
//! Range graphs are shared aggressively: ANDing a condition on key part 1 into
//! every interval of key part 0 links the *same* node under each of them. Each
//! node therefore counts its owners in `use_count`, and every mutation goes
//! through [`RangeArena::make_mut`], which clones a node (sharing its children)
//! when somebody else still holds it.
//!
//! Ownership rules, followed by every operation in this module tree:
//! - a `NodeId` returned by an operation carries one reference owned by the caller;
//! - an operation taking a `NodeId` by value consumes that reference;
//! - an interval's `next_key_part` owns one reference to its child.
//!
//! ## Budgets
//!
//! The arena counts allocated intervals. Past `max_intervals` it flags itself
//! exhausted and the key operations stop building new structure, answering
//! "no restriction" instead. That keeps the result sound (never narrower than
//! the predicate) while bounding memory on pathological predicates.

use super::node::{Interval, NodeId, NodeKind, RangeNode};
use crate::error::{OptError, OptResult};
use crate::expr::ScalarValue;
use std::collections::HashMap;
use std::ops::Bound;
use tracing::debug;

/// Counters describing how much the arena had to simplify.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct RangeCounters {
    /// Nodes allocated so far (including copy-on-write clones).
    pub nodes_allocated: usize,
    /// Intervals allocated so far.
    pub intervals_allocated: usize,
    /// Times a key_and dropped its second operand instead of distributing it.
    pub and_drops: usize,
    /// Times a graph was pruned to stay under the weight limit.
    pub weight_prunes: usize,
    /// Key operations answered with "no restriction" after the interval cap was hit.
    pub cap_fallbacks: usize,
    /// Index-merge sets dropped, or distributions cut short, at the disjunct limit.
    pub merge_drops: usize,
}

#[derive(Debug)]
pub struct RangeArena {
    nodes: Vec<RangeNode>,
    /// Intervals allowed before the arena reports exhaustion.
    max_intervals: usize,
    /// Weight limit per index graph; 0 disables weight control.
    pub(crate) max_weight: u32,
    exhausted: bool,
    pub(crate) counters: RangeCounters,
}

impl RangeArena {
    pub fn new(max_intervals: usize, max_weight: u32) -> Self {
        Self {
            nodes: Vec::new(),
            max_intervals,
            max_weight,
            exhausted: false,
            counters: RangeCounters::default(),
        }
    }

    pub fn node(&self, id: NodeId) -> &RangeNode {
        &self.nodes[id.index()]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut RangeNode {
        debug_assert!(self.nodes[id.index()].use_count <= 1, "mutating shared node {id}");
        &mut self.nodes[id.index()]
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn counters(&self) -> RangeCounters {
        self.counters
    }

    pub fn max_weight(&self) -> u32 {
        self.max_weight
    }

    /// Allocate a node. The intervals' `next_key_part` references move into it.
    pub fn alloc(
        &mut self,
        kind: NodeKind,
        part: u16,
        intervals: Vec<Interval>,
    ) -> OptResult<NodeId> {
        self.nodes
            .try_reserve(1)
            .map_err(|_| OptError::OutOfMemory)?;
        let id = NodeId(u32::try_from(self.nodes.len()).map_err(|_| OptError::OutOfMemory)?);
        self.counters.nodes_allocated += 1;
        self.counters.intervals_allocated += intervals.len();
        if !self.exhausted && self.counters.intervals_allocated > self.max_intervals {
            debug!(
                intervals = self.counters.intervals_allocated,
                limit = self.max_intervals,
                "range interval budget exhausted"
            );
            self.exhausted = true;
        }
        self.nodes.push(RangeNode {
            kind,
            part,
            intervals,
            use_count: 1,
            weight: 0,
            max_part: part,
        });
        self.refresh(id);
        Ok(id)
    }

    pub fn impossible(&mut self, part: u16) -> OptResult<NodeId> {
        self.alloc(NodeKind::Impossible, part, Vec::new())
    }

    pub fn maybe_key(&mut self, part: u16) -> OptResult<NodeId> {
        self.alloc(NodeKind::MaybeKey, part, vec![Interval::full()])
    }

    pub fn leaf(
        &mut self,
        part: u16,
        min: Bound<ScalarValue>,
        max: Bound<ScalarValue>,
    ) -> OptResult<NodeId> {
        let iv = Interval::new(min, max);
        if iv.is_empty() {
            return self.impossible(part);
        }
        self.alloc(NodeKind::KeyRange, part, vec![iv])
    }

    /// Take an additional reference to `id`.
    pub fn share(&mut self, id: NodeId) -> NodeId {
        self.nodes[id.index()].use_count += 1;
        id
    }

    pub fn share_opt(&mut self, id: Option<NodeId>) -> Option<NodeId> {
        id.map(|id| self.share(id))
    }

    /// Drop one reference; nodes reaching zero release their children.
    pub fn release(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            let node = &mut self.nodes[id.index()];
            debug_assert!(node.use_count > 0, "double release of {id}");
            node.use_count = node.use_count.saturating_sub(1);
            if node.use_count == 0 {
                stack.extend(node.intervals.iter().filter_map(|iv| iv.next_key_part));
            }
        }
    }

    pub fn release_opt(&mut self, id: Option<NodeId>) {
        if let Some(id) = id {
            self.release(id);
        }
    }

    /// Obtain an exclusively owned version of `id` (consuming the reference).
    pub fn make_mut(&mut self, id: NodeId) -> OptResult<NodeId> {
        if self.nodes[id.index()].use_count <= 1 {
            return Ok(id);
        }
        let node = self.node(id);
        let (kind, part, intervals) = (node.kind, node.part, node.intervals.clone());
        for iv in &intervals {
            if let Some(next) = iv.next_key_part {
                self.share(next);
            }
        }
        let copy = self.alloc(kind, part, intervals)?;
        self.release(id);
        Ok(copy)
    }

    /// Recompute `weight` and `max_part` of `id` from its children.
    pub(crate) fn refresh(&mut self, id: NodeId) {
        let mut weight: u32 = 0;
        let mut max_part = self.nodes[id.index()].part;
        for iv in &self.nodes[id.index()].intervals {
            weight = weight.saturating_add(1);
            if let Some(next) = iv.next_key_part {
                let child = &self.nodes[next.index()];
                weight = weight.saturating_add(child.weight);
                max_part = max_part.max(child.max_part);
            }
        }
        let node = &mut self.nodes[id.index()];
        node.weight = weight;
        node.max_part = max_part;
    }

    /// Weight recomputed from scratch by walking the graph, independent of the
    /// cached `weight` fields.
    pub fn verify_weight(&self, id: NodeId) -> u64 {
        let mut total = 0u64;
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            for iv in &self.node(id).intervals {
                total += 1;
                stack.extend(iv.next_key_part);
            }
        }
        total
    }

    /// Count references to every node reachable from `roots`, as implied by
    /// the graph structure. Each root contributes one reference.
    pub fn reachable_references(&self, roots: &[NodeId]) -> HashMap<NodeId, u32> {
        let mut refs: HashMap<NodeId, u32> = HashMap::new();
        let mut stack: Vec<NodeId> = roots.to_vec();
        while let Some(id) = stack.pop() {
            let seen = refs.entry(id).or_insert(0);
            *seen += 1;
            if *seen == 1 {
                stack.extend(self.node(id).intervals.iter().filter_map(|iv| iv.next_key_part));
            }
        }
        refs
    }

    /// Whether two graphs denote the same condition structure.
    pub fn same_graph(&self, a: Option<NodeId>, b: Option<NodeId>) -> bool {
        match (a, b) {
            (None, None) => true,
            (Some(a), Some(b)) => {
                if a == b {
                    return true;
                }
                let (x, y) = (self.node(a), self.node(b));
                x.kind == y.kind
                    && x.part == y.part
                    && x.intervals.len() == y.intervals.len()
                    && x.intervals.iter().zip(&y.intervals).all(|(p, q)| {
                        p.min == q.min
                            && p.max == q.max
                            && self.same_graph(p.next_key_part, q.next_key_part)
                    })
            }
            _ => false,
        }
    }

    /// Render a graph for traces and debugging.
    pub fn describe(&self, id: NodeId) -> String {
        let node = self.node(id);
        match node.kind {
            NodeKind::Impossible => "IMPOSSIBLE".to_string(),
            NodeKind::MaybeKey => format!("kp{}: MAYBE", node.part),
            NodeKind::KeyRange => {
                let parts: Vec<String> = node
                    .intervals
                    .iter()
                    .map(|iv| match iv.next_key_part {
                        Some(next) => format!("{iv} -> {{{}}}", self.describe(next)),
                        None => iv.to_string(),
                    })
                    .collect();
                format!("kp{}: {}", node.part, parts.join(" | "))
            }
        }
    }

    pub(crate) fn note_cap_fallback(&mut self) {
        self.counters.cap_fallbacks += 1;
    }

    pub(crate) fn note_merge_drop(&mut self) {
        self.counters.merge_drops += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(v: i64) -> Interval {
        Interval::point(ScalarValue::Int64(v))
    }

    #[test]
    fn test_weight_counts_shared_children_per_link() {
        let mut arena = RangeArena::new(1000, 0);
        let child = arena.alloc(NodeKind::KeyRange, 1, vec![point(1), point(2)]).unwrap();
        let shared = arena.share(child);
        let mut a = point(10);
        a.next_key_part = Some(child);
        let mut b = point(20);
        b.next_key_part = Some(shared);
        let root = arena.alloc(NodeKind::KeyRange, 0, vec![a, b]).unwrap();
        assert_eq!(arena.node(root).weight, 6);
        assert_eq!(arena.verify_weight(root), 6);
        assert_eq!(arena.node(root).max_part, 1);
        assert_eq!(arena.node(child).use_count, 2);
    }

    #[test]
    fn test_make_mut_clones_shared_node() {
        let mut arena = RangeArena::new(1000, 0);
        let child = arena.alloc(NodeKind::KeyRange, 1, vec![point(1)]).unwrap();
        let mut iv = point(5);
        iv.next_key_part = Some(child);
        let node = arena.alloc(NodeKind::KeyRange, 0, vec![iv]).unwrap();
        let other = arena.share(node);

        let copy = arena.make_mut(other).unwrap();
        assert_ne!(copy, node);
        assert_eq!(arena.node(node).use_count, 1);
        assert_eq!(arena.node(copy).use_count, 1);
        // Both parents now hold the child.
        assert_eq!(arena.node(child).use_count, 2);

        let same = arena.make_mut(node).unwrap();
        assert_eq!(same, node);
    }

    #[test]
    fn test_release_cascades() {
        let mut arena = RangeArena::new(1000, 0);
        let child = arena.alloc(NodeKind::KeyRange, 1, vec![point(1)]).unwrap();
        let mut iv = point(5);
        iv.next_key_part = Some(child);
        let root = arena.alloc(NodeKind::KeyRange, 0, vec![iv]).unwrap();
        arena.release(root);
        assert_eq!(arena.node(root).use_count, 0);
        assert_eq!(arena.node(child).use_count, 0);
    }

    #[test]
    fn test_interval_budget_sets_exhausted() {
        let mut arena = RangeArena::new(2, 0);
        arena.alloc(NodeKind::KeyRange, 0, vec![point(1), point(2)]).unwrap();
        assert!(!arena.is_exhausted());
        arena.alloc(NodeKind::KeyRange, 0, vec![point(3)]).unwrap();
        assert!(arena.is_exhausted());
    }

    #[test]
    fn test_empty_leaf_is_impossible() {
        let mut arena = RangeArena::new(10, 0);
        let id = arena
            .leaf(
                0,
                Bound::Included(ScalarValue::Int64(5)),
                Bound::Excluded(ScalarValue::Int64(5)),
            )
            .unwrap();
        assert!(arena.node(id).is_impossible());
    }

    #[test]
    fn test_same_graph_structural() {
        let mut arena = RangeArena::new(100, 0);
        let a = arena.alloc(NodeKind::KeyRange, 1, vec![point(1)]).unwrap();
        let b = arena.alloc(NodeKind::KeyRange, 1, vec![point(1)]).unwrap();
        let c = arena.alloc(NodeKind::KeyRange, 1, vec![point(2)]).unwrap();
        assert!(arena.same_graph(Some(a), Some(b)));
        assert!(!arena.same_graph(Some(a), Some(c)));
        assert!(!arena.same_graph(Some(a), None));
    }
}
