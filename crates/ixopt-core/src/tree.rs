//! # Range Trees and Index-Merge Sets
//!
//! A [`RangeTree`] is the analysis result for (part of) a predicate over one
//! table. It is the conjunction of
//!
//! - a **range part**: for every index, an optional interval graph that all
//!   satisfying rows fall into, and
//! - a **merge part**: zero or more [`MergeSet`]s, each a disjunction of
//!   merge-free trees. Every satisfying row lies inside at least one disjunct
//!   of every merge set.
//!
//! Both parts are *implied* by the predicate; neither has to be exact. A
//! missing tree (`None`) means the predicate could not be analyzed at all.
//!
//! ## Combination Rules
//!
//! `tree_and` intersects the range parts index by index and concatenates the
//! merge parts, after pushing each side's range part into the other side's
//! merge sets. `tree_or` ORs the range parts of indexes present on both sides
//! and, unless that OR is already exact, records the two sides as the
//! disjuncts of a new merge set so an index-merge plan can read them
//! separately.

use crate::context::RangeContext;
use crate::error::OptResult;
use crate::keymap::KeyMap;
use crate::range::NodeId;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum TreeKind {
    /// No row satisfies the predicate.
    Impossible,
    /// Every row satisfies the predicate.
    Always,
    /// The predicate depends on values unknown while optimizing.
    Maybe,
    /// Rows fall into the listed ranges.
    Key,
    /// Like `Key`, but a "maybe" conjunct was folded away, so the true row set
    /// may be smaller than the ranges.
    KeySmaller,
}

#[derive(Debug)]
pub struct RangeTree {
    pub kind: TreeKind,
    /// Interval graph per index ordinal; empty for non-key kinds.
    pub keys: Vec<Option<NodeId>>,
    pub keys_map: KeyMap,
    pub merges: Vec<MergeSet>,
}

/// Disjunction of merge-free trees.
#[derive(Debug)]
pub struct MergeSet {
    pub trees: Vec<RangeTree>,
}

impl RangeTree {
    fn of_kind(kind: TreeKind) -> Self {
        Self {
            kind,
            keys: Vec::new(),
            keys_map: KeyMap::new(),
            merges: Vec::new(),
        }
    }

    pub fn impossible() -> Self {
        Self::of_kind(TreeKind::Impossible)
    }

    pub fn always() -> Self {
        Self::of_kind(TreeKind::Always)
    }

    pub fn maybe() -> Self {
        Self::of_kind(TreeKind::Maybe)
    }

    /// A key tree over `index_count` indexes with no restrictions yet.
    pub fn key(index_count: usize) -> Self {
        Self {
            kind: TreeKind::Key,
            keys: vec![None; index_count],
            keys_map: KeyMap::new(),
            merges: Vec::new(),
        }
    }

    pub fn is_key(&self) -> bool {
        matches!(self.kind, TreeKind::Key | TreeKind::KeySmaller)
    }

    pub fn get(&self, index: usize) -> Option<NodeId> {
        self.keys.get(index).copied().flatten()
    }

    pub fn set_key(&mut self, index: usize, node: Option<NodeId>) {
        if self.keys.len() <= index {
            self.keys.resize(index + 1, None);
        }
        self.keys[index] = node;
        if node.is_some() {
            self.keys_map.set(index);
        } else {
            self.keys_map.clear(index);
        }
    }

    fn take_key(&mut self, index: usize) -> Option<NodeId> {
        let node = self.keys.get_mut(index).and_then(Option::take);
        self.keys_map.clear(index);
        node
    }

    /// A key tree carrying no restriction at all.
    pub fn is_unrestricted(&self) -> bool {
        self.is_key() && self.keys_map.is_empty() && self.merges.is_empty()
    }

    fn mark_smaller(&mut self) {
        if self.kind == TreeKind::Key {
            self.kind = TreeKind::KeySmaller;
        }
    }
}

impl RangeContext {
    /// Release every reference held by `tree`.
    pub fn release_tree(&mut self, tree: RangeTree) {
        for node in tree.keys.into_iter().flatten() {
            self.arena.release(node);
        }
        for merge in tree.merges {
            self.release_merge(merge);
        }
    }

    fn release_merge(&mut self, merge: MergeSet) {
        for t in merge.trees {
            self.release_tree(t);
        }
    }

    /// A copy of `tree` sharing its interval graphs.
    pub fn share_tree(&mut self, tree: &RangeTree) -> RangeTree {
        let mut copy = self.share_range_part(tree);
        copy.kind = tree.kind;
        copy.merges = tree.merges.iter().map(|m| self.share_merge(m)).collect();
        copy
    }

    fn share_merge(&mut self, merge: &MergeSet) -> MergeSet {
        MergeSet {
            trees: merge.trees.iter().map(|t| self.share_tree(t)).collect(),
        }
    }

    /// The range part of `tree` as a merge-free key tree, sharing graphs.
    fn share_range_part(&mut self, tree: &RangeTree) -> RangeTree {
        let mut part = RangeTree::key(self.index_count());
        for idx in tree.keys_map.iter() {
            let node = self.arena.share_opt(tree.get(idx));
            part.set_key(idx, node);
        }
        part
    }

    /// Move the range part out of `tree`.
    fn take_range_part(&mut self, tree: &mut RangeTree) -> RangeTree {
        let mut part = RangeTree::key(self.index_count());
        for idx in tree.keys_map.iter() {
            let node = tree.take_key(idx);
            part.set_key(idx, node);
        }
        part
    }

    /// Conjunction of two trees. Both are consumed.
    pub fn tree_and(
        &mut self,
        t1: Option<RangeTree>,
        t2: Option<RangeTree>,
    ) -> OptResult<Option<RangeTree>> {
        let (mut t1, mut t2) = match (t1, t2) {
            (None, t) | (t, None) => return Ok(t),
            (Some(a), Some(b)) => (a, b),
        };
        self.check_killed()?;
        if t1.kind == TreeKind::Impossible || t2.kind == TreeKind::Always {
            self.release_tree(t2);
            return Ok(Some(t1));
        }
        if t2.kind == TreeKind::Impossible || t1.kind == TreeKind::Always {
            self.release_tree(t1);
            return Ok(Some(t2));
        }
        if t1.kind == TreeKind::Maybe {
            self.release_tree(t1);
            t2.mark_smaller();
            return Ok(Some(t2));
        }
        if t2.kind == TreeKind::Maybe {
            self.release_tree(t2);
            t1.mark_smaller();
            return Ok(Some(t1));
        }
        let smaller = t1.kind == TreeKind::KeySmaller || t2.kind == TreeKind::KeySmaller;

        // Each side's ranges also hold inside every disjunct of the other side's merges.
        let range1 = self.share_range_part(&t1);
        let range2 = self.share_range_part(&t2);
        let merges1 = std::mem::take(&mut t1.merges);
        let merges2 = std::mem::take(&mut t2.merges);
        let mut merges = self.and_merges_with_range(merges1, &range2)?;
        merges.extend(self.and_merges_with_range(merges2, &range1)?);
        self.release_tree(range1);
        self.release_tree(range2);

        let mut result = RangeTree::key(self.index_count());
        result.merges = merges;
        for idx in t1.keys_map.union(t2.keys_map).iter() {
            let a = t1.take_key(idx);
            let b = t2.take_key(idx);
            let node = self.arena.key_and_with_limit(a, b)?;
            let impossible = node.is_some_and(|n| self.arena.node(n).is_impossible());
            result.set_key(idx, node);
            if impossible {
                trace!(index = idx, "conjunction is impossible on index");
                self.release_tree(t1);
                self.release_tree(t2);
                self.release_tree(result);
                return Ok(Some(RangeTree::impossible()));
            }
        }
        self.release_tree(t1);
        self.release_tree(t2);

        if !self.eliminate_single_tree_merges(&mut result)? {
            self.release_tree(result);
            return Ok(Some(RangeTree::impossible()));
        }
        result.kind = if smaller {
            TreeKind::KeySmaller
        } else {
            TreeKind::Key
        };
        Ok(Some(result))
    }

    /// AND a merge-free range tree into every disjunct of `merges`. Disjuncts
    /// that become impossible are removed; a merge losing all of them is dropped.
    fn and_merges_with_range(
        &mut self,
        merges: Vec<MergeSet>,
        range: &RangeTree,
    ) -> OptResult<Vec<MergeSet>> {
        let mut out = Vec::with_capacity(merges.len());
        for merge in merges {
            let mut trees = Vec::with_capacity(merge.trees.len());
            for disjunct in merge.trees {
                let shared = self.share_range_part(range);
                let anded = self.and_range_trees(disjunct, shared)?;
                if anded.kind == TreeKind::Impossible {
                    self.release_tree(anded);
                } else {
                    trees.push(anded);
                }
            }
            if trees.is_empty() {
                debug!("every disjunct of an index-merge set became impossible, dropping the set");
                continue;
            }
            out.push(MergeSet { trees });
        }
        Ok(out)
    }

    /// Index-wise AND of two merge-free trees.
    fn and_range_trees(&mut self, mut a: RangeTree, mut b: RangeTree) -> OptResult<RangeTree> {
        let mut result = RangeTree::key(self.index_count());
        for idx in a.keys_map.union(b.keys_map).iter() {
            let x = a.take_key(idx);
            let y = b.take_key(idx);
            let node = self.arena.key_and_with_limit(x, y)?;
            let impossible = node.is_some_and(|n| self.arena.node(n).is_impossible());
            result.set_key(idx, node);
            if impossible {
                self.release_tree(a);
                self.release_tree(b);
                self.release_tree(result);
                return Ok(RangeTree::impossible());
            }
        }
        self.release_tree(a);
        self.release_tree(b);
        Ok(result)
    }

    /// Fold single-disjunct merges into the range part and drop merges that
    /// contain an unrestricted disjunct. Returns `false` when the tree turned
    /// out to be impossible.
    fn eliminate_single_tree_merges(&mut self, tree: &mut RangeTree) -> OptResult<bool> {
        let mut i = 0;
        while i < tree.merges.len() {
            if tree.merges[i].trees.iter().any(RangeTree::is_unrestricted) {
                let merge = tree.merges.remove(i);
                self.release_merge(merge);
                continue;
            }
            if tree.merges[i].trees.len() != 1 {
                i += 1;
                continue;
            }
            let mut merge = tree.merges.remove(i);
            let Some(mut only) = merge.trees.pop() else {
                continue;
            };
            for idx in only.keys_map.iter() {
                let mine = tree.take_key(idx);
                let theirs = only.take_key(idx);
                let node = self.arena.key_and_with_limit(mine, theirs)?;
                let impossible = node.is_some_and(|n| self.arena.node(n).is_impossible());
                tree.set_key(idx, node);
                if impossible {
                    self.release_tree(only);
                    return Ok(false);
                }
            }
            self.release_tree(only);
        }
        Ok(true)
    }

    /// Disjunction of two trees. Both are consumed.
    pub fn tree_or(
        &mut self,
        t1: Option<RangeTree>,
        t2: Option<RangeTree>,
    ) -> OptResult<Option<RangeTree>> {
        let (mut t1, mut t2) = match (t1, t2) {
            (Some(a), Some(b)) => (a, b),
            (a, b) => {
                for t in [a, b].into_iter().flatten() {
                    self.release_tree(t);
                }
                return Ok(None);
            }
        };
        self.check_killed()?;
        if t1.kind == TreeKind::Impossible || t2.kind == TreeKind::Always {
            self.release_tree(t1);
            return Ok(Some(t2));
        }
        if t2.kind == TreeKind::Impossible || t1.kind == TreeKind::Always {
            self.release_tree(t2);
            return Ok(Some(t1));
        }
        if t1.kind == TreeKind::Maybe {
            self.release_tree(t2);
            return Ok(Some(t1));
        }
        if t2.kind == TreeKind::Maybe {
            self.release_tree(t1);
            return Ok(Some(t2));
        }

        self.remove_nonrange_trees(&mut t1);
        self.remove_nonrange_trees(&mut t2);
        if t1.is_unrestricted() || t2.is_unrestricted() {
            self.release_tree(t1);
            self.release_tree(t2);
            return Ok(None);
        }

        let common = t1.keys_map.intersect(t2.keys_map);
        let exact = t1.merges.is_empty()
            && t2.merges.is_empty()
            && self.trees_must_be_ored(&t1, &t2, common);

        let mut result = RangeTree::key(self.index_count());
        for idx in common.iter() {
            let a = self.arena.share_opt(t1.get(idx));
            let b = self.arena.share_opt(t2.get(idx));
            let node = self.arena.key_or_with_limit(a, b)?;
            result.set_key(idx, node);
        }

        if !exact {
            match (t1.merges.is_empty(), t2.merges.is_empty()) {
                (true, true) => {
                    let r1 = self.take_range_part(&mut t1);
                    let r2 = self.take_range_part(&mut t2);
                    result.merges.push(MergeSet {
                        trees: vec![r1, r2],
                    });
                }
                (false, true) => {
                    let merges = std::mem::take(&mut t1.merges);
                    self.or_merges_with_tree(merges, &t2, &mut result)?;
                }
                (true, false) => {
                    let merges = std::mem::take(&mut t2.merges);
                    self.or_merges_with_tree(merges, &t1, &mut result)?;
                }
                (false, false) => {
                    let m1 = std::mem::take(&mut t1.merges);
                    let m2 = std::mem::take(&mut t2.merges);
                    'pairs: for a in &m1 {
                        for b in &m2 {
                            if result.merges.len() >= self.max_merge_disjuncts {
                                debug!(
                                    limit = self.max_merge_disjuncts,
                                    "index-merge distribution limit reached"
                                );
                                self.arena.note_merge_drop();
                                break 'pairs;
                            }
                            let a = self.share_merge(a);
                            let b = self.share_merge(b);
                            if let Some(m) = self.merge_or_merge(a, b)? {
                                result.merges.push(m);
                            }
                        }
                    }
                    for m in m1.into_iter().chain(m2) {
                        self.release_merge(m);
                    }
                }
            }
        }
        self.release_tree(t1);
        self.release_tree(t2);

        if result.keys_map.is_empty() && result.merges.is_empty() {
            return Ok(None);
        }
        Ok(Some(result))
    }

    /// `(m1 AND m2 AND ...) OR range(other)` distributed as `mi OR range(other)`.
    fn or_merges_with_tree(
        &mut self,
        merges: Vec<MergeSet>,
        other: &RangeTree,
        result: &mut RangeTree,
    ) -> OptResult<()> {
        for merge in merges {
            let range = self.share_range_part(other);
            if let Some(m) = self.merge_or_tree(merge, range)? {
                result.merges.push(m);
            }
        }
        Ok(())
    }

    /// Add a merge-free tree as a disjunct. When an existing disjunct and the
    /// new tree can be ORed exactly over their common indexes they are fused.
    /// `None` means the merge no longer restricts anything and was dropped.
    fn merge_or_tree(
        &mut self,
        mut merge: MergeSet,
        mut tree: RangeTree,
    ) -> OptResult<Option<MergeSet>> {
        for i in 0..merge.trees.len() {
            let common = merge.trees[i].keys_map.intersect(tree.keys_map);
            if common.is_empty() || !self.trees_must_be_ored(&merge.trees[i], &tree, common) {
                continue;
            }
            let mut fused = RangeTree::key(self.index_count());
            for idx in common.iter() {
                let a = merge.trees[i].take_key(idx);
                let b = tree.take_key(idx);
                let node = self.arena.key_or_with_limit(a, b)?;
                fused.set_key(idx, node);
            }
            self.release_tree(tree);
            if fused.is_unrestricted() {
                self.release_merge(merge);
                return Ok(None);
            }
            let old = std::mem::replace(&mut merge.trees[i], fused);
            self.release_tree(old);
            return Ok(Some(merge));
        }
        merge.trees.push(tree);
        if merge.trees.len() > self.max_merge_disjuncts {
            debug!(
                disjuncts = merge.trees.len(),
                limit = self.max_merge_disjuncts,
                "index-merge set too large, dropping it"
            );
            self.arena.note_merge_drop();
            self.release_merge(merge);
            return Ok(None);
        }
        Ok(Some(merge))
    }

    fn merge_or_merge(&mut self, a: MergeSet, b: MergeSet) -> OptResult<Option<MergeSet>> {
        let mut acc = a;
        let mut rest = b.trees.into_iter();
        while let Some(tree) = rest.next() {
            match self.merge_or_tree(acc, tree)? {
                Some(m) => acc = m,
                None => {
                    for t in rest {
                        self.release_tree(t);
                    }
                    return Ok(None);
                }
            }
        }
        Ok(Some(acc))
    }

    /// Whether ORing two merge-free trees index by index loses nothing.
    ///
    /// That holds when both trees constrain exactly the indexes in `common`
    /// and, for every pair of those indexes, the columns constrained on one
    /// index line up with the columns constrained on the other.
    pub fn trees_must_be_ored(&self, t1: &RangeTree, t2: &RangeTree, common: KeyMap) -> bool {
        if t1.keys_map.union(t2.keys_map) != common {
            return false;
        }
        let indexes: Vec<usize> = common.iter().collect();
        for (i, &idx1) in indexes.iter().enumerate() {
            for &idx2 in &indexes[i + 1..] {
                let (Some(a), Some(b)) = (t1.get(idx1), t2.get(idx2)) else {
                    return false;
                };
                let cols1 = self.constrained_columns(idx1, a);
                let cols2 = self.constrained_columns(idx2, b);
                let len = cols1.len().min(cols2.len());
                if cols1[..len] != cols2[..len] {
                    return false;
                }
            }
        }
        true
    }

    /// Drop index graphs whose first constrained key part is not the index's
    /// first part: such graphs cannot be scanned as ranges.
    pub fn remove_nonrange_trees(&mut self, tree: &mut RangeTree) {
        for idx in tree.keys_map.iter() {
            if let Some(node) = tree.get(idx) {
                if self.arena.node(node).part != 0 {
                    tree.take_key(idx);
                    self.arena.release(node);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnDef, DataType, IndexDef, TableInfo};
    use crate::expr::{ScalarValue, TableRef};
    use crate::search::SearchConfig;
    use std::ops::Bound;

    fn table() -> TableInfo {
        let int = DataType::Int { bits: 32, unsigned: false };
        TableInfo::new(
            TableRef::new("test", "t"),
            vec![
                ColumnDef::new("a", int, true),
                ColumnDef::new("b", int, true),
                ColumnDef::new("c", int, true),
                ColumnDef::new("d", int, true),
            ],
        )
        .with_index(IndexDef::new("ia", &[0]))
        .with_index(IndexDef::new("ib", &[1]))
        .with_index(IndexDef::new("ic", &[2]))
        .with_index(IndexDef::new("id", &[3]))
    }

    fn ctx() -> RangeContext {
        RangeContext::new(&table(), &SearchConfig::default()).unwrap()
    }

    fn ctx_with_merge_limit(limit: usize) -> RangeContext {
        let config = SearchConfig {
            max_merge_disjuncts: limit,
            ..SearchConfig::default()
        };
        RangeContext::new(&table(), &config).unwrap()
    }

    /// `(x = v1 OR y = v2)` over indexes `x` and `y`.
    fn or_pair(ctx: &mut RangeContext, x: usize, v1: i64, y: usize, v2: i64) -> Option<RangeTree> {
        let l = point_tree(ctx, x, v1);
        let r = point_tree(ctx, y, v2);
        ctx.tree_or(Some(l), Some(r)).unwrap()
    }

    fn point_tree(ctx: &mut RangeContext, index: usize, v: i64) -> RangeTree {
        let node = ctx
            .arena
            .leaf(0, Bound::Included(ScalarValue::Int64(v)), Bound::Included(ScalarValue::Int64(v)))
            .unwrap();
        let mut t = RangeTree::key(ctx.index_count());
        t.set_key(index, Some(node));
        t
    }

    #[test]
    fn test_and_with_impossible() {
        let mut ctx = ctx();
        let t = point_tree(&mut ctx, 0, 1);
        let r = ctx
            .tree_and(Some(t), Some(RangeTree::impossible()))
            .unwrap()
            .unwrap();
        assert_eq!(r.kind, TreeKind::Impossible);
    }

    #[test]
    fn test_or_with_always() {
        let mut ctx = ctx();
        let t = point_tree(&mut ctx, 0, 1);
        let r = ctx.tree_or(Some(t), Some(RangeTree::always())).unwrap().unwrap();
        assert_eq!(r.kind, TreeKind::Always);
    }

    #[test]
    fn test_or_on_different_indexes_builds_merge() {
        let mut ctx = ctx();
        let a = point_tree(&mut ctx, 0, 1);
        let b = point_tree(&mut ctx, 1, 2);
        let r = ctx.tree_or(Some(a), Some(b)).unwrap().unwrap();
        assert!(r.keys_map.is_empty());
        assert_eq!(r.merges.len(), 1);
        assert_eq!(r.merges[0].trees.len(), 2);
    }

    #[test]
    fn test_or_on_same_index_is_exact() {
        let mut ctx = ctx();
        let a = point_tree(&mut ctx, 0, 1);
        let b = point_tree(&mut ctx, 0, 5);
        let r = ctx.tree_or(Some(a), Some(b)).unwrap().unwrap();
        assert!(r.merges.is_empty());
        let node = r.get(0).unwrap();
        assert_eq!(ctx.arena.node(node).intervals.len(), 2);
    }

    #[test]
    fn test_and_folds_single_disjunct_merge() {
        let mut ctx = ctx();
        // (a = 1 OR b = 2) AND a = 3: the a = 1 disjunct vanishes, leaving b = 2 AND a = 3.
        let a1 = point_tree(&mut ctx, 0, 1);
        let b2 = point_tree(&mut ctx, 1, 2);
        let or = ctx.tree_or(Some(a1), Some(b2)).unwrap();
        let a3 = point_tree(&mut ctx, 0, 3);
        let r = ctx.tree_and(or, Some(a3)).unwrap().unwrap();
        assert_eq!(r.kind, TreeKind::Key);
        assert!(r.merges.is_empty());
        assert!(r.keys_map.contains(0) && r.keys_map.contains(1));
    }

    #[test]
    fn test_or_with_unanalyzable_side_is_unrestricted() {
        let mut ctx = ctx();
        let a = point_tree(&mut ctx, 0, 1);
        assert!(ctx.tree_or(Some(a), None).unwrap().is_none());
    }

    #[test]
    fn test_merge_over_disjunct_limit_is_dropped() {
        let mut ctx = ctx_with_merge_limit(2);
        let ab = or_pair(&mut ctx, 0, 1, 1, 2);
        assert_eq!(ab.as_ref().unwrap().merges[0].trees.len(), 2);
        // A third disjunct on another index would exceed the limit.
        let c = point_tree(&mut ctx, 2, 3);
        let r = ctx.tree_or(ab, Some(c)).unwrap();
        assert!(r.is_none(), "an unrestricted tree keeps every row");
        assert_eq!(ctx.arena.counters().merge_drops, 1);
    }

    #[test]
    fn test_merge_within_disjunct_limit_is_kept() {
        let mut ctx = ctx_with_merge_limit(3);
        let ab = or_pair(&mut ctx, 0, 1, 1, 2);
        let c = point_tree(&mut ctx, 2, 3);
        let r = ctx.tree_or(ab, Some(c)).unwrap().unwrap();
        assert_eq!(r.merges.len(), 1);
        assert_eq!(r.merges[0].trees.len(), 3);
        assert_eq!(ctx.arena.counters().merge_drops, 0);
    }

    #[test]
    fn test_merge_distribution_stops_at_limit() {
        let mut ctx = ctx_with_merge_limit(2);
        // (a=1 OR b=2) AND (c=3 OR d=4)
        let m1 = or_pair(&mut ctx, 0, 1, 1, 2);
        let m2 = or_pair(&mut ctx, 2, 3, 3, 4);
        let t1 = ctx.tree_and(m1, m2).unwrap().unwrap();
        assert_eq!(t1.merges.len(), 2);
        // (a=5 OR b=6) AND (c=7 OR d=8) AND (a=9 OR b=10)
        let m1 = or_pair(&mut ctx, 0, 5, 1, 6);
        let m2 = or_pair(&mut ctx, 2, 7, 3, 8);
        let m3 = or_pair(&mut ctx, 0, 9, 1, 10);
        let t2 = ctx.tree_and(m1, m2).unwrap();
        let t2 = ctx.tree_and(t2, m3).unwrap().unwrap();
        assert_eq!(t2.merges.len(), 3);

        let r = ctx.tree_or(Some(t1), Some(t2)).unwrap().unwrap();
        // Only the a/b pairings survive: one mixed pairing overflows a set,
        // then the distribution stops once two sets are built.
        assert_eq!(r.merges.len(), 2);
        for merge in &r.merges {
            assert_eq!(merge.trees.len(), 2);
            assert!(merge.trees[0].keys_map.contains(0));
            assert!(merge.trees[1].keys_map.contains(1));
            let a = ctx.arena.node(merge.trees[0].get(0).unwrap());
            assert_eq!(a.intervals.len(), 2);
        }
        assert_eq!(ctx.arena.counters().merge_drops, 2);
    }

    #[test]
    fn test_maybe_and_key_is_key_smaller() {
        let mut ctx = ctx();
        let a = point_tree(&mut ctx, 0, 1);
        let r = ctx.tree_and(Some(RangeTree::maybe()), Some(a)).unwrap().unwrap();
        assert_eq!(r.kind, TreeKind::KeySmaller);
    }
}
