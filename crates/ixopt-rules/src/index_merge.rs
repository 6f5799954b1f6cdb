//! # Index Merge Rule
//!
//! Implements an OR over different indexes. Each merge set of the range tree
//! is a disjunction whose branches restrict different indexes; the rule
//! picks the cheapest range scan of every branch and unions their rows.
//!
//! ## Plans
//!
//! - **Sort-union** (`IndexMerge`): row identifiers of all scans go through
//!   the de-duplication structure, then the rows are fetched with one sweep.
//!   A clustered primary key branch is read directly; rows of the other
//!   branches are compared against its ranges instead.
//! - **ROR union** (`RorUnion`): when every branch scan is rowid-ordered the
//!   sorted streams are merged with a priority queue and no de-duplication
//!   structure is needed.
//!
//! Branches whose best scans use the same index are combined first: their
//! graphs are ORed and the result is priced as one scan.
//!
//! A branch without any usable range scan makes the merge set unusable: that
//! branch alone would need a full table scan.

use ixopt_core::catalog::IndexId;
use ixopt_core::cost::Cost;
use ixopt_core::error::OptResult;
use ixopt_core::plan::{CandidatePlan, IndexMergePlan, RorUnionPlan};
use ixopt_core::rule::{AccessRule, PlanContext};
use ixopt_core::scan::{cost_range_scan, estimate_range_scans, RangeScan, ScanCandidate};
use ixopt_core::search::SearchConfig;
use ixopt_core::trace::TraceRecord;
use ixopt_core::tree::{MergeSet, TreeKind};
use tracing::{debug, trace};

pub struct IndexMergeRule;

impl AccessRule for IndexMergeRule {
    fn name(&self) -> &str {
        "index_merge"
    }

    fn enabled(&self, config: &SearchConfig) -> bool {
        config.index_merge && (config.index_merge_union || config.index_merge_sort_union)
    }

    fn apply(&self, ctx: &mut PlanContext<'_>) -> OptResult<Option<CandidatePlan>> {
        let Some(tree) = ctx.tree else {
            return Ok(None);
        };
        if tree.merges.is_empty() {
            ctx.trace.set("cause", "no disjunction over indexes");
            return Ok(None);
        }
        let mut best: Option<CandidatePlan> = None;
        for (i, merge) in tree.merges.iter().enumerate() {
            ctx.range.check_killed()?;
            let mut merge_trace = TraceRecord::new("merge").with("ordinal", i);
            let plan = self.plan_merge(ctx, merge, &mut merge_trace)?;
            ctx.trace.push(merge_trace);
            if let Some(plan) = plan {
                let bound = best.as_ref().map_or(ctx.best_cost, |b| b.cost());
                if plan.cost() < bound {
                    best = Some(plan);
                }
            }
        }
        Ok(best)
    }
}

impl IndexMergeRule {
    fn plan_merge(
        &self,
        ctx: &mut PlanContext<'_>,
        merge: &MergeSet,
        trace_rec: &mut TraceRecord,
    ) -> OptResult<Option<CandidatePlan>> {
        if !merge_is_usable(merge) {
            trace_rec.set("cause", "disjunct without range condition");
            return Ok(None);
        }
        // Best scan per disjunct.
        let mut branches: Vec<ScanCandidate> = Vec::with_capacity(merge.trees.len());
        for disjunct in &merge.trees {
            let mut branch_trace = TraceRecord::new("disjunct");
            let scans = estimate_range_scans(
                ctx.range,
                ctx.table,
                ctx.oracle,
                ctx.query,
                disjunct,
                &mut branch_trace,
            );
            let Some(best) = scans.into_iter().next() else {
                branch_trace.set("cause", "no usable range");
                trace_rec.push(branch_trace);
                return Ok(None);
            };
            branch_trace.set("chosen", &best.scan.index_name);
            trace_rec.push(branch_trace);
            branches.push(best);
        }

        let scans = self.combine_same_index(ctx, branches)?;
        trace_rec.set(
            "indexes",
            scans.iter().map(|s| s.index_name.as_str()).collect::<Vec<_>>(),
        );
        if scans.len() == 1 {
            // Every branch used the same index: a plain range scan.
            let scan = scans.into_iter().next();
            return Ok(scan
                .filter(|s| s.cost < ctx.best_cost)
                .map(CandidatePlan::RangeScan));
        }

        let sort_union = if ctx.config.index_merge_sort_union {
            self.sort_union(ctx, &scans)
        } else {
            None
        };
        let ror_union = if ctx.config.index_merge_union && scans.iter().all(|s| s.ror) {
            self.ror_union(ctx, &scans)
        } else {
            None
        };
        if let Some(p) = &sort_union {
            trace_rec.set("sort_union_cost", p.cost().total);
        }
        if let Some(p) = &ror_union {
            trace_rec.set("ror_union_cost", p.cost().total);
        }
        Ok(match (sort_union, ror_union) {
            (Some(a), Some(b)) => Some(if b.cost() < a.cost() { b } else { a }),
            (a, b) => a.or(b),
        })
    }

    /// Replace branches scanning the same index by one scan over the OR of
    /// their graphs.
    fn combine_same_index(
        &self,
        ctx: &mut PlanContext<'_>,
        branches: Vec<ScanCandidate>,
    ) -> OptResult<Vec<RangeScan>> {
        let mut groups: Vec<(IndexId, Vec<ScanCandidate>)> = Vec::new();
        for b in branches {
            match groups.iter_mut().find(|(idx, _)| *idx == b.scan.index) {
                Some((_, g)) => g.push(b),
                None => groups.push((b.scan.index, vec![b])),
            }
        }
        let mut out = Vec::with_capacity(groups.len());
        for (index, group) in groups {
            if group.len() == 1 {
                out.extend(group.into_iter().map(|c| c.scan));
                continue;
            }
            let mut acc = Some(ctx.range.arena.share(group[0].node));
            for c in &group[1..] {
                let node = ctx.range.arena.share(c.node);
                acc = ctx.range.arena.key_or(acc, Some(node))?;
            }
            let combined = match acc {
                Some(node) => {
                    let scan = cost_range_scan(ctx.range, ctx.table, ctx.oracle, ctx.query, index, node);
                    ctx.range.arena.release(node);
                    scan
                }
                None => None,
            };
            match combined {
                Some(scan) => {
                    trace!(index = %scan.index_name, branches = group.len(), "combined same-index branches");
                    out.push(scan);
                }
                None => out.extend(group.into_iter().map(|c| c.scan)),
            }
        }
        Ok(out)
    }

    fn sort_union(&self, ctx: &PlanContext<'_>, scans: &[RangeScan]) -> Option<CandidatePlan> {
        let table = ctx.table;
        let oracle = ctx.oracle;
        let cpk = scans.iter().position(|s| table.is_clustered_pk(s.index));
        let mut cost = Cost::zero();
        let mut non_cpk_rows = 0.0;
        for (i, s) in scans.iter().enumerate() {
            if Some(i) == cpk {
                cost += s.cost;
            } else {
                cost += s.index_only_cost;
                non_cpk_rows += s.rows;
            }
            if cost >= ctx.best_cost {
                debug!(cost = cost.total, "index merge scans exceed the budget");
                return None;
            }
        }
        if cpk.is_some() {
            cost += Cost::new(non_cpk_rows * oracle.rowid_compare_cost());
        }
        let table_rows = oracle.table_rows();
        let rows = scans.iter().map(|s| s.rows).sum::<f64>().min(table_rows);
        cost += oracle.unique_use_cost(non_cpk_rows, table.ref_length(), ctx.config.sort_buffer_size);
        cost += oracle.rowid_sweep_cost(non_cpk_rows.min(table_rows));
        cost += Cost::new(rows * oracle.row_evaluate_cost());

        let (cpk_scan, scans) = split_cpk(scans, cpk);
        Some(CandidatePlan::IndexMerge(IndexMergePlan {
            scans,
            cpk_scan,
            rows,
            cost,
        }))
    }

    fn ror_union(&self, ctx: &PlanContext<'_>, scans: &[RangeScan]) -> Option<CandidatePlan> {
        let oracle = ctx.oracle;
        let table_rows = oracle.table_rows();
        let mut cost = Cost::zero();
        for s in scans {
            cost += s.index_only_cost;
        }
        let scanned: f64 = scans.iter().map(|s| s.rows).sum();
        let rows = scanned.min(table_rows);
        let n = scans.len() as f64;
        cost += Cost::new(scanned * oracle.rowid_compare_cost() * n.log2().max(1.0));
        let covering = scans.iter().all(|s| s.covering);
        if !covering {
            cost += oracle.rowid_sweep_cost(rows);
        }
        cost += Cost::new(rows * oracle.row_evaluate_cost());
        if cost >= ctx.best_cost {
            return None;
        }
        Some(CandidatePlan::RorUnion(RorUnionPlan {
            children: scans.iter().cloned().map(CandidatePlan::RangeScan).collect(),
            rows,
            cost,
        }))
    }
}

fn split_cpk(scans: &[RangeScan], cpk: Option<usize>) -> (Option<RangeScan>, Vec<RangeScan>) {
    let mut rest = Vec::with_capacity(scans.len());
    let mut cpk_scan = None;
    for (i, s) in scans.iter().enumerate() {
        if Some(i) == cpk {
            cpk_scan = Some(s.clone());
        } else {
            rest.push(s.clone());
        }
    }
    (cpk_scan, rest)
}

/// Whether a merge set can possibly produce a plan.
fn merge_is_usable(merge: &MergeSet) -> bool {
    merge.trees.len() >= 2
        && merge
            .trees
            .iter()
            .all(|t| t.is_key() && t.kind != TreeKind::Impossible && !t.keys_map.is_empty())
}
