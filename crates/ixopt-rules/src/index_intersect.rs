//! # Sort-based Index Intersection Rule
//!
//! Intersects range scans that are not rowid-ordered: the row identifiers of
//! every scan go through the de-duplication structure, the sorted streams are
//! intersected, and the surviving rows are fetched with one rowid sweep.
//!
//! ## Search
//!
//! The cheapest scans by index-only cost (at most `index_intersect_cutoff`)
//! are explored depth first. A partial intersection is only extended by a
//! scan that strictly reduces its estimated output rows, and a branch is cut
//! as soon as its accumulated read and de-duplication cost alone reaches the
//! best complete plan found so far.
//!
//! ```text
//! cost = sum(index only read) + sum(unique use cost of scan rows)
//!      + rowid sweep of output rows + output rows * row_evaluate
//! ```

use ixopt_core::cost::{Cost, CostOracle};
use ixopt_core::error::OptResult;
use ixopt_core::plan::{CandidatePlan, IndexIntersectPlan};
use ixopt_core::rule::{AccessRule, PlanContext};
use ixopt_core::scan::RangeScan;
use ixopt_core::search::SearchConfig;
use tracing::{debug, trace};

pub struct IndexIntersectRule;

impl AccessRule for IndexIntersectRule {
    fn name(&self) -> &str {
        "index_intersect"
    }

    fn enabled(&self, config: &SearchConfig) -> bool {
        config.index_merge && config.index_merge_sort_intersection
    }

    fn apply(&self, ctx: &mut PlanContext<'_>) -> OptResult<Option<CandidatePlan>> {
        let table = ctx.table;
        let oracle = ctx.oracle;
        let key_size = table.ref_length();
        let budget = ctx.config.sort_buffer_size;

        let mut candidates: Vec<Candidate<'_>> = ctx
            .scans
            .iter()
            .map(|c| &c.scan)
            .filter(|s| !table.is_clustered_pk(s.index) && s.index_only_cost < ctx.best_cost)
            .map(|s| Candidate {
                scan: s,
                unique_cost: oracle.unique_use_cost(s.rows, key_size, budget),
            })
            .collect();
        candidates.sort_by(|a, b| a.scan.index_only_cost.total.total_cmp(&b.scan.index_only_cost.total));
        candidates.truncate(ctx.config.index_intersect_cutoff);
        ctx.trace.set("candidates", candidates.len());
        if candidates.len() < 2 {
            ctx.trace.set("cause", "too few scans");
            return Ok(None);
        }

        let mut search = IntersectSearch {
            oracle,
            table_rows: oracle.table_rows(),
            candidates: &candidates,
            best: None,
            best_cost: ctx.best_cost,
            explored: 0,
        };
        let root = Partial {
            chosen: Vec::new(),
            rows: search.table_rows,
            cost: Cost::zero(),
        };
        search.extend(&root, 0);
        ctx.trace.set("explored", search.explored);
        debug!(explored = search.explored, found = search.best.is_some(), "index intersection search done");

        let Some((chosen, rows, cost)) = search.best else {
            return Ok(None);
        };
        ctx.trace.set("rows", rows);
        ctx.trace.set(
            "indexes",
            chosen
                .iter()
                .map(|&i| candidates[i].scan.index_name.as_str())
                .collect::<Vec<_>>(),
        );
        Ok(Some(CandidatePlan::IndexIntersection(IndexIntersectPlan {
            scans: chosen.iter().map(|&i| candidates[i].scan.clone()).collect(),
            rows,
            cost,
        })))
    }
}

struct Candidate<'s> {
    scan: &'s RangeScan,
    unique_cost: Cost,
}

/// A partial intersection: chosen candidates, output rows and the cost of
/// reading and de-duplicating their row identifiers.
struct Partial {
    chosen: Vec<usize>,
    rows: f64,
    cost: Cost,
}

struct IntersectSearch<'s> {
    oracle: &'s dyn CostOracle,
    table_rows: f64,
    candidates: &'s [Candidate<'s>],
    best: Option<(Vec<usize>, f64, Cost)>,
    best_cost: Cost,
    explored: usize,
}

impl IntersectSearch<'_> {
    /// Cost of a complete plan with `partial` as its scans.
    fn complete_cost(&self, partial: &Partial) -> Cost {
        partial.cost
            + self.oracle.rowid_sweep_cost(partial.rows)
            + Cost::new(partial.rows * self.oracle.row_evaluate_cost())
    }

    fn extend(&mut self, partial: &Partial, from: usize) {
        // Depth is bounded by the candidate cutoff.
        for next in from..self.candidates.len() {
            self.explored += 1;
            let c = &self.candidates[next];
            let rows = if partial.chosen.is_empty() {
                c.scan.rows
            } else if self.table_rows > 0.0 {
                (partial.rows * c.scan.rows / self.table_rows).max(1.0)
            } else {
                0.0
            };
            if !partial.chosen.is_empty() && rows >= partial.rows {
                continue;
            }
            let cost = partial.cost + c.scan.index_only_cost + c.unique_cost;
            if cost >= self.best_cost {
                continue;
            }
            let mut chosen = partial.chosen.clone();
            chosen.push(next);
            let extended = Partial { chosen, rows, cost };
            if extended.chosen.len() >= 2 {
                let total = self.complete_cost(&extended);
                if total < self.best_cost {
                    trace!(scans = extended.chosen.len(), rows, cost = total.total, "better index intersection");
                    self.best_cost = total;
                    self.best = Some((extended.chosen.clone(), rows, total));
                }
            }
            self.extend(&extended, next + 1);
        }
    }
}
