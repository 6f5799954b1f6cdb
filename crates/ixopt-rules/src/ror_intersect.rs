//! # ROR Intersection Rule
//!
//! Intersects rowid-ordered (ROR) range scans. Every ROR scan returns its
//! rows sorted by row identifier, so the scans can be merged in one pass
//! without a de-duplication structure.
//!
//! ## Greedy Search
//!
//! Scans are considered in ascending order of the bytes they read
//! (`rows * (key length + row id length)`). A scan is added while it strictly
//! reduces the estimated output rows. The cheapest prefix with at least two
//! scans is kept.
//!
//! A scan's selectivity is conditioned on the columns already constrained.
//! Walking its key parts in order, every part on a new column contributes
//! `rows(prefix through the part) / rows(prefix before it)`; parts on columns
//! the intersection already constrains contribute nothing. A scan over only
//! constrained columns therefore has selectivity 1 and is skipped.
//!
//! ```text
//! cost = sum(index only read) + scanned rows * rowid_compare * log2(#scans)
//!      + rowid sweep of output rows (unless the scans cover the query)
//!      + output rows * row_evaluate
//! ```
//!
//! A clustered primary key scan is never merged; it filters the
//! intersection result instead (each row identifier is checked against its
//! ranges).
//!
//! ## Covering Variant
//!
//! Independently, scans are picked by the number of query columns they add
//! to the covered set (ties: fewer key parts, then the lowest uncovered
//! column) until the query is covered. Such a plan never reads full rows.

use ixopt_core::catalog::TableInfo;
use ixopt_core::cost::{Cost, CostOracle};
use ixopt_core::error::OptResult;
use ixopt_core::plan::{CandidatePlan, RorIntersectPlan};
use ixopt_core::rule::{AccessRule, PlanContext};
use ixopt_core::scan::{RangeScan, ScanCandidate};
use ixopt_core::search::SearchConfig;
use ixopt_core::trace::TraceRecord;
use std::collections::BTreeSet;
use tracing::trace;

pub struct RorIntersectRule;

impl AccessRule for RorIntersectRule {
    fn name(&self) -> &str {
        "ror_intersect"
    }

    fn enabled(&self, config: &SearchConfig) -> bool {
        config.index_merge && config.index_merge_intersection
    }

    fn apply(&self, ctx: &mut PlanContext<'_>) -> OptResult<Option<CandidatePlan>> {
        let table = ctx.table;
        let scans = ctx.scans;
        let mut ror: Vec<RorScan<'_>> = scans
            .iter()
            .filter(|c| c.scan.ror && !table.is_clustered_pk(c.scan.index))
            .map(|c| RorScan::new(ctx, c))
            .collect();
        let cpk = scans
            .iter()
            .find(|c| table.is_clustered_pk(c.scan.index))
            .map(|c| RorScan::new(ctx, c));
        ctx.trace.set("ror_scans", ror.len());
        if ror.len() < 2 {
            ctx.trace.set("cause", "too few rowid-ordered scans");
            return Ok(None);
        }
        ror.sort_by(|a, b| scan_bytes(table, a.scan).total_cmp(&scan_bytes(table, b.scan)));

        let greedy = best_ror_intersect(ctx, &ror, cpk.as_ref());
        let covering = covering_ror_intersect(ctx, &ror);
        let best = match (greedy, covering) {
            (Some(a), Some(b)) => Some(if b.cost < a.cost { b } else { a }),
            (a, b) => a.or(b),
        };
        Ok(best
            .filter(|p| p.cost < ctx.best_cost)
            .map(CandidatePlan::RorIntersection))
    }
}

fn scan_bytes(table: &TableInfo, scan: &RangeScan) -> f64 {
    scan.rows * (table.key_length(scan.index) + table.ref_length()) as f64
}

/// Columns of the key parts a scan constrains.
fn constrained_columns(table: &TableInfo, scan: &RangeScan) -> BTreeSet<usize> {
    table.indexes[scan.index]
        .parts
        .iter()
        .take(scan.used_key_parts)
        .map(|p| p.column)
        .collect()
}

/// A rowid-ordered scan with the row estimates of its key prefixes.
struct RorScan<'s> {
    scan: &'s RangeScan,
    /// `prefix_rows[p]` is the row estimate of the ranges cut to `p` key
    /// parts: the table for `p = 0`, the scan itself for `used_key_parts`.
    /// `None` when the oracle cannot estimate some prefix.
    prefix_rows: Option<Vec<f64>>,
}

impl<'s> RorScan<'s> {
    fn new(ctx: &PlanContext<'_>, candidate: &'s ScanCandidate) -> Self {
        let scan = &candidate.scan;
        let mut rows = vec![ctx.oracle.table_rows()];
        let mut known = true;
        for p in 1..scan.used_key_parts {
            let ranges = ctx.range.key_ranges(scan.index, candidate.node, p);
            match ctx.oracle.records_in_ranges(scan.index, &ranges) {
                Some(r) => rows.push(r),
                None => {
                    known = false;
                    break;
                }
            }
        }
        rows.push(scan.rows);
        Self {
            scan,
            prefix_rows: known.then_some(rows),
        }
    }
}

/// Running state of an intersection under construction.
#[derive(Clone)]
struct Intersection<'s> {
    scans: Vec<&'s RangeScan>,
    constrained: BTreeSet<usize>,
    readable: BTreeSet<usize>,
    out_rows: f64,
}

impl<'s> Intersection<'s> {
    fn new(table_rows: f64) -> Self {
        Self {
            scans: Vec::new(),
            constrained: BTreeSet::new(),
            readable: BTreeSet::new(),
            out_rows: table_rows,
        }
    }

    /// Fraction of the current output kept by adding `ror`, given the
    /// columns the intersection already constrains.
    fn selectivity(&self, table: &TableInfo, ror: &RorScan<'_>, table_rows: f64) -> f64 {
        let scan = ror.scan;
        if constrained_columns(table, scan).is_subset(&self.constrained) || table_rows <= 0.0 {
            return 1.0;
        }
        let Some(prefix) = &ror.prefix_rows else {
            // Without prefix estimates the whole scan counts as independent.
            return (scan.rows / table_rows).clamp(0.0, 1.0);
        };
        let parts = &table.indexes[scan.index].parts;
        let mut sel = 1.0;
        for (p, part) in parts.iter().take(scan.used_key_parts).enumerate() {
            if self.constrained.contains(&part.column) {
                continue;
            }
            let (before, after) = (prefix[p], prefix[p + 1]);
            sel *= if before > 0.0 { (after / before).clamp(0.0, 1.0) } else { 0.0 };
        }
        sel
    }

    fn add(&mut self, table: &TableInfo, scan: &'s RangeScan, selectivity: f64) {
        self.out_rows = (self.out_rows * selectivity).max(if self.out_rows > 0.0 { 1.0 } else { 0.0 });
        self.constrained.extend(constrained_columns(table, scan));
        self.readable.extend(scan.key_columns.iter().copied());
        self.scans.push(scan);
    }

    fn is_covering(&self, used: &BTreeSet<usize>) -> bool {
        used.is_subset(&self.readable)
    }

    fn cost(&self, oracle: &dyn CostOracle, covering: bool, filter_rows: Option<f64>) -> Cost {
        let mut total = Cost::zero();
        for s in &self.scans {
            total += s.index_only_cost;
        }
        let scanned: f64 = self.scans.iter().map(|s| s.rows).sum();
        let n = self.scans.len() as f64;
        total += Cost::new(scanned * oracle.rowid_compare_cost() * n.log2().max(1.0));
        if let Some(rows) = filter_rows {
            total += Cost::new(rows * oracle.rowid_compare_cost());
        }
        if !covering {
            total += oracle.rowid_sweep_cost(self.out_rows);
        }
        total + Cost::new(self.out_rows * oracle.row_evaluate_cost())
    }
}

fn to_plan(
    state: &Intersection<'_>,
    cpk: Option<&RangeScan>,
    covering: bool,
    cost: Cost,
) -> RorIntersectPlan {
    RorIntersectPlan {
        scans: state.scans.iter().map(|s| (*s).clone()).collect(),
        cpk_scan: cpk.cloned(),
        covering,
        rows: state.out_rows,
        cost,
    }
}

fn best_ror_intersect<'s>(
    ctx: &mut PlanContext<'_>,
    ror: &[RorScan<'s>],
    cpk: Option<&RorScan<'s>>,
) -> Option<RorIntersectPlan> {
    let table = ctx.table;
    let table_rows = ctx.oracle.table_rows();
    let used = &ctx.query.used_columns;
    let mut state = Intersection::new(table_rows);
    let mut best: Option<(Intersection<'s>, Cost)> = None;
    let mut steps = TraceRecord::new("intersecting_indexes");

    for r in ror {
        let scan = r.scan;
        let sel = state.selectivity(table, r, table_rows);
        if sel >= 1.0 {
            steps.push(
                TraceRecord::new("index")
                    .with("index", &scan.index_name)
                    .with("usable", false)
                    .with("cause", "does not reduce rows"),
            );
            continue;
        }
        state.add(table, scan, sel);
        let covering = state.is_covering(used);
        let cost = state.cost(ctx.oracle, covering, None);
        steps.push(
            TraceRecord::new("index")
                .with("index", &scan.index_name)
                .with("rows", state.out_rows)
                .with("cumulative_cost", cost.total)
                .with("covering", covering),
        );
        if state.scans.len() >= 2 && best.as_ref().map_or(true, |(_, c)| cost < *c) {
            best = Some((state.clone(), cost));
        }
        if covering {
            break;
        }
    }
    ctx.trace.push(steps);

    let (mut state, mut cost) = best?;
    let covering = state.is_covering(used);
    let mut cpk_used = None;
    if let (Some(cpk), false) = (cpk, covering) {
        // Filter through the clustered key ranges instead of reading them.
        let sel = state.selectivity(table, cpk, table_rows);
        if sel < 1.0 {
            let mut filtered = state.clone();
            let before = filtered.out_rows;
            filtered.out_rows = (before * sel).max(1.0);
            let filtered_cost = filtered.cost(ctx.oracle, false, Some(before));
            if filtered_cost < cost {
                trace!(index = %cpk.scan.index_name, rows = filtered.out_rows, "clustered key filter added");
                state = filtered;
                cost = filtered_cost;
                cpk_used = Some(cpk.scan);
            }
        }
    }
    ctx.trace.set("rows", state.out_rows);
    ctx.trace.set("intersect_cost", cost.total);
    Some(to_plan(&state, cpk_used, covering, cost))
}

fn covering_ror_intersect(ctx: &mut PlanContext<'_>, ror: &[RorScan<'_>]) -> Option<RorIntersectPlan> {
    let table = ctx.table;
    let table_rows = ctx.oracle.table_rows();
    let used = &ctx.query.used_columns;
    if used.is_empty() {
        return None;
    }
    let mut remaining: Vec<&RorScan<'_>> = ror.iter().collect();
    let mut state = Intersection::new(table_rows);
    while !state.is_covering(used) {
        let pick = remaining
            .iter()
            .enumerate()
            .map(|(i, r)| {
                let s = r.scan;
                let added: BTreeSet<usize> = s
                    .key_columns
                    .iter()
                    .filter(|c| used.contains(c) && !state.readable.contains(c))
                    .copied()
                    .collect();
                let first = added.iter().next().copied().unwrap_or(usize::MAX);
                (i, added.len(), table.indexes[s.index].parts.len(), first)
            })
            .filter(|&(_, added, _, _)| added > 0)
            .min_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)).then(a.3.cmp(&b.3)));
        let (i, ..) = pick?;
        let r = remaining.remove(i);
        let sel = state.selectivity(table, r, table_rows);
        state.add(table, r.scan, sel);
        if state.cost(ctx.oracle, true, None) >= ctx.best_cost {
            return None;
        }
    }
    if state.scans.len() < 2 {
        return None;
    }
    let cost = state.cost(ctx.oracle, true, None);
    ctx.trace.push(
        TraceRecord::new("covering_intersection")
            .with(
                "indexes",
                state.scans.iter().map(|s| s.index_name.as_str()).collect::<Vec<_>>(),
            )
            .with("rows", state.out_rows)
            .with("cost", cost.total),
    );
    Some(to_plan(&state, None, true, cost))
}
