//! Range scan candidates.
//!
//! For every index with an interval graph in a [`RangeTree`], materialize its
//! key ranges, ask the oracle how many rows they hold and price a range scan
//! over them. The resulting [`RangeScan`]s are the building blocks of every
//! plan strategy.

use crate::catalog::{IndexId, TableInfo};
use crate::context::RangeContext;
use crate::cost::{Cost, CostOracle};
use crate::plan::QueryShape;
use crate::range::{KeyRange, NodeId, MAX_KEY_PARTS};
use crate::trace::TraceRecord;
use crate::tree::RangeTree;
use serde::Serialize;
use std::collections::BTreeSet;
use std::ops::Bound;
use tracing::{trace, warn};

/// Fixed per-scan overhead, keeps ties between equal scans deterministic.
const SCAN_SETUP_COST: f64 = 0.01;

/// A priced range scan over one index.
#[derive(Debug, Clone, Serialize)]
pub struct RangeScan {
    pub index: IndexId,
    pub index_name: String,
    pub ranges: Vec<KeyRange>,
    pub rows: f64,
    /// Cost of the scan as a complete access method.
    pub cost: Cost,
    /// Cost of reading only the index entries (row identifiers) in the ranges.
    pub index_only_cost: Cost,
    /// All used columns are in the index.
    pub covering: bool,
    /// Rows come out in row identifier order.
    pub ror: bool,
    /// Key parts constrained by the ranges.
    pub used_key_parts: usize,
    /// Columns readable from the index entries.
    #[serde(skip)]
    pub key_columns: BTreeSet<usize>,
}

/// A range scan together with the graph it was built from.
#[derive(Debug, Clone)]
pub struct ScanCandidate {
    pub scan: RangeScan,
    /// Graph of the scan's index, owned by the tree it came from.
    pub node: NodeId,
}

/// Whether `ranges` over `index` return rows in row identifier order.
///
/// Clustered primary key scans always do. A secondary index does when every
/// range is an equality on all of its key parts: equal keys are stored in row
/// identifier order.
pub fn is_key_scan_ror(table: &TableInfo, index: IndexId, ranges: &[KeyRange]) -> bool {
    if table.is_clustered_pk(index) {
        return true;
    }
    let parts = table.indexes[index].parts.len().min(MAX_KEY_PARTS);
    !ranges.is_empty()
        && ranges.iter().all(|r| {
            r.is_eq() && matches!(&r.min, Bound::Included(key) if key.len() == parts)
        })
}

/// Price a range scan of `node` on `index`. `None` when the graph cannot be
/// scanned (MAYBE root, no constraint on the first key part) or the oracle
/// has no estimate.
pub fn cost_range_scan(
    ctx: &RangeContext,
    table: &TableInfo,
    oracle: &dyn CostOracle,
    query: &QueryShape,
    index: IndexId,
    node: NodeId,
) -> Option<RangeScan> {
    let root = ctx.arena.node(node);
    if root.is_maybe() || root.part != 0 {
        return None;
    }
    let ranges = ctx.key_ranges(index, node, MAX_KEY_PARTS);
    let rows = if root.is_impossible() {
        0.0
    } else {
        oracle.records_in_ranges(index, &ranges)?
    };
    let covering = table.index_covers(index, &query.used_columns);
    let index_only_cost = oracle.index_only_scan_cost(index, ranges.len(), rows);
    let read = if covering {
        index_only_cost
    } else {
        oracle.full_row_scan_cost(index, ranges.len(), rows)
    };
    let cost = read + Cost::new(rows * oracle.row_evaluate_cost() + SCAN_SETUP_COST);
    Some(RangeScan {
        index,
        index_name: table.indexes[index].name.clone(),
        ror: is_key_scan_ror(table, index, &ranges),
        ranges,
        rows,
        cost,
        index_only_cost,
        covering,
        used_key_parts: root.max_part as usize + 1,
        key_columns: table.index_columns(index),
    })
}

/// Range scan candidates for every index of `tree`, cheapest first.
pub fn estimate_range_scans(
    ctx: &RangeContext,
    table: &TableInfo,
    oracle: &dyn CostOracle,
    query: &QueryShape,
    tree: &RangeTree,
    trace: &mut TraceRecord,
) -> Vec<ScanCandidate> {
    let mut out = Vec::new();
    for index in tree.keys_map.iter() {
        let Some(node) = tree.get(index) else {
            continue;
        };
        let name = &table.indexes[index].name;
        if ctx.arena.node(node).is_maybe() {
            trace!(index = %name, "range checked for each record");
            trace.push(
                TraceRecord::new("index")
                    .with("index", name)
                    .with("usable", false)
                    .with("cause", "range checked for each record"),
            );
            continue;
        }
        if ctx.arena.node(node).part != 0 {
            trace.push(
                TraceRecord::new("index")
                    .with("index", name)
                    .with("usable", false)
                    .with("cause", "first key part not constrained"),
            );
            continue;
        }
        match cost_range_scan(ctx, table, oracle, query, index, node) {
            Some(scan) => {
                trace!(index = %name, rows = scan.rows, cost = scan.cost.total, "range scan");
                trace.push(
                    TraceRecord::new("index")
                        .with("index", name)
                        .with("ranges", scan.ranges.iter().map(|r| r.to_string()).collect::<Vec<_>>())
                        .with("rowid_ordered", scan.ror)
                        .with("index_only", scan.covering)
                        .with("rows", scan.rows)
                        .with("cost", scan.cost.total),
                );
                out.push(ScanCandidate { scan, node });
            }
            None => {
                warn!(index = %name, "no row estimate for index ranges, skipping");
                trace.push(
                    TraceRecord::new("index")
                        .with("index", name)
                        .with("usable", false)
                        .with("cause", "no row estimate"),
                );
            }
        }
    }
    out.sort_by(|a, b| a.scan.cost.total.total_cmp(&b.scan.cost.total));
    out
}

/// Indexes whose graph is only known at execution time.
pub fn maybe_keys(ctx: &RangeContext, tree: &RangeTree) -> Vec<IndexId> {
    tree.keys_map
        .iter()
        .filter(|&i| tree.get(i).is_some_and(|n| ctx.arena.node(n).is_maybe()))
        .collect()
}
