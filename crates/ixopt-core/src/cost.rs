//! # Cost Model
//!
//! This module defines the cost abstraction and the cost/statistics oracle the
//! access path search consults.
//!
//! ## Cost Units
//!
//! A [`Cost`] is a single number in "random block read" units. Row evaluation
//! and rowid comparisons are priced as fractions of a block read through
//! [`CostConstants`], so costs of different access methods stay comparable:
//!
//! ```text
//! range scan      = index/row reads + rows * row_evaluate
//! rowid sweep     = busy_blocks * (disk_seek_base + disk_seek_prop * table_blocks / busy_blocks)
//! dedup structure = comparisons * key_compare + spill writes + merge passes
//! ```
//!
//! ## Oracle
//!
//! The search never reads statistics directly. It asks a [`CostOracle`] for
//! row counts in key ranges and for the cost of each physical operation. The
//! oracle is read-only and may answer "unknown" for row estimates; such
//! candidates are skipped. [`StatsCostOracle`] is the default implementation
//! backed by [`Statistics`].

use crate::catalog::{IndexId, TableInfo};
use crate::expr::ScalarValue;
use crate::range::{KeyRange, RangeFlags};
use crate::stats::{Statistics, DEFAULT_FILTER_SELECTIVITY, RANGE_SELECTIVITY};
use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Bound};

/// Cost is a single comparable value representing the estimated expense of a plan.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Cost {
    /// The total cost. Lower is better. `f64::MAX` represents infinity
    /// (an infeasible or not-yet-costed plan).
    pub total: f64,
}

impl Cost {
    pub fn zero() -> Self {
        Self { total: 0.0 }
    }

    pub fn new(total: f64) -> Self {
        Self { total }
    }

    pub fn infinite() -> Self {
        Self { total: f64::MAX }
    }

    pub fn is_infinite(&self) -> bool {
        self.total == f64::MAX
    }
}

/// Epsilon-based equality to handle floating-point imprecision in cost comparisons.
impl PartialEq for Cost {
    fn eq(&self, other: &Self) -> bool {
        (self.total - other.total).abs() < f64::EPSILON
    }
}

impl PartialOrd for Cost {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.total.partial_cmp(&other.total)
    }
}

impl Add for Cost {
    type Output = Cost;

    fn add(self, rhs: Cost) -> Cost {
        if self.is_infinite() || rhs.is_infinite() {
            return Cost::infinite();
        }
        Cost::new(self.total + rhs.total)
    }
}

impl AddAssign for Cost {
    fn add_assign(&mut self, rhs: Cost) {
        *self = *self + rhs;
    }
}

/// Unit prices of the operations the cost formulas are built from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CostConstants {
    /// One block read during a scan.
    pub io_block_read: f64,
    /// Evaluating the pushed condition on one row.
    pub row_evaluate: f64,
    /// Comparing two row identifiers.
    pub rowid_compare: f64,
    /// Comparing two keys inside the deduplication tree.
    pub key_compare: f64,
    /// Fixed part of a disk seek.
    pub disk_seek_base: f64,
    /// Seek cost proportional to the distance travelled, per block.
    pub disk_seek_prop: f64,
    pub block_size: usize,
}

impl Default for CostConstants {
    fn default() -> Self {
        Self {
            io_block_read: 1.0,
            row_evaluate: 0.2,
            rowid_compare: 0.002,
            key_compare: 0.05,
            disk_seek_base: 0.9,
            disk_seek_prop: 0.1 / 128.0,
            block_size: 8192,
        }
    }
}

/// Cost and cardinality service consumed by the access path search.
///
/// All methods are side-effect free and may be called any number of times per
/// optimization.
pub trait CostOracle: Send + Sync {
    /// Rows in the table.
    fn table_rows(&self) -> f64;

    /// Cost of reading every row and evaluating the condition on it.
    fn table_scan_cost(&self) -> Cost;

    /// Estimated rows in `ranges` of `index`, or `None` when unknown.
    fn records_in_ranges(&self, index: IndexId, ranges: &[KeyRange]) -> Option<f64>;

    /// Reading `rows` index entries from `ranges` ranges without touching rows.
    fn index_only_scan_cost(&self, index: IndexId, ranges: usize, rows: f64) -> Cost;

    /// Reading `rows` full rows through `index` from `ranges` ranges.
    fn full_row_scan_cost(&self, index: IndexId, ranges: usize, rows: f64) -> Cost;

    /// Fetching `rows` rows in rowid order.
    fn rowid_sweep_cost(&self, rows: f64) -> Cost;

    /// Inserting `keys` keys of `key_size` bytes into the deduplication
    /// structure and reading them back in order, with `budget` bytes of memory.
    fn unique_use_cost(&self, keys: f64, key_size: usize, budget: usize) -> Cost;

    /// Cost of one rowid comparison.
    fn rowid_compare_cost(&self) -> f64;

    /// Cost of evaluating the condition on one row.
    fn row_evaluate_cost(&self) -> f64;

    /// Distinct values of the first `parts` key parts of `index`.
    fn distinct_keys(&self, index: IndexId, parts: usize) -> Option<f64>;

    /// Index entries per block of `index`.
    fn keys_per_block(&self, index: IndexId) -> f64;
}

/// Default oracle computing estimates from table [`Statistics`].
pub struct StatsCostOracle {
    pub table: TableInfo,
    pub stats: Statistics,
    pub constants: CostConstants,
}

impl StatsCostOracle {
    pub fn new(table: TableInfo, stats: Statistics, constants: CostConstants) -> Self {
        Self {
            table,
            stats,
            constants,
        }
    }

    fn data_blocks(&self) -> f64 {
        let bytes = if self.stats.total_size_bytes > 0.0 {
            self.stats.total_size_bytes
        } else {
            self.stats.row_count * self.table.row_length() as f64
        };
        (bytes / self.constants.block_size as f64).ceil().max(1.0)
    }

    fn column_name(&self, index: IndexId, part: usize) -> Option<&str> {
        let column = self.table.indexes.get(index)?.parts.get(part)?.column;
        self.table.columns.get(column).map(|c| c.name.as_str())
    }

    /// Fraction of rows whose first `parts` key parts equal `values`.
    fn prefix_selectivity(&self, index: IndexId, values: &[ScalarValue]) -> f64 {
        let rows = self.stats.row_count.max(1.0);
        let name = &self.table.indexes[index].name;
        let has_null = values.iter().any(ScalarValue::is_null);
        if !has_null {
            if let Some(rpk) = self
                .stats
                .index_stats
                .get(name)
                .and_then(|s| s.rec_per_key.get(values.len() - 1))
            {
                return (rpk / rows).min(1.0);
            }
        }
        let mut sel = 1.0;
        for (part, v) in values.iter().enumerate() {
            let cs = self
                .column_name(index, part)
                .and_then(|c| self.stats.column_stats.get(c));
            sel *= match (cs, v.is_null()) {
                (Some(cs), true) => cs.null_fraction,
                (Some(cs), false) => 1.0 / cs.distinct_count.max(1.0),
                (None, _) => DEFAULT_FILTER_SELECTIVITY,
            };
        }
        sel
    }

    /// Fraction of rows in the bounds on one key part, bounds in value order.
    fn part_fraction(
        &self,
        index: IndexId,
        part: usize,
        lo: Bound<&ScalarValue>,
        hi: Bound<&ScalarValue>,
    ) -> f64 {
        let cs = self
            .column_name(index, part)
            .and_then(|c| self.stats.column_stats.get(c));
        let Some(cs) = cs else {
            return RANGE_SELECTIVITY;
        };
        let non_null = 1.0 - cs.null_fraction;
        // A NULL lower bound only excludes the NULLs.
        let lo = match lo {
            Bound::Included(v) | Bound::Excluded(v) if v.is_null() => Bound::Unbounded,
            other => other,
        };
        let numeric = |b: Bound<&ScalarValue>| -> Option<Bound<f64>> {
            match b {
                Bound::Unbounded => Some(Bound::Unbounded),
                Bound::Included(v) => v.as_f64().map(Bound::Included),
                Bound::Excluded(v) => v.as_f64().map(Bound::Excluded),
            }
        };
        match (numeric(lo), numeric(hi)) {
            (Some(Bound::Unbounded), Some(Bound::Unbounded)) => non_null,
            (Some(l), Some(h)) => cs
                .range_fraction(l, h)
                .map(|f| f * non_null)
                .unwrap_or(RANGE_SELECTIVITY),
            _ => RANGE_SELECTIVITY,
        }
    }

    fn range_rows(&self, index: IndexId, range: &KeyRange) -> f64 {
        let rows = self.stats.row_count;
        if range.flags.contains(RangeFlags::UNIQUE_RANGE) {
            return rows.min(1.0);
        }
        let empty = Vec::new();
        let lo = match &range.min {
            Bound::Included(v) | Bound::Excluded(v) => v,
            Bound::Unbounded => &empty,
        };
        let hi = match &range.max {
            Bound::Included(v) | Bound::Excluded(v) => v,
            Bound::Unbounded => &empty,
        };
        let eq_len = if range.is_eq() {
            lo.len()
        } else {
            let common = lo
                .iter()
                .zip(hi)
                .take_while(|(a, b)| a.key_cmp(b) == std::cmp::Ordering::Equal)
                .count();
            // Equal endpoints with an exclusive side leave the last part a range.
            if common == lo.len() && common == hi.len() {
                common.saturating_sub(1)
            } else {
                common
            }
        };

        let mut estimate = rows;
        if eq_len > 0 {
            estimate *= self.prefix_selectivity(index, &lo[..eq_len]);
        }
        let (lo_next, hi_next) = (lo.get(eq_len), hi.get(eq_len));
        if lo_next.is_some() || hi_next.is_some() {
            fn bound(v: Option<&ScalarValue>, inclusive: bool) -> Bound<&ScalarValue> {
                match v {
                    None => Bound::Unbounded,
                    Some(v) if inclusive => Bound::Included(v),
                    Some(v) => Bound::Excluded(v),
                }
            }
            let lo_incl = matches!(range.min, Bound::Included(_)) || lo.len() > eq_len + 1;
            let hi_incl = matches!(range.max, Bound::Included(_)) || hi.len() > eq_len + 1;
            let (mut l, mut h) = (bound(lo_next, lo_incl), bound(hi_next, hi_incl));
            let descending = self.table.indexes[index]
                .parts
                .get(eq_len)
                .is_some_and(|p| p.descending);
            if descending {
                std::mem::swap(&mut l, &mut h);
            }
            estimate *= self.part_fraction(index, eq_len, l, h);
        }
        estimate.max(1.0).min(rows.max(1.0))
    }
}

/// `log2(n!)` by Stirling's approximation.
fn log2_n_fact(n: f64) -> f64 {
    if n <= 1.0 {
        return 0.0;
    }
    let ln = (2.0 * std::f64::consts::PI * n).ln() / 2.0 + n * (n / std::f64::consts::E).ln();
    ln / std::f64::consts::LN_2
}

/// Merge fan-in of the external merge of spilled deduplication trees.
const MERGE_FAN_IN: f64 = 7.0;

/// Per-element overhead of the in-memory deduplication tree.
const TREE_ELEMENT_OVERHEAD: usize = 24;

impl CostOracle for StatsCostOracle {
    fn table_rows(&self) -> f64 {
        self.stats.row_count
    }

    fn table_scan_cost(&self) -> Cost {
        let c = &self.constants;
        Cost::new(self.data_blocks() * c.io_block_read + self.stats.row_count * c.row_evaluate + 1.0)
    }

    fn records_in_ranges(&self, index: IndexId, ranges: &[KeyRange]) -> Option<f64> {
        if index >= self.table.indexes.len() || self.stats.row_count < 0.0 {
            return None;
        }
        let rows: f64 = ranges.iter().map(|r| self.range_rows(index, r)).sum();
        Some(rows.min(self.stats.row_count.max(1.0)))
    }

    fn index_only_scan_cost(&self, index: IndexId, ranges: usize, rows: f64) -> Cost {
        let kpb = self.keys_per_block(index);
        let blocks = (rows.max(0.0) / kpb).ceil();
        Cost::new((ranges as f64 + blocks) * self.constants.io_block_read)
    }

    fn full_row_scan_cost(&self, index: IndexId, ranges: usize, rows: f64) -> Cost {
        let c = &self.constants;
        if self.table.is_clustered_pk(index) {
            let total = self.stats.row_count.max(1.0);
            return Cost::new((ranges as f64 + rows / total * self.data_blocks()) * c.io_block_read);
        }
        // One random row read per index entry.
        Cost::new((ranges as f64 + rows) * c.io_block_read)
    }

    fn rowid_sweep_cost(&self, rows: f64) -> Cost {
        let c = &self.constants;
        if rows <= 0.0 {
            return Cost::zero();
        }
        if let Some(pk) = self.table.clustered_pk() {
            return self.full_row_scan_cost(pk, 0, rows);
        }
        let n_blocks = self.data_blocks();
        let busy = (n_blocks * (1.0 - (1.0 - 1.0 / n_blocks).powf(rows))).max(1.0);
        Cost::new(busy * (c.disk_seek_base + c.disk_seek_prop * n_blocks / busy))
    }

    fn unique_use_cost(&self, keys: f64, key_size: usize, budget: usize) -> Cost {
        let c = &self.constants;
        if keys <= 0.0 {
            return Cost::zero();
        }
        let max_in_tree = (budget / (key_size + TREE_ELEMENT_OVERHEAD).max(1)).max(1) as f64;
        let full_trees = (keys / max_in_tree).floor();
        let last_tree = keys - full_trees * max_in_tree;

        let mut comparisons = 2.0 * log2_n_fact(last_tree + 1.0);
        if full_trees > 0.0 {
            comparisons += full_trees * log2_n_fact(max_in_tree + 1.0);
        }
        let mut total = comparisons * c.key_compare;
        if full_trees == 0.0 {
            return Cost::new(total);
        }
        let block = c.block_size as f64;
        let tree_blocks = (key_size as f64 * max_in_tree / block).ceil();
        let last_blocks = (key_size as f64 * last_tree / block).ceil();
        let all_blocks = (key_size as f64 * keys / block).ceil();
        // Spill every full tree and the last one.
        total += c.disk_seek_base * (full_trees * tree_blocks + last_blocks);
        // Each merge pass reads and writes all keys once.
        let passes = (full_trees + 1.0).log(MERGE_FAN_IN).ceil().max(1.0);
        total += passes * 2.0 * all_blocks * c.io_block_read
            + keys * passes * log2_n_fact(MERGE_FAN_IN) / MERGE_FAN_IN * c.key_compare;
        // Final read-back.
        total += all_blocks * c.io_block_read;
        Cost::new(total)
    }

    fn rowid_compare_cost(&self) -> f64 {
        self.constants.rowid_compare
    }

    fn row_evaluate_cost(&self) -> f64 {
        self.constants.row_evaluate
    }

    fn distinct_keys(&self, index: IndexId, parts: usize) -> Option<f64> {
        if parts == 0 {
            return Some(1.0);
        }
        let def = self.table.indexes.get(index)?;
        let rows = self.stats.row_count;
        if let Some(rpk) = self
            .stats
            .index_stats
            .get(&def.name)
            .and_then(|s| s.rec_per_key.get(parts - 1))
        {
            return Some((rows / rpk.max(1.0)).max(1.0));
        }
        let mut groups = 1.0_f64;
        for part in 0..parts.min(def.parts.len()) {
            let cs = self.stats.column_stats.get(self.column_name(index, part)?)?;
            groups *= cs.distinct_count.max(1.0);
        }
        Some(groups.min(rows).max(1.0))
    }

    fn keys_per_block(&self, index: IndexId) -> f64 {
        let entry = self.table.key_length(index) + self.table.ref_length();
        (self.constants.block_size / 2 / entry.max(1)) as f64 + 1.0
    }
}
