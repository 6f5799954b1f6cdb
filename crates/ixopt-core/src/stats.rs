//! # Statistics for Cost-Based Access Path Selection
//!
//! This module defines the statistics structures the default cost oracle reads
//! and the derivation formulas it uses to turn key ranges into row estimates.
//!
//! ## Statistics Hierarchy
//!
//! - **Table-level**: row count and total size in bytes.
//! - **Column-level**: number of distinct values (NDV), null fraction, min/max values,
//!   average value size, and optional histograms for range selectivity estimation.
//! - **Index-level**: `rec_per_key`, the average number of rows sharing one
//!   value of each key prefix. Drives equality estimates on multi-column keys
//!   and the group counts of loose index scans.
//!
//! ## Selectivity Estimation
//!
//! - **Equality**: 1 / NDV (uniform distribution assumption), or the index's
//!   `rec_per_key` for the prefix when available.
//! - **Range**: histogram buckets when present, linear interpolation between
//!   the column's min and max otherwise, and a fixed 1/3 heuristic as a last resort.
//! - **Default**: 0.1 (10%) when no better estimate is available.

use crate::expr::ScalarValue;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::Bound;

/// Statistics for a table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statistics {
    pub row_count: f64,
    pub total_size_bytes: f64,
    #[serde(default)]
    pub column_stats: HashMap<String, ColumnStatistics>,
    /// Per-index statistics keyed by index name.
    #[serde(default)]
    pub index_stats: HashMap<String, IndexStatistics>,
}

impl Statistics {
    pub fn new(row_count: f64, total_size_bytes: f64) -> Self {
        Self {
            row_count,
            total_size_bytes,
            column_stats: HashMap::new(),
            index_stats: HashMap::new(),
        }
    }

    pub fn with_column(mut self, name: impl Into<String>, stats: ColumnStatistics) -> Self {
        self.column_stats.insert(name.into(), stats);
        self
    }

    pub fn with_index(mut self, name: impl Into<String>, stats: IndexStatistics) -> Self {
        self.index_stats.insert(name.into(), stats);
        self
    }
}

/// Per-column statistics. The oracle falls back to these when an index has
/// no `rec_per_key` for the prefix being estimated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnStatistics {
    /// Number of distinct values (NDV).
    pub distinct_count: f64,
    /// Share of NULL keys, read for `IS NULL` ranges.
    #[serde(default)]
    pub null_fraction: f64,
    /// Smallest non-NULL value, for interpolating open ranges.
    #[serde(default)]
    pub min_value: Option<ScalarValue>,
    /// Largest non-NULL value.
    #[serde(default)]
    pub max_value: Option<ScalarValue>,
    /// Preferred over min/max interpolation when present.
    #[serde(default)]
    pub histogram: Option<Histogram>,
}

impl ColumnStatistics {
    pub fn new(distinct_count: f64, null_fraction: f64) -> Self {
        Self {
            distinct_count,
            null_fraction,
            min_value: None,
            max_value: None,
            histogram: None,
        }
    }

    pub fn with_bounds(mut self, min: ScalarValue, max: ScalarValue) -> Self {
        self.min_value = Some(min);
        self.max_value = Some(max);
        self
    }

    /// Fraction of non-NULL rows whose value lies between `lo` and `hi`.
    ///
    /// Returns `None` when neither a histogram nor numeric min/max bounds are
    /// available; callers then fall back to [`RANGE_SELECTIVITY`].
    pub fn range_fraction(&self, lo: Bound<f64>, hi: Bound<f64>) -> Option<f64> {
        if let Some(h) = &self.histogram {
            return h.fraction_in_range(lo, hi);
        }
        let min = self.min_value.as_ref()?.as_f64()?;
        let max = self.max_value.as_ref()?.as_f64()?;
        let lo = match lo {
            Bound::Unbounded => min,
            Bound::Included(v) | Bound::Excluded(v) => v.max(min),
        };
        let hi = match hi {
            Bound::Unbounded => max,
            Bound::Included(v) | Bound::Excluded(v) => v.min(max),
        };
        if hi < lo {
            return Some(0.0);
        }
        if max <= min {
            return Some(1.0);
        }
        // Each distinct value carries at least 1/NDV of the rows, so a narrow
        // closed range is never estimated below a single value.
        let width = (hi - lo) / (max - min);
        Some(width.max(1.0 / self.distinct_count.max(1.0)).min(1.0))
    }
}

/// Per-index statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexStatistics {
    /// `rec_per_key[i]`: average number of rows per distinct value of the
    /// first `i + 1` key parts.
    pub rec_per_key: Vec<f64>,
}

impl IndexStatistics {
    pub fn new(rec_per_key: Vec<f64>) -> Self {
        Self { rec_per_key }
    }
}

/// Equi-depth histogram over a numeric column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Histogram {
    pub buckets: Vec<HistogramBucket>,
}

/// A single bucket in an equi-depth histogram.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistogramBucket {
    /// Inclusive.
    pub lower: f64,
    /// Inclusive.
    pub upper: f64,
    pub count: f64,
    /// Distinct values inside the bucket; bounds the share a point lookup hits.
    pub distinct: f64,
}

impl Histogram {
    /// Fraction of rows falling between `lo` and `hi`, interpolating linearly
    /// inside partially covered buckets.
    pub fn fraction_in_range(&self, lo: Bound<f64>, hi: Bound<f64>) -> Option<f64> {
        let total: f64 = self.buckets.iter().map(|b| b.count).sum();
        if total <= 0.0 {
            return None;
        }
        let lo = match lo {
            Bound::Unbounded => f64::NEG_INFINITY,
            Bound::Included(v) | Bound::Excluded(v) => v,
        };
        let hi = match hi {
            Bound::Unbounded => f64::INFINITY,
            Bound::Included(v) | Bound::Excluded(v) => v,
        };
        let mut rows = 0.0;
        for b in &self.buckets {
            if b.upper < lo || b.lower > hi {
                continue;
            }
            let width = b.upper - b.lower;
            if width <= 0.0 {
                rows += b.count;
                continue;
            }
            let covered = (hi.min(b.upper) - lo.max(b.lower)).max(0.0) / width;
            // A point lookup inside a bucket still hits one of its distinct values.
            let floor = 1.0 / b.distinct.max(1.0);
            rows += b.count * covered.max(floor).min(1.0);
        }
        Some((rows / total).min(1.0))
    }
}

/// Share of rows assumed to match an index prefix nothing is known about.
pub const DEFAULT_FILTER_SELECTIVITY: f64 = 0.1;

/// Selectivity of an open or closed range without histogram or bounds.
pub const RANGE_SELECTIVITY: f64 = 1.0 / 3.0;

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform_histogram() -> Histogram {
        Histogram {
            buckets: (0..10)
                .map(|i| HistogramBucket {
                    lower: (i * 10) as f64,
                    upper: (i * 10 + 10) as f64,
                    count: 100.0,
                    distinct: 10.0,
                })
                .collect(),
        }
    }

    #[test]
    fn test_histogram_half_range() {
        let h = uniform_histogram();
        let f = h
            .fraction_in_range(Bound::Included(0.0), Bound::Excluded(50.0))
            .unwrap();
        assert!((f - 0.5).abs() < 0.02, "got {f}");
    }

    #[test]
    fn test_histogram_point_floor() {
        let h = uniform_histogram();
        let f = h
            .fraction_in_range(Bound::Included(42.0), Bound::Included(42.0))
            .unwrap();
        assert!(f > 0.0 && f <= 0.011, "got {f}");
    }

    #[test]
    fn test_interpolation_from_bounds() {
        let cs = ColumnStatistics::new(1000.0, 0.0)
            .with_bounds(ScalarValue::Int64(0), ScalarValue::Int64(999));
        let f = cs
            .range_fraction(Bound::Excluded(899.0), Bound::Unbounded)
            .unwrap();
        assert!((f - 0.1).abs() < 0.01, "got {f}");
        assert_eq!(
            cs.range_fraction(Bound::Included(2000.0), Bound::Unbounded),
            Some(0.0)
        );
    }

    #[test]
    fn test_no_bounds_means_unknown() {
        let cs = ColumnStatistics::new(10.0, 0.0);
        assert_eq!(cs.range_fraction(Bound::Unbounded, Bound::Included(3.0)), None);
    }
}
