//! # Candidate Access Plans
//!
//! The plan space is closed: every strategy produces one variant of
//! [`CandidatePlan`]. Plans carry their estimated output rows and total cost
//! and can be materialized into a [`QuickSelect`] executor description.
//!
//! ```text
//! RangeScan          one index, a list of key ranges
//! RorIntersection    rowid-ordered scans merged on row identity (AND)
//! RorUnion           rowid-ordered scans merged on row identity (OR)
//! IndexIntersection  row identifiers of several scans sorted and intersected
//! IndexMerge         row identifiers of several scans sorted, de-duplicated, swept
//! GroupMinMax        loose index scan jumping between group prefixes
//! ```

use crate::catalog::{IndexId, TableInfo};
use crate::cost::Cost;
use crate::error::OptResult;
use crate::expr::{AggExpr, AggFunc, ColumnRef, Expr, ScalarValue};
use crate::quick::{MinMaxSpec, QuickSelect};
use crate::range::{Interval, KeyRange};
use crate::scan::RangeScan;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// What the query needs from the table besides the WHERE clause.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryShape {
    /// Every column the query reads (select list, WHERE, grouping, aggregates).
    pub used_columns: BTreeSet<usize>,
    pub group_by: Vec<usize>,
    /// `SELECT DISTINCT`.
    pub distinct: bool,
    /// Plain (non-aggregate) columns of the select list.
    pub select_columns: Vec<usize>,
    pub aggregates: Vec<AggregateShape>,
}

/// An aggregate over a single column.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AggregateShape {
    pub func: AggFunc,
    /// `None` for `COUNT(*)` and aggregates over expressions.
    pub column: Option<usize>,
    pub distinct: bool,
}

impl QueryShape {
    /// A query reading `columns` with no grouping.
    pub fn reading(columns: impl IntoIterator<Item = usize>) -> Self {
        let select_columns: Vec<usize> = columns.into_iter().collect();
        Self {
            used_columns: select_columns.iter().copied().collect(),
            select_columns,
            ..Default::default()
        }
    }

    /// Resolve column names of a single-table query against `table`.
    pub fn resolve(
        table: &TableInfo,
        select: &[ColumnRef],
        group_by: &[ColumnRef],
        aggregates: &[AggExpr],
        distinct: bool,
        predicate: Option<&Expr>,
    ) -> OptResult<Self> {
        let resolve = |c: &ColumnRef| table.resolve_column(&c.name);
        let select_columns = select.iter().map(resolve).collect::<OptResult<Vec<_>>>()?;
        let group_by = group_by.iter().map(resolve).collect::<OptResult<Vec<_>>>()?;
        let mut used: BTreeSet<usize> = select_columns.iter().chain(&group_by).copied().collect();
        let mut shapes = Vec::with_capacity(aggregates.len());
        for agg in aggregates {
            let column = match &agg.arg {
                Expr::Column(c) => Some(resolve(c)?),
                other => {
                    for c in other.columns() {
                        used.insert(resolve(c)?);
                    }
                    None
                }
            };
            used.extend(column);
            shapes.push(AggregateShape {
                func: agg.func,
                column,
                distinct: agg.distinct,
            });
        }
        if let Some(p) = predicate {
            for c in p.columns() {
                if c.table.as_deref().map_or(true, |t| t == table.table.name) {
                    used.insert(resolve(c)?);
                }
            }
        }
        Ok(Self {
            used_columns: used,
            group_by,
            distinct,
            select_columns,
            aggregates: shapes,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlanKind {
    RangeScan,
    RorIntersection,
    RorUnion,
    IndexIntersection,
    IndexMerge,
    GroupMinMax,
}

#[derive(Debug, Clone, Serialize)]
pub struct RorIntersectPlan {
    pub scans: Vec<RangeScan>,
    /// Clustered primary key scan used as a filter on the intersection.
    pub cpk_scan: Option<RangeScan>,
    /// The scans together contain every used column.
    pub covering: bool,
    pub rows: f64,
    pub cost: Cost,
}

#[derive(Debug, Clone, Serialize)]
pub struct RorUnionPlan {
    /// Each branch is a rowid-ordered range scan or ROR intersection.
    pub children: Vec<CandidatePlan>,
    pub rows: f64,
    pub cost: Cost,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexIntersectPlan {
    pub scans: Vec<RangeScan>,
    pub rows: f64,
    pub cost: Cost,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexMergePlan {
    pub scans: Vec<RangeScan>,
    /// Clustered primary key disjunct, read in order and compared instead of
    /// going through the de-duplication structure.
    pub cpk_scan: Option<RangeScan>,
    pub rows: f64,
    pub cost: Cost,
}

/// Loose index scan for GROUP BY / DISTINCT / MIN / MAX.
#[derive(Debug, Clone, Serialize)]
pub struct GroupMinMaxPlan {
    pub index: IndexId,
    pub index_name: String,
    /// Key parts read from each index entry.
    pub used_key_parts: usize,
    /// Key parts forming the group prefix.
    pub group_prefix_len: usize,
    /// Equality constants on the key parts between the group prefix and the
    /// MIN/MAX argument.
    pub key_infix: Vec<ScalarValue>,
    /// Condition on the MIN/MAX argument, in value order. Empty when unrestricted.
    pub min_max_ranges: Vec<Interval>,
    pub have_min: bool,
    pub have_max: bool,
    /// Ranges on the group prefix, when the WHERE clause restricts it.
    pub prefix_ranges: Option<Vec<KeyRange>>,
    /// The query aggregates `DISTINCT` arguments (`COUNT(DISTINCT ..)`).
    pub distinct_aggregate: bool,
    pub rows: f64,
    pub cost: Cost,
}

/// One costed way of retrieving the rows of a table.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind")]
pub enum CandidatePlan {
    RangeScan(RangeScan),
    RorIntersection(RorIntersectPlan),
    RorUnion(RorUnionPlan),
    IndexIntersection(IndexIntersectPlan),
    IndexMerge(IndexMergePlan),
    GroupMinMax(GroupMinMaxPlan),
}

impl CandidatePlan {
    pub fn kind(&self) -> PlanKind {
        match self {
            CandidatePlan::RangeScan(_) => PlanKind::RangeScan,
            CandidatePlan::RorIntersection(_) => PlanKind::RorIntersection,
            CandidatePlan::RorUnion(_) => PlanKind::RorUnion,
            CandidatePlan::IndexIntersection(_) => PlanKind::IndexIntersection,
            CandidatePlan::IndexMerge(_) => PlanKind::IndexMerge,
            CandidatePlan::GroupMinMax(_) => PlanKind::GroupMinMax,
        }
    }

    pub fn rows(&self) -> f64 {
        match self {
            CandidatePlan::RangeScan(s) => s.rows,
            CandidatePlan::RorIntersection(p) => p.rows,
            CandidatePlan::RorUnion(p) => p.rows,
            CandidatePlan::IndexIntersection(p) => p.rows,
            CandidatePlan::IndexMerge(p) => p.rows,
            CandidatePlan::GroupMinMax(p) => p.rows,
        }
    }

    pub fn cost(&self) -> Cost {
        match self {
            CandidatePlan::RangeScan(s) => s.cost,
            CandidatePlan::RorIntersection(p) => p.cost,
            CandidatePlan::RorUnion(p) => p.cost,
            CandidatePlan::IndexIntersection(p) => p.cost,
            CandidatePlan::IndexMerge(p) => p.cost,
            CandidatePlan::GroupMinMax(p) => p.cost,
        }
    }

    /// Names of the indexes the plan reads, in scan order.
    pub fn index_names(&self) -> Vec<String> {
        fn names<'a>(scans: impl Iterator<Item = &'a RangeScan>) -> Vec<String> {
            scans.map(|s| s.index_name.clone()).collect()
        }
        match self {
            CandidatePlan::RangeScan(s) => vec![s.index_name.clone()],
            CandidatePlan::RorIntersection(p) => names(p.scans.iter().chain(&p.cpk_scan)),
            CandidatePlan::RorUnion(p) => p.children.iter().flat_map(|c| c.index_names()).collect(),
            CandidatePlan::IndexIntersection(p) => names(p.scans.iter()),
            CandidatePlan::IndexMerge(p) => names(p.scans.iter().chain(&p.cpk_scan)),
            CandidatePlan::GroupMinMax(p) => vec![p.index_name.clone()],
        }
    }

    /// Build the executor description for this plan.
    pub fn materialize(&self, table: &TableInfo) -> QuickSelect {
        let range = |s: &RangeScan| QuickSelect::range(table, s.index, s.ranges.clone());
        match self {
            CandidatePlan::RangeScan(s) => range(s),
            CandidatePlan::RorIntersection(p) => QuickSelect::RorIntersect {
                children: p.scans.iter().map(range).collect(),
                cpk: p.cpk_scan.as_ref().map(|s| Box::new(range(s))),
            },
            CandidatePlan::RorUnion(p) => QuickSelect::RorUnion {
                children: p.children.iter().map(|c| c.materialize(table)).collect(),
            },
            CandidatePlan::IndexIntersection(p) => QuickSelect::IndexIntersect {
                children: p.scans.iter().map(range).collect(),
            },
            CandidatePlan::IndexMerge(p) => QuickSelect::IndexMerge {
                children: p.scans.iter().map(range).collect(),
                cpk: p.cpk_scan.as_ref().map(|s| Box::new(range(s))),
            },
            CandidatePlan::GroupMinMax(p) => QuickSelect::GroupMinMax {
                index: p.index,
                group_prefix_len: p.group_prefix_len,
                key_infix: p.key_infix.clone(),
                min_max: (p.have_min || p.have_max).then(|| MinMaxSpec {
                    ranges: p.min_max_ranges.clone(),
                    have_min: p.have_min,
                    have_max: p.have_max,
                }),
                prefix_ranges: p.prefix_ranges.clone(),
                descending: table.indexes[p.index].parts.iter().map(|kp| kp.descending).collect(),
            },
        }
    }
}

/// Outcome of the access path search for one table.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "decision", content = "detail")]
pub enum AccessDecision {
    /// No row can satisfy the predicate.
    Impossible,
    /// Read the whole table.
    FullScan { rows: f64, cost: Cost, reason: String },
    Plan(CandidatePlan),
}

impl AccessDecision {
    pub fn rows(&self) -> f64 {
        match self {
            AccessDecision::Impossible => 0.0,
            AccessDecision::FullScan { rows, .. } => *rows,
            AccessDecision::Plan(p) => p.rows(),
        }
    }

    pub fn cost(&self) -> Cost {
        match self {
            AccessDecision::Impossible => Cost::zero(),
            AccessDecision::FullScan { cost, .. } => *cost,
            AccessDecision::Plan(p) => p.cost(),
        }
    }

    pub fn plan(&self) -> Option<&CandidatePlan> {
        match self {
            AccessDecision::Plan(p) => Some(p),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnDef, DataType, IndexDef};
    use crate::expr::TableRef;

    fn table() -> TableInfo {
        let int = DataType::Int {
            bits: 32,
            unsigned: false,
        };
        TableInfo::new(
            TableRef::new("test", "t"),
            vec![
                ColumnDef::new("a", int, false),
                ColumnDef::new("b", int, false),
                ColumnDef::new("c", int, false),
            ],
        )
        .with_index(IndexDef::new("ab", &[0, 1]))
    }

    #[test]
    fn test_resolve_query_shape() {
        let t = table();
        let shape = QueryShape::resolve(
            &t,
            &[ColumnRef::new("a")],
            &[ColumnRef::new("a")],
            &[AggExpr {
                func: AggFunc::Min,
                arg: Expr::col("b"),
                distinct: false,
            }],
            false,
            Some(&Expr::col("c").gt(Expr::lit(1))),
        )
        .unwrap();
        assert_eq!(shape.group_by, vec![0]);
        assert_eq!(shape.aggregates[0].column, Some(1));
        assert_eq!(shape.used_columns, BTreeSet::from([0, 1, 2]));
    }

    #[test]
    fn test_resolve_skips_outer_columns() {
        let t = table();
        let pred = Expr::col("a").equals(Expr::Column(ColumnRef::qualified("other", "x")));
        let shape = QueryShape::resolve(&t, &[], &[], &[], false, Some(&pred)).unwrap();
        assert_eq!(shape.used_columns, BTreeSet::from([0]));
    }

    #[test]
    fn test_decision_accessors() {
        let d = AccessDecision::FullScan {
            rows: 10.0,
            cost: Cost::new(3.0),
            reason: "no index".into(),
        };
        assert_eq!(d.rows(), 10.0);
        assert!(d.plan().is_none());
        assert_eq!(AccessDecision::Impossible.cost(), Cost::zero());
    }
}
