//! # Group-Min-Max Rule (Loose Index Scan)
//!
//! For grouping queries over a single table, an index whose key starts with
//! the grouping columns can be read by jumping from one group prefix to the
//! next, reading only one or two entries per group instead of every row.
//!
//! ## Applicable Queries
//!
//! - `GROUP BY g1..gn` with plain group columns in the select list and
//!   optionally `MIN(c)` and/or `MAX(c)` over one column `c`.
//! - `SELECT DISTINCT g1..gn`.
//! - `COUNT/SUM/AVG(DISTINCT d1..dn)` without GROUP BY; the arguments act as
//!   the group columns.
//!
//! ## Index Requirements
//!
//! The index must contain every column the query reads. Its key parts are,
//! in order:
//!
//! ```text
//! [ group columns (any order) | infix: col = const ... | MIN/MAX argument | ... ]
//! ```
//!
//! Every WHERE conjunct may reference one column only: a group column (any
//! condition), an infix column (equality with a constant) or the MIN/MAX
//! argument (a comparison, BETWEEN or IS [NOT] NULL with constants).
//! Conjuncts without columns built from literals and parameters hold for
//! every row or for none, so they cannot move a group's MIN/MAX and are
//! skipped. A column-free function call rejects the index.
//!
//! ## Cost
//!
//! When a group spans more than an index block, each group costs one index
//! dive (two for MIN and MAX, one more with an infix or argument range).
//! Otherwise the whole index range is read. For aggregate DISTINCT the plan
//! must also beat an index scan feeding the de-duplication structure.

use ixopt_core::analyzer::PredicateAnalyzer;
use ixopt_core::catalog::{IndexId, TableInfo};
use ixopt_core::cost::Cost;
use ixopt_core::error::OptResult;
use ixopt_core::expr::{AggFunc, BinaryOp, ColumnRef, Expr, ScalarValue, UnaryOp};
use ixopt_core::plan::{CandidatePlan, GroupMinMaxPlan, QueryShape};
use ixopt_core::range::{Interval, KeyRange};
use ixopt_core::rule::{AccessRule, PlanContext};
use ixopt_core::search::SearchConfig;
use ixopt_core::trace::TraceRecord;
use ixopt_core::tree::TreeKind;
use std::collections::BTreeSet;
use tracing::{debug, trace};

pub struct GroupMinMaxRule;

impl AccessRule for GroupMinMaxRule {
    fn name(&self) -> &str {
        "group_min_max"
    }

    fn requires_tree(&self) -> bool {
        false
    }

    fn enabled(&self, config: &SearchConfig) -> bool {
        config.group_min_max
    }

    fn apply(&self, ctx: &mut PlanContext<'_>) -> OptResult<Option<CandidatePlan>> {
        let shape = match LooseShape::from_query(ctx.query) {
            Ok(shape) => shape,
            Err(cause) => {
                ctx.trace.set("cause", cause);
                return Ok(None);
            }
        };
        let conjuncts: Vec<Expr> = match ctx.predicate {
            Some(p) => p.conjuncts().into_iter().cloned().collect(),
            None => Vec::new(),
        };

        let mut best: Option<GroupMinMaxPlan> = None;
        for index in 0..ctx.table.indexes.len() {
            ctx.range.check_killed()?;
            let mut index_trace = TraceRecord::new("index").with("index", &ctx.table.indexes[index].name);
            match plan_index(ctx, &shape, &conjuncts, index, &mut index_trace)? {
                Ok(plan) => {
                    index_trace.set("rows", plan.rows);
                    index_trace.set("cost", plan.cost.total);
                    let bound = best.as_ref().map_or(ctx.best_cost, |b| b.cost);
                    if plan.cost < bound {
                        best = Some(plan);
                    }
                }
                Err(cause) => {
                    trace!(index = %ctx.table.indexes[index].name, cause, "loose index scan not applicable");
                    index_trace.set("usable", false);
                    index_trace.set("cause", cause);
                }
            }
            ctx.trace.push(index_trace);
        }
        Ok(best.map(CandidatePlan::GroupMinMax))
    }
}

/// Grouping requirements of the query.
#[derive(Debug, Clone, PartialEq)]
struct LooseShape {
    group: BTreeSet<usize>,
    min_max_column: Option<usize>,
    have_min: bool,
    have_max: bool,
    distinct_aggregate: bool,
}

impl LooseShape {
    fn from_query(query: &QueryShape) -> Result<Self, &'static str> {
        let mut group: BTreeSet<usize> = query.group_by.iter().copied().collect();
        if group.is_empty() && query.distinct {
            group.extend(query.select_columns.iter().copied());
        }
        let mut shape = LooseShape {
            group: BTreeSet::new(),
            min_max_column: None,
            have_min: false,
            have_max: false,
            distinct_aggregate: false,
        };
        let mut distinct_args = BTreeSet::new();
        for agg in &query.aggregates {
            let Some(column) = agg.column else {
                return Err("aggregate over an expression");
            };
            match (agg.func, agg.distinct) {
                (AggFunc::Min | AggFunc::Max, _) => {
                    if shape.min_max_column.is_some_and(|c| c != column) {
                        return Err("MIN/MAX over different columns");
                    }
                    shape.min_max_column = Some(column);
                    shape.have_min |= agg.func == AggFunc::Min;
                    shape.have_max |= agg.func == AggFunc::Max;
                }
                (_, true) => {
                    shape.distinct_aggregate = true;
                    distinct_args.insert(column);
                }
                (_, false) => return Err("aggregate needs every row"),
            }
        }
        if shape.distinct_aggregate {
            if shape.min_max_column.is_some() {
                return Err("DISTINCT aggregate mixed with MIN/MAX");
            }
            if !query.group_by.is_empty() || query.distinct {
                return Err("DISTINCT aggregate with grouping");
            }
            group = distinct_args;
        }
        if group.is_empty() {
            return Err("no grouping");
        }
        if !query.select_columns.iter().all(|c| group.contains(c)) {
            return Err("select list column outside the group");
        }
        if shape.min_max_column.is_some_and(|c| group.contains(&c)) {
            return Err("MIN/MAX argument is a group column");
        }
        shape.group = group;
        Ok(shape)
    }
}

/// What the WHERE clause says about one column of the loose index.
enum ColumnCondition {
    Impossible,
    Unrestricted,
    Intervals(Vec<Interval>),
    Unusable,
}

fn is_local(table: &TableInfo, c: &ColumnRef) -> bool {
    c.table
        .as_deref()
        .map_or(true, |t| t == table.table.name || t == table.table.to_string())
}

/// The single local column `expr` references. `Ok(None)` for constants.
fn single_column(table: &TableInfo, expr: &Expr) -> Result<Option<usize>, &'static str> {
    let mut found = None;
    for c in expr.columns() {
        if !is_local(table, c) {
            return Err("condition references another table");
        }
        let col = table.column_index(&c.name).ok_or("unknown column")?;
        match found {
            Some(f) if f != col => return Err("condition over several columns"),
            _ => found = Some(col),
        }
    }
    Ok(found)
}

/// Whether `expr` calls a function anywhere.
fn calls_function(expr: &Expr) -> bool {
    match expr {
        Expr::Function { .. } => true,
        Expr::Column(_) | Expr::Literal(_) | Expr::Param(_) => false,
        Expr::BinaryOp { left, right, .. } => calls_function(left) || calls_function(right),
        Expr::UnaryOp { operand, .. } => calls_function(operand),
        Expr::Between { expr, low, high, .. } => {
            calls_function(expr) || calls_function(low) || calls_function(high)
        }
        Expr::InList { expr, list, .. } => calls_function(expr) || list.iter().any(calls_function),
        Expr::Like { expr, .. } => calls_function(expr),
        Expr::And(items) | Expr::Or(items) => items.iter().any(calls_function),
    }
}

fn is_constant(expr: &Expr) -> bool {
    matches!(expr, Expr::Literal(_))
}

fn is_column(expr: &Expr) -> bool {
    matches!(expr, Expr::Column(_))
}

/// `col = const`, in either operand order.
fn is_infix_condition(expr: &Expr) -> bool {
    match expr {
        Expr::BinaryOp {
            op: BinaryOp::Eq | BinaryOp::NullSafeEq,
            left,
            right,
        } => (is_column(left) && is_constant(right)) || (is_constant(left) && is_column(right)),
        _ => false,
    }
}

/// Conditions whose ranges describe the admissible argument values exactly.
fn is_argument_condition(expr: &Expr) -> bool {
    match expr {
        Expr::BinaryOp { op, left, right } => {
            *op != BinaryOp::NotEq
                && ((is_column(left) && is_constant(right)) || (is_constant(left) && is_column(right)))
        }
        Expr::Between {
            expr,
            low,
            high,
            negated: false,
        } => is_column(expr) && is_constant(low) && is_constant(high),
        Expr::UnaryOp {
            op: UnaryOp::IsNull | UnaryOp::IsNotNull,
            operand,
        } => is_column(operand),
        _ => false,
    }
}

/// Intervals of key part `part` of `index` implied by `exprs` together.
fn column_condition(
    ctx: &mut PlanContext<'_>,
    index: IndexId,
    part: usize,
    exprs: &[&Expr],
) -> OptResult<ColumnCondition> {
    if exprs.is_empty() {
        return Ok(ColumnCondition::Unrestricted);
    }
    let predicate = Expr::And(exprs.iter().map(|e| (*e).clone()).collect());
    let tree = PredicateAnalyzer::new(ctx.range, ctx.table).analyze(&predicate)?;
    let Some(tree) = tree else {
        return Ok(ColumnCondition::Unusable);
    };
    let condition = match tree.kind {
        TreeKind::Impossible => ColumnCondition::Impossible,
        TreeKind::Always => ColumnCondition::Unrestricted,
        TreeKind::Maybe | TreeKind::KeySmaller => ColumnCondition::Unusable,
        TreeKind::Key => match tree.get(index).map(|n| ctx.range.arena.node(n)) {
            Some(node) if node.part as usize == part && !node.is_maybe() && tree.merges.is_empty() => {
                if node.is_impossible() {
                    ColumnCondition::Impossible
                } else {
                    ColumnCondition::Intervals(
                        node.intervals
                            .iter()
                            .map(|iv| Interval::new(iv.min.clone(), iv.max.clone()))
                            .collect(),
                    )
                }
            }
            _ => ColumnCondition::Unusable,
        },
    };
    ctx.range.release_tree(tree);
    Ok(condition)
}

fn plan_index(
    ctx: &mut PlanContext<'_>,
    shape: &LooseShape,
    conjuncts: &[Expr],
    index: IndexId,
    index_trace: &mut TraceRecord,
) -> OptResult<Result<GroupMinMaxPlan, &'static str>> {
    let table = ctx.table;
    let def = &table.indexes[index];
    if !table.index_covers(index, &ctx.query.used_columns) {
        return Ok(Err("index does not cover the query"));
    }
    let columns: Vec<usize> = def.parts.iter().map(|p| p.column).collect();
    let group_len = shape.group.len();
    if columns.len() < group_len || columns[..group_len].iter().copied().collect::<BTreeSet<_>>() != shape.group {
        return Ok(Err("group columns are not a key prefix"));
    }

    // Classify the conjuncts by column.
    let mut by_column: Vec<(usize, Vec<&Expr>)> = Vec::new();
    let mut row_independent = 0usize;
    for c in conjuncts {
        let column = match single_column(table, c) {
            Ok(Some(col)) => col,
            Ok(None) if calls_function(c) => return Ok(Err("condition without columns may differ per row")),
            Ok(None) => {
                row_independent += 1;
                continue;
            }
            Err(cause) => return Ok(Err(cause)),
        };
        match by_column.iter_mut().find(|(col, _)| *col == column) {
            Some((_, list)) => list.push(c),
            None => by_column.push((column, vec![c])),
        }
    }
    if row_independent > 0 {
        index_trace.set("row_independent_conditions", row_independent);
    }
    let conditions_on = |col: usize| -> Vec<&Expr> {
        by_column
            .iter()
            .find(|(c, _)| *c == col)
            .map(|(_, list)| list.clone())
            .unwrap_or_default()
    };

    // Key infix and MIN/MAX argument.
    let mut key_infix: Vec<ScalarValue> = Vec::new();
    let mut used_key_parts = group_len;
    let mut min_max_ranges = Vec::new();
    if let Some(arg) = shape.min_max_column {
        let Some(arg_part) = columns.iter().skip(group_len).position(|&c| c == arg).map(|p| p + group_len) else {
            return Ok(Err("MIN/MAX argument is not in the index"));
        };
        for part in group_len..arg_part {
            let exprs = conditions_on(columns[part]);
            if exprs.is_empty() || !exprs.iter().all(|e| is_infix_condition(e)) {
                return Ok(Err("key part between group and argument is not fixed"));
            }
            match column_condition(ctx, index, part, &exprs)? {
                ColumnCondition::Intervals(ivs) if ivs.len() == 1 && ivs[0].is_singlepoint() => {
                    if let Some(v) = ivs[0].point_value() {
                        key_infix.push(v.clone());
                    }
                }
                ColumnCondition::Impossible => return Ok(Err("impossible infix condition")),
                _ => return Ok(Err("key part between group and argument is not fixed")),
            }
        }
        let exprs = conditions_on(arg);
        if !exprs.iter().all(|e| is_argument_condition(e)) {
            return Ok(Err("unsupported condition on the MIN/MAX argument"));
        }
        match column_condition(ctx, index, arg_part, &exprs)? {
            ColumnCondition::Unrestricted => {}
            ColumnCondition::Intervals(ivs) => min_max_ranges = ivs,
            ColumnCondition::Impossible => return Ok(Err("impossible condition on the MIN/MAX argument")),
            ColumnCondition::Unusable => return Ok(Err("unsupported condition on the MIN/MAX argument")),
        }
        used_key_parts = arg_part + 1;
    }

    // Every conjunct must be on a group, infix or argument column.
    for (col, _) in &by_column {
        let allowed = shape.group.contains(col)
            || columns[group_len..group_len + key_infix.len()].contains(col)
            || shape.min_max_column == Some(*col);
        if !allowed {
            return Ok(Err("condition on a column outside the loose key prefix"));
        }
    }

    // Ranges on the group prefix from the full range tree.
    let prefix_ranges: Option<Vec<KeyRange>> = ctx
        .tree
        .and_then(|t| t.get(index))
        .filter(|&n| {
            let node = ctx.range.arena.node(n);
            node.part == 0 && !node.is_maybe() && !node.is_impossible()
        })
        .map(|n| ctx.range.key_ranges(index, n, group_len));

    // Cost.
    let oracle = ctx.oracle;
    let table_rows = oracle.table_rows().max(0.0);
    let keys_per_block = oracle.keys_per_block(index).max(1.0);
    let mut groups = oracle
        .distinct_keys(index, group_len)
        .unwrap_or((table_rows / 10.0).max(1.0))
        .min(table_rows.max(1.0));
    let mut covered_rows = table_rows;
    if let Some(ranges) = &prefix_ranges {
        if let Some(prefix_rows) = oracle.records_in_ranges(index, ranges) {
            let fraction = if table_rows > 0.0 { (prefix_rows / table_rows).min(1.0) } else { 0.0 };
            groups = (groups * fraction).max(1.0);
            covered_rows = prefix_rows.min(table_rows);
        }
    }
    let keys_per_group = if groups > 0.0 { covered_rows / groups } else { 0.0 };
    let read = if keys_per_group > keys_per_block {
        let mut dives = if shape.have_min && shape.have_max { 2.0 } else { 1.0 };
        if !key_infix.is_empty() || !min_max_ranges.is_empty() {
            dives += 1.0;
        }
        oracle.index_only_scan_cost(index, (groups * dives).ceil() as usize, 0.0)
    } else {
        oracle.index_only_scan_cost(index, prefix_ranges.as_ref().map_or(1, |r| r.len()), covered_rows)
    };
    let cost = read + Cost::new(groups * oracle.row_evaluate_cost());
    index_trace.set("group_prefix_len", group_len);
    index_trace.set("used_key_parts", used_key_parts);
    index_trace.set("groups", groups);
    index_trace.set("keys_per_group", keys_per_group);

    if shape.distinct_aggregate {
        // Alternative: read the index and de-duplicate the arguments.
        let dedup = oracle.index_only_scan_cost(index, 1, covered_rows)
            + oracle.unique_use_cost(covered_rows, table.key_length(index), ctx.config.sort_buffer_size);
        if cost >= dedup {
            debug!(index = %def.name, cost = cost.total, dedup = dedup.total, "de-duplication is cheaper");
            return Ok(Err("de-duplication is cheaper"));
        }
    }

    Ok(Ok(GroupMinMaxPlan {
        index,
        index_name: def.name.clone(),
        used_key_parts,
        group_prefix_len: group_len,
        key_infix,
        min_max_ranges,
        have_min: shape.have_min,
        have_max: shape.have_max,
        prefix_ranges,
        distinct_aggregate: shape.distinct_aggregate,
        rows: groups,
        cost,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ixopt_core::plan::AggregateShape;

    fn agg(func: AggFunc, column: usize, distinct: bool) -> AggregateShape {
        AggregateShape {
            func,
            column: Some(column),
            distinct,
        }
    }

    #[test]
    fn test_group_by_with_min_and_max() {
        let query = QueryShape {
            used_columns: BTreeSet::from([0, 1]),
            group_by: vec![0],
            select_columns: vec![0],
            aggregates: vec![agg(AggFunc::Min, 1, false), agg(AggFunc::Max, 1, false)],
            ..Default::default()
        };
        let shape = LooseShape::from_query(&query).unwrap();
        assert_eq!(shape.group, BTreeSet::from([0]));
        assert_eq!(shape.min_max_column, Some(1));
        assert!(shape.have_min && shape.have_max);
    }

    #[test]
    fn test_distinct_select_groups_on_select_list() {
        let query = QueryShape {
            used_columns: BTreeSet::from([1, 2]),
            distinct: true,
            select_columns: vec![2, 1],
            ..Default::default()
        };
        let shape = LooseShape::from_query(&query).unwrap();
        assert_eq!(shape.group, BTreeSet::from([1, 2]));
        assert_eq!(shape.min_max_column, None);
    }

    #[test]
    fn test_distinct_aggregate_uses_arguments() {
        let query = QueryShape {
            used_columns: BTreeSet::from([3]),
            aggregates: vec![agg(AggFunc::Count, 3, true)],
            ..Default::default()
        };
        let shape = LooseShape::from_query(&query).unwrap();
        assert!(shape.distinct_aggregate);
        assert_eq!(shape.group, BTreeSet::from([3]));
    }

    #[test]
    fn test_unsupported_shapes() {
        let no_group = QueryShape::reading([0]);
        assert_eq!(LooseShape::from_query(&no_group), Err("no grouping"));

        let sum = QueryShape {
            group_by: vec![0],
            aggregates: vec![agg(AggFunc::Sum, 1, false)],
            ..Default::default()
        };
        assert_eq!(LooseShape::from_query(&sum), Err("aggregate needs every row"));

        let two_args = QueryShape {
            group_by: vec![0],
            aggregates: vec![agg(AggFunc::Min, 1, false), agg(AggFunc::Max, 2, false)],
            ..Default::default()
        };
        assert_eq!(LooseShape::from_query(&two_args), Err("MIN/MAX over different columns"));

        let outside = QueryShape {
            group_by: vec![0],
            select_columns: vec![0, 1],
            ..Default::default()
        };
        assert_eq!(
            LooseShape::from_query(&outside),
            Err("select list column outside the group")
        );
    }

    #[test]
    fn test_condition_forms() {
        let col = Expr::col("b");
        assert!(is_argument_condition(&col.clone().gt(Expr::lit(3))));
        assert!(is_argument_condition(&Expr::lit(3).lt_eq(col.clone())));
        assert!(is_argument_condition(&col.clone().between(Expr::lit(1), Expr::lit(2))));
        assert!(is_argument_condition(&col.clone().is_null()));
        assert!(!is_argument_condition(&col.clone().not_equals(Expr::lit(3))));
        assert!(!is_argument_condition(&col.clone().like("a%")));
        assert!(!is_argument_condition(&col.clone().gt(Expr::param("p"))));

        assert!(is_infix_condition(&col.clone().equals(Expr::lit(1))));
        assert!(!is_infix_condition(&col.gt(Expr::lit(1))));
    }

    #[test]
    fn test_column_free_function_is_detected() {
        let rand = Expr::Function {
            name: "rand".to_string(),
            args: Vec::new(),
        };
        assert!(calls_function(&rand.clone().gt(Expr::lit(0))));
        assert!(calls_function(&Expr::lit(1).equals(Expr::lit(1)).and(rand)));
        assert!(!calls_function(&Expr::param("p").equals(Expr::lit(1))));
        assert!(!calls_function(&Expr::lit(1).equals(Expr::lit(1))));
    }
}
