//! Randomized checks of the range analysis against a reference evaluation of
//! the predicate over an in-memory table.
//!
//! Range trees are *implied* by the predicate: every row the predicate
//! accepts must lie in the ranges of every index of the tree and in at least
//! one disjunct of every merge set. Winning plans must retrieve every such row.

use ixopt_core::analyzer::PredicateAnalyzer;
use ixopt_core::catalog::{ColumnDef, DataType, IndexDef, TableInfo};
use ixopt_core::context::RangeContext;
use ixopt_core::cost::{CostConstants, StatsCostOracle};
use ixopt_core::expr::{BinaryOp, Expr, ScalarValue, TableRef, UnaryOp};
use ixopt_core::plan::{AccessDecision, QueryShape};
use ixopt_core::quick::{IndexSource, MemTable, RowId};
use ixopt_core::range::node::cmp_min_to_min;
use ixopt_core::range::{NodeId, MAX_KEY_PARTS};
use ixopt_core::search::{AccessPathSearch, SearchConfig};
use ixopt_core::stats::{IndexStatistics, Statistics};
use ixopt_core::trace::NoopTraceSink;
use ixopt_core::tree::{RangeTree, TreeKind};
use proptest::prelude::*;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

const COLUMNS: [&str; 3] = ["a", "b", "c"];

fn test_table() -> TableInfo {
    let int = DataType::Int {
        bits: 32,
        unsigned: false,
    };
    TableInfo::new(
        TableRef::new("test", "t"),
        COLUMNS.iter().map(|c| ColumnDef::new(*c, int, true)).collect(),
    )
    .with_index(IndexDef::new("a", &[0]))
    .with_index(IndexDef::new("ab", &[0, 1]))
    .with_index(IndexDef::new("b", &[1]))
    .with_index(IndexDef::new("cb", &[2, 1]))
}

// ---------------------------------------------------------------------------
// Reference evaluation (three-valued)
// ---------------------------------------------------------------------------

fn value(e: &Expr, row: &[ScalarValue]) -> ScalarValue {
    match e {
        Expr::Column(c) => {
            let i = COLUMNS.iter().position(|n| *n == c.name).unwrap();
            row[i].clone()
        }
        Expr::Literal(v) => v.clone(),
        other => panic!("not a value: {other:?}"),
    }
}

fn compare(l: &ScalarValue, r: &ScalarValue) -> Option<Ordering> {
    if l.is_null() || r.is_null() {
        None
    } else {
        Some(l.key_cmp(r))
    }
}

fn and3(items: impl IntoIterator<Item = Option<bool>>) -> Option<bool> {
    let mut unknown = false;
    for v in items {
        match v {
            Some(false) => return Some(false),
            None => unknown = true,
            Some(true) => {}
        }
    }
    if unknown {
        None
    } else {
        Some(true)
    }
}

fn or3(items: impl IntoIterator<Item = Option<bool>>) -> Option<bool> {
    and3(items.into_iter().map(|v| v.map(|b| !b))).map(|b| !b)
}

fn eval(e: &Expr, row: &[ScalarValue]) -> Option<bool> {
    match e {
        Expr::BinaryOp { op, left, right } => {
            let (l, r) = (value(left, row), value(right, row));
            if *op == BinaryOp::NullSafeEq {
                return Some(match (l.is_null(), r.is_null()) {
                    (true, true) => true,
                    (false, false) => l.key_cmp(&r) == Ordering::Equal,
                    _ => false,
                });
            }
            let ord = compare(&l, &r)?;
            Some(match op {
                BinaryOp::Eq => ord == Ordering::Equal,
                BinaryOp::NotEq => ord != Ordering::Equal,
                BinaryOp::Lt => ord == Ordering::Less,
                BinaryOp::LtEq => ord != Ordering::Greater,
                BinaryOp::Gt => ord == Ordering::Greater,
                BinaryOp::GtEq => ord != Ordering::Less,
                BinaryOp::NullSafeEq => unreachable!(),
            })
        }
        Expr::UnaryOp { op, operand } => match op {
            UnaryOp::Not => eval(operand, row).map(|b| !b),
            UnaryOp::IsNull => Some(value(operand, row).is_null()),
            UnaryOp::IsNotNull => Some(!value(operand, row).is_null()),
        },
        Expr::Between {
            expr,
            low,
            high,
            negated,
        } => {
            let v = value(expr, row);
            let lo = compare(&v, &value(low, row)).map(|o| o != Ordering::Less);
            let hi = compare(&v, &value(high, row)).map(|o| o != Ordering::Greater);
            let r = and3([lo, hi]);
            if *negated {
                r.map(|b| !b)
            } else {
                r
            }
        }
        Expr::InList { expr, list, negated } => {
            let v = value(expr, row);
            let r = or3(list.iter().map(|item| {
                compare(&v, &value(item, row)).map(|o| o == Ordering::Equal)
            }));
            if *negated {
                r.map(|b| !b)
            } else {
                r
            }
        }
        Expr::And(items) => and3(items.iter().map(|i| eval(i, row))),
        Expr::Or(items) => or3(items.iter().map(|i| eval(i, row))),
        other => panic!("not generated: {other:?}"),
    }
}

fn matching(mem: &MemTable, pred: &Expr) -> BTreeSet<RowId> {
    mem.rows
        .iter()
        .enumerate()
        .filter(|(_, row)| eval(pred, row) == Some(true))
        .map(|(id, _)| id as RowId)
        .collect()
}

// ---------------------------------------------------------------------------
// Generators
// ---------------------------------------------------------------------------

fn literal() -> impl Strategy<Value = Expr> {
    prop_oneof![
        9 => (-3i64..8).prop_map(|v| Expr::lit(v)),
        1 => Just(Expr::null()),
    ]
}

fn column() -> impl Strategy<Value = Expr> {
    prop::sample::select(COLUMNS.to_vec()).prop_map(Expr::col)
}

fn atom() -> impl Strategy<Value = Expr> {
    let op = prop::sample::select(vec![
        BinaryOp::Eq,
        BinaryOp::NullSafeEq,
        BinaryOp::NotEq,
        BinaryOp::Lt,
        BinaryOp::LtEq,
        BinaryOp::Gt,
        BinaryOp::GtEq,
    ]);
    prop_oneof![
        4 => (column(), op, literal(), any::<bool>()).prop_map(|(c, op, v, flip)| {
            if flip {
                v.binary(op.mirror(), c)
            } else {
                c.binary(op, v)
            }
        }),
        1 => (column(), literal(), literal(), any::<bool>()).prop_map(|(c, lo, hi, negated)| {
            Expr::Between {
                expr: Box::new(c),
                low: Box::new(lo),
                high: Box::new(hi),
                negated,
            }
        }),
        1 => (column(), prop::collection::vec(literal(), 1..5), any::<bool>()).prop_map(
            |(c, list, negated)| Expr::InList {
                expr: Box::new(c),
                list,
                negated,
            }
        ),
        1 => (column(), any::<bool>()).prop_map(|(c, null)| if null { c.is_null() } else { c.is_not_null() }),
    ]
}

fn predicate() -> impl Strategy<Value = Expr> {
    atom().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 2..4).prop_map(Expr::And),
            prop::collection::vec(inner.clone(), 2..4).prop_map(Expr::Or),
            inner.prop_map(Expr::negate),
        ]
    })
}

fn rows() -> impl Strategy<Value = Vec<Vec<ScalarValue>>> {
    let cell = prop::option::weighted(0.85, -3i64..8)
        .prop_map(|v| v.map_or(ScalarValue::Null, ScalarValue::Int64));
    prop::collection::vec(prop::collection::vec(cell, COLUMNS.len()), 0..40)
}

// ---------------------------------------------------------------------------
// Tree inspection
// ---------------------------------------------------------------------------

/// Whether `row` lies inside the ranges of every analyzable index of `tree`.
fn row_in_tree(ctx: &RangeContext, mem: &MemTable, tree: &RangeTree, row: RowId) -> bool {
    if tree.kind == TreeKind::Impossible {
        return false;
    }
    if !tree.is_key() {
        return true;
    }
    for index in tree.keys_map.iter() {
        let Some(node) = tree.get(index) else {
            continue;
        };
        let n = ctx.arena.node(node);
        if n.is_maybe() || n.part != 0 {
            continue;
        }
        let ranges = ctx.key_ranges(index, node, MAX_KEY_PARTS);
        let descending = ctx.indexes[index].descending();
        let inside = ranges
            .iter()
            .any(|r| mem.scan_range(index, r, &descending).contains(&row));
        if !inside {
            return false;
        }
    }
    tree.merges
        .iter()
        .all(|m| m.trees.iter().any(|t| row_in_tree(ctx, mem, t, row)))
}

fn roots(tree: &RangeTree, out: &mut Vec<NodeId>) {
    out.extend(tree.keys.iter().flatten().copied());
    for m in &tree.merges {
        for t in &m.trees {
            roots(t, out);
        }
    }
}

fn analyze(table: &TableInfo, pred: &Expr) -> (RangeContext, Option<RangeTree>) {
    analyze_with(table, pred, &SearchConfig::default())
}

fn analyze_with(table: &TableInfo, pred: &Expr, config: &SearchConfig) -> (RangeContext, Option<RangeTree>) {
    let mut ctx = RangeContext::new(table, config).unwrap();
    let tree = PredicateAnalyzer::new(&mut ctx, table).analyze(pred).unwrap();
    (ctx, tree)
}

/// Interval, weight and merge limits small enough that generated predicates
/// run into them.
fn limits() -> impl Strategy<Value = SearchConfig> {
    (1usize..=24, prop_oneof![Just(0u32), 1u32..=48], 1usize..=4).prop_map(
        |(max_sel_args, max_sel_arg_weight, max_merge_disjuncts)| SearchConfig {
            max_sel_args,
            max_sel_arg_weight,
            max_merge_disjuncts,
            ..SearchConfig::default()
        },
    )
}

/// Whether the chosen access path reads every row in `expected`.
fn plan_covers(
    table: &TableInfo,
    mem: &MemTable,
    pred: &Expr,
    config: SearchConfig,
    expected: &BTreeSet<RowId>,
) -> Result<(), TestCaseError> {
    let oracle = StatsCostOracle::new(table.clone(), stats_for(table, mem.rows.len()), CostConstants::default());
    let search = AccessPathSearch::new(Arc::new(ixopt_rules::default_rule_registry()), config);
    let out = search.optimize(table, &oracle, Some(pred), &QueryShape::reading([0, 1, 2]), &mut NoopTraceSink);
    match &out.decision {
        AccessDecision::Impossible => prop_assert!(expected.is_empty()),
        AccessDecision::FullScan { .. } => {}
        AccessDecision::Plan(plan) => {
            let retrieved: BTreeSet<RowId> = plan.materialize(table).row_ids(mem).into_iter().collect();
            prop_assert!(expected.is_subset(&retrieved), "plan {:?} missed rows", plan.kind());
        }
    }
    Ok(())
}

fn stats_for(table: &TableInfo, rows: usize) -> Statistics {
    let n = rows.max(1) as f64;
    let mut stats = Statistics::new(n * 1000.0, n * 1000.0 * 24.0);
    for index in &table.indexes {
        let rpk = (1..=index.parts.len()).map(|p| 100.0 / p as f64).collect();
        stats = stats.with_index(index.name.clone(), IndexStatistics::new(rpk));
    }
    stats
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn test_tree_contains_every_matching_row(pred in predicate(), data in rows()) {
        let table = test_table();
        let mem = MemTable::new(table.clone(), data);
        let expected = matching(&mem, &pred);
        let (ctx, tree) = analyze(&table, &pred);
        if let Some(tree) = &tree {
            for &row in &expected {
                prop_assert!(row_in_tree(&ctx, &mem, tree, row), "row {} escaped the ranges", row);
            }
        }
    }

    #[test]
    fn test_intervals_sorted_and_disjoint(pred in predicate()) {
        let table = test_table();
        let (ctx, tree) = analyze(&table, &pred);
        let Some(tree) = tree else { return Ok(()) };
        let mut all = Vec::new();
        roots(&tree, &mut all);
        for node in ctx.arena.reachable_references(&all).keys() {
            let ivs = &ctx.arena.node(*node).intervals;
            for pair in ivs.windows(2) {
                prop_assert_eq!(cmp_min_to_min(&pair[0].min, &pair[1].min), Ordering::Less);
                prop_assert!(!pair[0].overlaps(&pair[1]), "overlapping siblings in {}", ctx.arena.describe(*node));
            }
        }
    }

    #[test]
    fn test_weight_matches_recount(pred in predicate()) {
        let table = test_table();
        let (ctx, tree) = analyze(&table, &pred);
        let Some(tree) = tree else { return Ok(()) };
        let mut all = Vec::new();
        roots(&tree, &mut all);
        for node in ctx.arena.reachable_references(&all).keys() {
            prop_assert_eq!(u64::from(ctx.arena.node(*node).weight), ctx.arena.verify_weight(*node));
        }
    }

    #[test]
    fn test_use_counts_cover_every_holder(pred in predicate()) {
        let table = test_table();
        let (ctx, tree) = analyze(&table, &pred);
        let Some(tree) = tree else { return Ok(()) };
        let mut all = Vec::new();
        roots(&tree, &mut all);
        let refs: HashMap<NodeId, u32> = ctx.arena.reachable_references(&all);
        for (node, holders) in refs {
            prop_assert!(ctx.arena.node(node).use_count >= holders);
        }
    }

    #[test]
    fn test_and_with_impossible_is_impossible(pred in predicate()) {
        let table = test_table();
        let empty = Expr::col("a").between(Expr::lit(5), Expr::lit(1));
        let (_, tree) = analyze(&table, &pred.and(empty));
        prop_assert_eq!(tree.map(|t| t.kind), Some(TreeKind::Impossible));
    }

    #[test]
    fn test_plan_retrieves_every_matching_row(pred in predicate(), data in rows()) {
        let table = test_table();
        let mem = MemTable::new(table.clone(), data);
        let expected = matching(&mem, &pred);
        plan_covers(&table, &mem, &pred, SearchConfig::default(), &expected)?;
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn test_tree_contains_every_matching_row_under_limits(
        pred in predicate(),
        data in rows(),
        config in limits(),
    ) {
        let table = test_table();
        let mem = MemTable::new(table.clone(), data);
        let expected = matching(&mem, &pred);
        let (ctx, tree) = analyze_with(&table, &pred, &config);
        if let Some(tree) = &tree {
            for &row in &expected {
                prop_assert!(row_in_tree(&ctx, &mem, tree, row), "row {} escaped the ranges under {:?}", row, config);
            }
        }
    }

    #[test]
    fn test_and_with_impossible_is_impossible_under_limits(pred in predicate(), config in limits()) {
        let table = test_table();
        let empty = Expr::col("a").between(Expr::lit(5), Expr::lit(1));
        let (_, tree) = analyze_with(&table, &pred.and(empty), &config);
        prop_assert_eq!(tree.map(|t| t.kind), Some(TreeKind::Impossible));
    }

    #[test]
    fn test_plan_retrieves_every_matching_row_under_limits(
        pred in predicate(),
        data in rows(),
        config in limits(),
    ) {
        let table = test_table();
        let mem = MemTable::new(table.clone(), data);
        let expected = matching(&mem, &pred);
        plan_covers(&table, &mem, &pred, config, &expected)?;
    }
}
