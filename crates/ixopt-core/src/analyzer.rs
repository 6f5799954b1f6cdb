//! # Predicate Analysis
//!
//! Translates a single-table predicate into a [`RangeTree`]:
//!
//! - `AND` / `OR` recurse and combine through `tree_and` / `tree_or`.
//! - `NOT` is pushed down to the leaves (De Morgan; comparison operators are
//!   complemented, `BETWEEN` / `IN` / `IS NULL` flip their negation flag).
//! - A comparison of a column of this table with a constant becomes, for every
//!   index containing that column, a one-node graph on the column's key part.
//! - A comparison with a value unknown at optimization time (parameter, column
//!   of another table) becomes a MAYBE node.
//! - Anything else is unanalyzable and yields `None` ("no restriction").
//!
//! ## Literal Conversion
//!
//! Constants are converted to the column's storage type before building
//! intervals. Values outside the column's domain are truncated with the
//! operator adjusted so the interval still contains every qualifying stored
//! value, e.g. for a `TINYINT` column:
//!
//! ```text
//! a = 300    -> IMPOSSIBLE
//! a < 300    -> a <= 127
//! a > -300   -> a >= -128
//! a = 2.5    -> IMPOSSIBLE        (integer column)
//! a < 2.5    -> a <= 2
//! ```

use crate::catalog::{DataType, TableInfo};
use crate::context::RangeContext;
use crate::error::OptResult;
use crate::expr::{BinaryOp, ColumnRef, Expr, ScalarValue, UnaryOp};
use crate::range::{Interval, KeyPart, NodeId, NodeKind, RangeArena};
use crate::tree::{RangeTree, TreeKind};
use std::cmp::Ordering;
use std::ops::Bound;
use tracing::trace;

/// What a comparison operand evaluates to at optimization time.
enum Operand {
    Known(ScalarValue),
    /// Constant during execution, but not known yet.
    Unknown,
    /// Depends on the row being evaluated.
    Variable,
}

/// Outcome of converting a literal to a column's storage type.
#[derive(Debug, PartialEq)]
enum Converted {
    Value(BinaryOp, ScalarValue),
    Impossible,
    NotSargable,
}

pub struct PredicateAnalyzer<'a> {
    ctx: &'a mut RangeContext,
    table: &'a TableInfo,
}

impl<'a> PredicateAnalyzer<'a> {
    pub fn new(ctx: &'a mut RangeContext, table: &'a TableInfo) -> Self {
        Self { ctx, table }
    }

    /// Build the range tree implied by `predicate`.
    pub fn analyze(&mut self, predicate: &Expr) -> OptResult<Option<RangeTree>> {
        self.build(predicate, false)
    }

    fn build(&mut self, expr: &Expr, negated: bool) -> OptResult<Option<RangeTree>> {
        self.ctx.check_killed()?;
        match expr {
            Expr::And(items) if negated => self.or_all(items, true),
            Expr::And(items) => self.and_all(items, false),
            Expr::Or(items) if negated => self.and_all(items, true),
            Expr::Or(items) => self.or_all(items, false),
            Expr::UnaryOp {
                op: UnaryOp::Not,
                operand,
            } => self.build(operand, !negated),
            Expr::UnaryOp {
                op: UnaryOp::IsNull,
                operand,
            } => self.null_test(operand, !negated),
            Expr::UnaryOp {
                op: UnaryOp::IsNotNull,
                operand,
            } => self.null_test(operand, negated),
            Expr::Literal(v) => Ok(Some(literal_truth(v, negated))),
            Expr::Param(_) => Ok(Some(RangeTree::maybe())),
            Expr::BinaryOp { op, left, right } => {
                let op = if negated {
                    match op.negate() {
                        Some(op) => op,
                        None => return Ok(None),
                    }
                } else {
                    *op
                };
                self.comparison(op, left, right)
            }
            Expr::Between {
                expr,
                low,
                high,
                negated: n,
            } => self.between(expr, low, high, *n != negated),
            Expr::InList {
                expr,
                list,
                negated: n,
            } => self.in_list(expr, list, *n != negated),
            Expr::Like {
                expr,
                pattern,
                negated: n,
            } => {
                if *n != negated {
                    Ok(None)
                } else {
                    self.like(expr, pattern)
                }
            }
            Expr::Column(_) | Expr::Function { .. } => Ok(None),
        }
    }

    fn and_all(&mut self, items: &[Expr], negated: bool) -> OptResult<Option<RangeTree>> {
        if items.is_empty() {
            return Ok(Some(RangeTree::always()));
        }
        let mut acc: Option<RangeTree> = None;
        for item in items {
            let t = self.build(item, negated)?;
            acc = self.ctx.tree_and(acc, t)?;
            if acc.as_ref().is_some_and(|t| t.kind == TreeKind::Impossible) {
                break;
            }
        }
        Ok(acc)
    }

    fn or_all(&mut self, items: &[Expr], negated: bool) -> OptResult<Option<RangeTree>> {
        let Some((first, rest)) = items.split_first() else {
            return Ok(Some(RangeTree::impossible()));
        };
        let mut acc = self.build(first, negated)?;
        for item in rest {
            if acc.is_none() {
                // One unanalyzable disjunct leaves the whole OR unrestricted.
                return Ok(None);
            }
            let t = self.build(item, negated)?;
            acc = self.ctx.tree_or(acc, t)?;
        }
        Ok(acc)
    }

    /// Ordinal of `expr` if it is a column of the table being optimized.
    fn local_column(&self, expr: &Expr) -> OptResult<Option<usize>> {
        let Expr::Column(c) = expr else {
            return Ok(None);
        };
        if !self.is_local(c) {
            return Ok(None);
        }
        self.table.resolve_column(&c.name).map(Some)
    }

    fn is_local(&self, c: &ColumnRef) -> bool {
        match &c.table {
            None => true,
            Some(t) => *t == self.table.table.name || *t == self.table.table.to_string(),
        }
    }

    fn operand(&self, expr: &Expr) -> Operand {
        match expr {
            Expr::Literal(v) => Operand::Known(v.clone()),
            Expr::Param(_) => Operand::Unknown,
            Expr::Column(c) if !self.is_local(c) => Operand::Unknown,
            _ => Operand::Variable,
        }
    }

    fn comparison(&mut self, op: BinaryOp, left: &Expr, right: &Expr) -> OptResult<Option<RangeTree>> {
        match (self.local_column(left)?, self.local_column(right)?) {
            (Some(col), None) => self.column_comparison(col, op, right),
            (None, Some(col)) => self.column_comparison(col, op.mirror(), left),
            (Some(_), Some(_)) => Ok(None),
            (None, None) => Ok(self.constant_comparison(op, left, right)),
        }
    }

    /// Fold comparisons without columns of this table.
    fn constant_comparison(&self, op: BinaryOp, left: &Expr, right: &Expr) -> Option<RangeTree> {
        match (self.operand(left), self.operand(right)) {
            (Operand::Known(l), Operand::Known(r)) => {
                let truth = match (l.is_null(), r.is_null()) {
                    (true, true) => op == BinaryOp::NullSafeEq,
                    (true, false) | (false, true) => false,
                    (false, false) => compare_holds(op, l.key_cmp(&r)),
                };
                Some(if truth {
                    RangeTree::always()
                } else {
                    RangeTree::impossible()
                })
            }
            (Operand::Variable, _) | (_, Operand::Variable) => None,
            _ => Some(RangeTree::maybe()),
        }
    }

    fn column_comparison(
        &mut self,
        col: usize,
        op: BinaryOp,
        other: &Expr,
    ) -> OptResult<Option<RangeTree>> {
        let value = match self.operand(other) {
            Operand::Known(v) => v,
            Operand::Unknown => return self.maybe_tree(col),
            Operand::Variable => return Ok(None),
        };
        if value.is_null() {
            return if op == BinaryOp::NullSafeEq {
                self.null_test_column(col, true)
            } else {
                // Ordinary comparisons with NULL are never true.
                Ok(Some(RangeTree::impossible()))
            };
        }
        self.column_tree(col, |arena, kp, part| comparison_node(arena, kp, part, op, &value))
    }

    fn between(
        &mut self,
        expr: &Expr,
        low: &Expr,
        high: &Expr,
        negated: bool,
    ) -> OptResult<Option<RangeTree>> {
        let Some(col) = self.local_column(expr)? else {
            return Ok(None);
        };
        let (lo, hi) = match (self.operand(low), self.operand(high)) {
            (Operand::Known(lo), Operand::Known(hi)) => (lo, hi),
            (Operand::Variable, _) | (_, Operand::Variable) => return Ok(None),
            _ if negated => return Ok(None),
            _ => return self.maybe_tree(col),
        };
        if lo.is_null() || hi.is_null() {
            return Ok(if negated {
                None
            } else {
                Some(RangeTree::impossible())
            });
        }
        if negated {
            self.column_tree(col, |arena, kp, part| {
                let below = comparison_node(arena, kp, part, BinaryOp::Lt, &lo)?;
                let above = comparison_node(arena, kp, part, BinaryOp::Gt, &hi)?;
                arena.key_or(below, above)
            })
        } else {
            self.column_tree(col, |arena, kp, part| {
                let from = comparison_node(arena, kp, part, BinaryOp::GtEq, &lo)?;
                let to = comparison_node(arena, kp, part, BinaryOp::LtEq, &hi)?;
                match (from.and_then(|f| leaf_bounds(arena, f)), to.and_then(|t| leaf_bounds(arena, t))) {
                    // Both ends are plain leaves: one leaf spans them, and an
                    // empty span is IMPOSSIBLE whatever budget is left.
                    (Some((min, _)), Some((_, max))) => {
                        arena.release_opt(from);
                        arena.release_opt(to);
                        Ok(Some(arena.leaf(part, min, max)?))
                    }
                    _ => arena.key_and(from, to),
                }
            })
        }
    }

    fn in_list(&mut self, expr: &Expr, list: &[Expr], negated: bool) -> OptResult<Option<RangeTree>> {
        let Some(col) = self.local_column(expr)? else {
            return Ok(None);
        };
        let mut values = Vec::with_capacity(list.len());
        let mut unknown = false;
        for item in list {
            match self.operand(item) {
                Operand::Known(v) => values.push(v),
                Operand::Unknown => unknown = true,
                Operand::Variable => return Ok(None),
            }
        }
        if unknown {
            return if negated { Ok(None) } else { self.maybe_tree(col) };
        }
        if negated {
            if values.iter().any(ScalarValue::is_null) {
                // `a NOT IN (.., NULL)` is never true.
                return Ok(Some(RangeTree::impossible()));
            }
            if values.len() > self.ctx.max_not_in_list {
                trace!(len = values.len(), "NOT IN list too long for range analysis");
                return Ok(None);
            }
            self.column_tree(col, |arena, kp, part| not_in_node(arena, kp, part, &values))
        } else {
            values.retain(|v| !v.is_null());
            if values.is_empty() {
                return Ok(Some(RangeTree::impossible()));
            }
            self.column_tree(col, |arena, kp, part| in_node(arena, kp, part, &values))
        }
    }

    fn like(&mut self, expr: &Expr, pattern: &str) -> OptResult<Option<RangeTree>> {
        let Some(col) = self.local_column(expr)? else {
            return Ok(None);
        };
        let DataType::Varchar(len) = self.table.columns[col].data_type else {
            return Ok(None);
        };
        let (prefix, exact) = like_prefix(pattern);
        if prefix.is_empty() && !exact {
            return Ok(None);
        }
        if prefix.chars().count() > len as usize {
            return Ok(Some(RangeTree::impossible()));
        }
        let min = Bound::Included(ScalarValue::Utf8(prefix.clone()));
        let max = if exact {
            Bound::Included(ScalarValue::Utf8(prefix))
        } else {
            match string_successor(&prefix) {
                Some(next) => Bound::Excluded(ScalarValue::Utf8(next)),
                None => Bound::Unbounded,
            }
        };
        self.column_tree(col, |arena, _, part| interval_node(arena, part, min.clone(), max.clone()))
    }

    fn null_test(&mut self, operand: &Expr, is_null: bool) -> OptResult<Option<RangeTree>> {
        if let Some(col) = self.local_column(operand)? {
            return self.null_test_column(col, is_null);
        }
        Ok(match self.operand(operand) {
            Operand::Known(v) => Some(if v.is_null() == is_null {
                RangeTree::always()
            } else {
                RangeTree::impossible()
            }),
            Operand::Unknown => Some(RangeTree::maybe()),
            Operand::Variable => None,
        })
    }

    fn null_test_column(&mut self, col: usize, is_null: bool) -> OptResult<Option<RangeTree>> {
        let nullable = self.table.columns[col].nullable;
        match (is_null, nullable) {
            (true, false) => Ok(Some(RangeTree::impossible())),
            (false, false) => Ok(Some(RangeTree::always())),
            (true, true) => self.column_tree(col, |arena, _, part| {
                interval_node(
                    arena,
                    part,
                    Bound::Included(ScalarValue::Null),
                    Bound::Included(ScalarValue::Null),
                )
            }),
            (false, true) => self.column_tree(col, |arena, _, part| {
                interval_node(arena, part, Bound::Excluded(ScalarValue::Null), Bound::Unbounded)
            }),
        }
    }

    fn maybe_tree(&mut self, col: usize) -> OptResult<Option<RangeTree>> {
        self.column_tree(col, |arena, _, part| Ok(Some(arena.maybe_key(part)?)))
    }

    /// Build one graph per index containing `col`, using `build` for the
    /// column's key part. Returns `None` when no index yields a restriction.
    fn column_tree<F>(&mut self, col: usize, mut build: F) -> OptResult<Option<RangeTree>>
    where
        F: FnMut(&mut RangeArena, &KeyPart, u16) -> OptResult<Option<NodeId>>,
    {
        let targets: Vec<(usize, u16, KeyPart)> = self
            .ctx
            .indexes
            .iter()
            .enumerate()
            .filter_map(|(idx, info)| {
                let pos = info.parts.iter().position(|kp| kp.column == col)?;
                Some((idx, pos as u16, info.parts[pos]))
            })
            .collect();
        let mut tree = RangeTree::key(self.ctx.index_count());
        for (idx, part, kp) in targets {
            let Some(node) = build(&mut self.ctx.arena, &kp, part)? else {
                continue;
            };
            if self.ctx.arena.node(node).is_impossible() {
                self.ctx.arena.release(node);
                self.ctx.release_tree(tree);
                return Ok(Some(RangeTree::impossible()));
            }
            tree.set_key(idx, Some(node));
        }
        if tree.keys_map.is_empty() {
            return Ok(None);
        }
        Ok(Some(tree))
    }
}

fn literal_truth(v: &ScalarValue, negated: bool) -> RangeTree {
    let truth = match v {
        // NULL and NOT NULL are both not true.
        ScalarValue::Null => return RangeTree::impossible(),
        ScalarValue::Bool(b) => *b,
        ScalarValue::Int64(n) => *n != 0,
        ScalarValue::Float64(f) => f.0 != 0.0,
        ScalarValue::Utf8(s) => s.parse::<f64>().map(|f| f != 0.0).unwrap_or(false),
        ScalarValue::Date(_) => true,
    };
    if truth != negated {
        RangeTree::always()
    } else {
        RangeTree::impossible()
    }
}

fn compare_holds(op: BinaryOp, ord: Ordering) -> bool {
    match op {
        BinaryOp::Eq | BinaryOp::NullSafeEq => ord == Ordering::Equal,
        BinaryOp::NotEq => ord != Ordering::Equal,
        BinaryOp::Lt => ord == Ordering::Less,
        BinaryOp::LtEq => ord != Ordering::Greater,
        BinaryOp::Gt => ord == Ordering::Greater,
        BinaryOp::GtEq => ord != Ordering::Less,
    }
}

/// A single-interval node, or `None` if the interval restricts nothing.
fn interval_node(
    arena: &mut RangeArena,
    part: u16,
    min: Bound<ScalarValue>,
    max: Bound<ScalarValue>,
) -> OptResult<Option<NodeId>> {
    if matches!((&min, &max), (Bound::Unbounded, Bound::Unbounded)) {
        return Ok(None);
    }
    Ok(Some(arena.leaf(part, min, max)?))
}

/// Bounds of a node holding one interval and no later key part.
fn leaf_bounds(arena: &RangeArena, id: NodeId) -> Option<(Bound<ScalarValue>, Bound<ScalarValue>)> {
    let node = arena.node(id);
    match node.intervals.as_slice() {
        [iv] if node.kind == NodeKind::KeyRange && iv.next_key_part.is_none() => {
            Some((iv.min.clone(), iv.max.clone()))
        }
        _ => None,
    }
}

/// Lowest bound of non-NULL values of a key part.
fn non_null_floor(kp: &KeyPart) -> Bound<ScalarValue> {
    if kp.nullable {
        Bound::Excluded(ScalarValue::Null)
    } else {
        Bound::Unbounded
    }
}

/// Node for `column <op> value` on one key part (`value` is not NULL).
fn comparison_node(
    arena: &mut RangeArena,
    kp: &KeyPart,
    part: u16,
    op: BinaryOp,
    value: &ScalarValue,
) -> OptResult<Option<NodeId>> {
    let op = match op {
        BinaryOp::NotEq => {
            let below = comparison_node(arena, kp, part, BinaryOp::Lt, value)?;
            let above = comparison_node(arena, kp, part, BinaryOp::Gt, value)?;
            return arena.key_or(below, above);
        }
        BinaryOp::NullSafeEq => BinaryOp::Eq,
        other => other,
    };
    let (op, v) = match convert_literal(kp.data_type, value, op) {
        Converted::NotSargable => return Ok(None),
        Converted::Impossible => return Ok(Some(arena.impossible(part)?)),
        Converted::Value(op, v) => (op, v),
    };
    let (min, max) = match op {
        BinaryOp::Eq => (Bound::Included(v.clone()), Bound::Included(v)),
        BinaryOp::Lt => (non_null_floor(kp), Bound::Excluded(v)),
        BinaryOp::LtEq => (non_null_floor(kp), Bound::Included(v)),
        BinaryOp::Gt => (Bound::Excluded(v), Bound::Unbounded),
        BinaryOp::GtEq => (Bound::Included(v), Bound::Unbounded),
        BinaryOp::NotEq | BinaryOp::NullSafeEq => return Ok(None),
    };
    interval_node(arena, part, min, max)
}

/// Converted, sorted and de-duplicated equality values of an IN list.
/// `None` if some value cannot be compared with the column as a key.
fn point_values(kp: &KeyPart, values: &[ScalarValue]) -> Option<Vec<ScalarValue>> {
    let mut points = Vec::with_capacity(values.len());
    for v in values {
        match convert_literal(kp.data_type, v, BinaryOp::Eq) {
            Converted::Value(_, v) => points.push(v),
            Converted::Impossible => {}
            Converted::NotSargable => return None,
        }
    }
    points.sort_by(|a, b| a.key_cmp(b));
    points.dedup_by(|a, b| a.key_cmp(b) == Ordering::Equal);
    Some(points)
}

fn in_node(
    arena: &mut RangeArena,
    kp: &KeyPart,
    part: u16,
    values: &[ScalarValue],
) -> OptResult<Option<NodeId>> {
    let Some(points) = point_values(kp, values) else {
        return Ok(None);
    };
    if points.is_empty() {
        return Ok(Some(arena.impossible(part)?));
    }
    let intervals = points.into_iter().map(Interval::point).collect();
    Ok(Some(arena.alloc(NodeKind::KeyRange, part, intervals)?))
}

fn not_in_node(
    arena: &mut RangeArena,
    kp: &KeyPart,
    part: u16,
    values: &[ScalarValue],
) -> OptResult<Option<NodeId>> {
    let Some(points) = point_values(kp, values) else {
        return Ok(None);
    };
    let mut intervals = Vec::with_capacity(points.len() + 1);
    let mut min = non_null_floor(kp);
    for p in points {
        intervals.push(Interval::new(min, Bound::Excluded(p.clone())));
        min = Bound::Excluded(p);
    }
    intervals.push(Interval::new(min, Bound::Unbounded));
    intervals.retain(|iv| !iv.is_empty());
    if intervals.len() == 1 && intervals[0].is_full() {
        return Ok(None);
    }
    Ok(Some(arena.alloc(NodeKind::KeyRange, part, intervals)?))
}

/// Convert `value` to the storage type of a column, adjusting `op` when the
/// value falls outside the column's domain.
fn convert_literal(data_type: DataType, value: &ScalarValue, op: BinaryOp) -> Converted {
    match data_type {
        DataType::Int { .. } | DataType::Bool => convert_integer(data_type, value, op),
        DataType::Float => {
            let f = match value {
                ScalarValue::Int64(n) => *n as f64,
                ScalarValue::Float64(f) => f.0,
                ScalarValue::Utf8(s) => match s.trim().parse::<f64>() {
                    Ok(f) => f,
                    Err(_) => return Converted::NotSargable,
                },
                _ => return Converted::NotSargable,
            };
            if f.is_nan() {
                return Converted::Impossible;
            }
            Converted::Value(op, ScalarValue::float(f))
        }
        DataType::Varchar(len) => {
            let ScalarValue::Utf8(s) = value else {
                return Converted::NotSargable;
            };
            if s.chars().count() <= len as usize {
                return Converted::Value(op, value.clone());
            }
            let truncated: String = s.chars().take(len as usize).collect();
            match op {
                BinaryOp::Eq => Converted::Impossible,
                BinaryOp::Lt | BinaryOp::LtEq => {
                    Converted::Value(BinaryOp::LtEq, ScalarValue::Utf8(truncated))
                }
                _ => Converted::Value(BinaryOp::Gt, ScalarValue::Utf8(truncated)),
            }
        }
        DataType::Date => match value {
            ScalarValue::Date(_) => Converted::Value(op, value.clone()),
            ScalarValue::Int64(n) => match i32::try_from(*n) {
                Ok(d) => Converted::Value(op, ScalarValue::Date(d)),
                Err(_) => Converted::NotSargable,
            },
            _ => Converted::NotSargable,
        },
    }
}

fn convert_integer(data_type: DataType, value: &ScalarValue, op: BinaryOp) -> Converted {
    let (lo, hi) = data_type.int_domain().unwrap_or((i64::MIN, i64::MAX));
    let float = match value {
        ScalarValue::Int64(n) => Some(Err(*n)),
        ScalarValue::Bool(b) => Some(Err(i64::from(*b))),
        ScalarValue::Float64(f) => Some(Ok(f.0)),
        ScalarValue::Utf8(s) => {
            let s = s.trim();
            match (s.parse::<i64>(), s.parse::<f64>()) {
                (Ok(n), _) => Some(Err(n)),
                (Err(_), Ok(f)) => Some(Ok(f)),
                _ => None,
            }
        }
        ScalarValue::Date(_) | ScalarValue::Null => None,
    };
    // Err(n) carries an exact integer, Ok(f) a float still to be rounded.
    let (mut op, n): (BinaryOp, i128) = match float {
        None => return Converted::NotSargable,
        Some(Err(n)) => (op, n as i128),
        Some(Ok(f)) => {
            if f.is_nan() {
                return Converted::Impossible;
            }
            if f.fract() == 0.0 {
                (op, f as i128)
            } else {
                match op {
                    BinaryOp::Eq => return Converted::Impossible,
                    BinaryOp::Lt | BinaryOp::LtEq => (BinaryOp::LtEq, f.floor() as i128),
                    _ => (BinaryOp::GtEq, f.ceil() as i128),
                }
            }
        }
    };
    let (lo, hi) = (lo as i128, hi as i128);
    let n = if n > hi {
        match op {
            BinaryOp::Lt | BinaryOp::LtEq => {
                op = BinaryOp::LtEq;
                hi
            }
            _ => return Converted::Impossible,
        }
    } else if n < lo {
        match op {
            BinaryOp::Gt | BinaryOp::GtEq => {
                op = BinaryOp::GtEq;
                lo
            }
            _ => return Converted::Impossible,
        }
    } else {
        n
    };
    // Within the domain, so the narrowing is lossless.
    let n = n as i64;
    let v = if data_type == DataType::Bool {
        ScalarValue::Bool(n != 0)
    } else {
        ScalarValue::Int64(n)
    };
    Converted::Value(op, v)
}

/// Literal prefix of a LIKE pattern and whether the pattern has no wildcard.
fn like_prefix(pattern: &str) -> (String, bool) {
    let mut prefix = String::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => prefix.push(chars.next().unwrap_or('\\')),
            '%' | '_' => return (prefix, false),
            other => prefix.push(other),
        }
    }
    (prefix, true)
}

/// Smallest string greater than every string starting with `prefix`.
fn string_successor(prefix: &str) -> Option<String> {
    let mut chars: Vec<char> = prefix.chars().collect();
    while let Some(last) = chars.pop() {
        let next = match last {
            '\u{D7FF}' => Some('\u{E000}'),
            c => char::from_u32(c as u32 + 1),
        };
        if let Some(next) = next {
            chars.push(next);
            return Some(chars.into_iter().collect());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnDef, IndexDef};
    use crate::error::OptError;
    use crate::expr::TableRef;
    use crate::search::SearchConfig;

    fn table() -> TableInfo {
        TableInfo::new(
            TableRef::new("test", "t"),
            vec![
                ColumnDef::new("a", DataType::Int { bits: 8, unsigned: false }, true),
                ColumnDef::new("b", DataType::Int { bits: 32, unsigned: false }, false),
                ColumnDef::new("s", DataType::Varchar(4), true),
                ColumnDef::new("c", DataType::Int { bits: 32, unsigned: false }, true),
            ],
        )
        .with_index(IndexDef::new("ia", &[0]))
        .with_index(IndexDef::new("ib", &[1]))
        .with_index(IndexDef::new("is", &[2]))
    }

    /// Analyze and return the intervals on `index`, or the tree kind.
    fn intervals(pred: Expr, index: usize) -> Result<Vec<Interval>, Option<TreeKind>> {
        intervals_with(pred, index, &SearchConfig::default())
    }

    fn intervals_with(
        pred: Expr,
        index: usize,
        config: &SearchConfig,
    ) -> Result<Vec<Interval>, Option<TreeKind>> {
        let t = table();
        let mut ctx = RangeContext::new(&t, config).unwrap();
        let tree = PredicateAnalyzer::new(&mut ctx, &t).analyze(&pred).unwrap();
        match tree {
            Some(tree) if tree.is_key() => match tree.get(index) {
                Some(node) => Ok(ctx.arena.node(node).intervals.clone()),
                None => Err(Some(tree.kind)),
            },
            Some(tree) => Err(Some(tree.kind)),
            None => Err(None),
        }
    }

    fn int(v: i64) -> ScalarValue {
        ScalarValue::Int64(v)
    }

    #[test]
    fn test_out_of_range_equality_is_impossible() {
        let r = intervals(Expr::col("a").equals(Expr::lit(300)), 0);
        assert_eq!(r, Err(Some(TreeKind::Impossible)));
    }

    #[test]
    fn test_out_of_range_upper_bound_is_clamped() {
        let r = intervals(Expr::col("a").lt(Expr::lit(300)), 0).unwrap();
        assert_eq!(r[0].min, Bound::Excluded(ScalarValue::Null));
        assert_eq!(r[0].max, Bound::Included(int(127)));
    }

    #[test]
    fn test_fractional_literal_on_integer_column() {
        assert_eq!(
            intervals(Expr::col("b").equals(Expr::lit(2.5)), 1),
            Err(Some(TreeKind::Impossible))
        );
        let r = intervals(Expr::col("b").lt(Expr::lit(2.5)), 1).unwrap();
        assert_eq!(r[0].min, Bound::Unbounded);
        assert_eq!(r[0].max, Bound::Included(int(2)));
        let r = intervals(Expr::col("b").gt(Expr::lit(2.5)), 1).unwrap();
        assert_eq!(r[0].min, Bound::Included(int(3)));
    }

    #[test]
    fn test_mirrored_operands() {
        let r = intervals(Expr::lit(5).lt(Expr::col("b")), 1).unwrap();
        assert_eq!(r[0].min, Bound::Excluded(int(5)));
        assert_eq!(r[0].max, Bound::Unbounded);
    }

    #[test]
    fn test_not_equal_splits_in_two() {
        let r = intervals(Expr::col("a").not_equals(Expr::lit(3)), 0).unwrap();
        assert_eq!(r.len(), 2);
        assert_eq!(r[0].max, Bound::Excluded(int(3)));
        assert_eq!(r[1].min, Bound::Excluded(int(3)));
    }

    #[test]
    fn test_not_pushdown_over_or() {
        // NOT (b < 2 OR b > 4)  ==  b >= 2 AND b <= 4
        let pred = Expr::col("b")
            .lt(Expr::lit(2))
            .or(Expr::col("b").gt(Expr::lit(4)))
            .negate();
        let r = intervals(pred, 1).unwrap();
        assert_eq!(r.len(), 1);
        assert_eq!(r[0].min, Bound::Included(int(2)));
        assert_eq!(r[0].max, Bound::Included(int(4)));
    }

    #[test]
    fn test_in_list_sorted_points() {
        let pred = Expr::col("b").in_list(vec![Expr::lit(7), Expr::lit(3), Expr::lit(7)]);
        let r = intervals(pred, 1).unwrap();
        assert_eq!(r.len(), 2);
        assert_eq!(r[0].point_value(), Some(&int(3)));
        assert_eq!(r[1].point_value(), Some(&int(7)));
    }

    #[test]
    fn test_not_in_gaps() {
        let pred = Expr::InList {
            expr: Box::new(Expr::col("b")),
            list: vec![Expr::lit(3), Expr::lit(7)],
            negated: true,
        };
        let r = intervals(pred, 1).unwrap();
        assert_eq!(r.len(), 3);
        assert_eq!(r[1].min, Bound::Excluded(int(3)));
        assert_eq!(r[1].max, Bound::Excluded(int(7)));
    }

    #[test]
    fn test_like_prefix_range() {
        let r = intervals(Expr::col("s").like("ab%"), 2).unwrap();
        assert_eq!(r[0].min, Bound::Included(ScalarValue::Utf8("ab".into())));
        assert_eq!(r[0].max, Bound::Excluded(ScalarValue::Utf8("ac".into())));
        assert_eq!(intervals(Expr::col("s").like("%ab"), 2), Err(None));
        assert_eq!(
            intervals(Expr::col("s").like("abcdef%"), 2),
            Err(Some(TreeKind::Impossible))
        );
    }

    #[test]
    fn test_like_escape() {
        assert_eq!(like_prefix(r"a\%b%"), ("a%b".to_string(), false));
        assert_eq!(like_prefix("abc"), ("abc".to_string(), true));
    }

    #[test]
    fn test_long_string_truncation() {
        let r = intervals(Expr::col("s").gt_eq(Expr::lit("abcdef")), 2).unwrap();
        assert_eq!(r[0].min, Bound::Excluded(ScalarValue::Utf8("abcd".into())));
        assert_eq!(
            intervals(Expr::col("s").equals(Expr::lit("abcdef")), 2),
            Err(Some(TreeKind::Impossible))
        );
    }

    #[test]
    fn test_null_handling() {
        assert_eq!(
            intervals(Expr::col("b").is_null(), 1),
            Err(Some(TreeKind::Impossible))
        );
        assert_eq!(
            intervals(Expr::col("b").is_not_null(), 1),
            Err(Some(TreeKind::Always))
        );
        let r = intervals(Expr::col("a").is_null(), 0).unwrap();
        assert!(r[0].is_singlepoint());
        assert_eq!(
            intervals(Expr::col("a").equals(Expr::null()), 0),
            Err(Some(TreeKind::Impossible))
        );
    }

    #[test]
    fn test_between_reversed_bounds_impossible() {
        let pred = Expr::col("b").between(Expr::lit(10), Expr::lit(5));
        assert_eq!(intervals(pred, 1), Err(Some(TreeKind::Impossible)));
    }

    #[test]
    fn test_empty_between_survives_exhausted_budget() {
        let config = SearchConfig {
            max_sel_args: 3,
            ..SearchConfig::default()
        };
        let pred = Expr::col("b").between(Expr::lit(10), Expr::lit(1));
        assert_eq!(intervals_with(pred, 1, &config), Err(Some(TreeKind::Impossible)));

        // The IN list uses up the budget before the BETWEEN is combined.
        let pred = Expr::col("b")
            .in_list(vec![Expr::lit(1), Expr::lit(2), Expr::lit(3), Expr::lit(4)])
            .and(Expr::col("b").between(Expr::lit(10), Expr::lit(1)));
        assert_eq!(intervals_with(pred, 1, &config), Err(Some(TreeKind::Impossible)));
    }

    #[test]
    fn test_between_single_leaf() {
        let pred = Expr::col("b").between(Expr::lit(3), Expr::lit(7));
        let ivs = intervals(pred, 1).unwrap();
        assert_eq!(ivs.len(), 1);
        assert_eq!(ivs[0].min, Bound::Included(int(3)));
        assert_eq!(ivs[0].max, Bound::Included(int(7)));
    }

    #[test]
    fn test_parameter_makes_maybe_key() {
        let t = table();
        let mut ctx = RangeContext::new(&t, &SearchConfig::default()).unwrap();
        let pred = Expr::col("b").equals(Expr::param("p1"));
        let tree = PredicateAnalyzer::new(&mut ctx, &t)
            .analyze(&pred)
            .unwrap()
            .unwrap();
        let node = tree.get(1).unwrap();
        assert!(ctx.arena.node(node).is_maybe());
    }

    #[test]
    fn test_unindexed_or_unsargable() {
        assert_eq!(intervals(Expr::col("c").equals(Expr::lit(1)), 0), Err(None));
        let pred = Expr::col("a").equals(Expr::col("b"));
        assert_eq!(intervals(pred, 0), Err(None));
    }

    #[test]
    fn test_unknown_column_is_an_error() {
        let t = table();
        let mut ctx = RangeContext::new(&t, &SearchConfig::default()).unwrap();
        let err = PredicateAnalyzer::new(&mut ctx, &t)
            .analyze(&Expr::col("nope").equals(Expr::lit(1)))
            .unwrap_err();
        assert!(matches!(err, OptError::UnknownColumn { .. }));
    }

    #[test]
    fn test_constant_folding() {
        assert_eq!(
            intervals(Expr::lit(1).equals(Expr::lit(2)), 0),
            Err(Some(TreeKind::Impossible))
        );
        assert_eq!(
            intervals(Expr::lit(1).lt(Expr::lit(2)), 0),
            Err(Some(TreeKind::Always))
        );
    }

    #[test]
    fn test_string_successor() {
        assert_eq!(string_successor("ab"), Some("ac".to_string()));
        assert_eq!(string_successor(""), None);
    }
}
