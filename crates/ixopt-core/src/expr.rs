//! # Predicate Expressions and Scalar Values
//!
//! This module defines the input language of the access-path optimizer: the
//! single-table predicate (a WHERE clause already scoped to one table) and the
//! constants that appear in it.
//!
//! ## Scalar Values (`ScalarValue`)
//! Constants compared against indexed columns. Besides structural equality
//! (used for hashing and deduplication) values carry a *key order* through
//! [`ScalarValue::key_cmp`]: NULL sorts before every non-NULL value and numeric
//! variants compare by magnitude, matching how a B-tree index orders its keys.
//!
//! ## Predicates (`Expr`)
//! A recursive boolean tree. Only a subset of shapes is *sargable* (can be
//! turned into key ranges); everything else is still accepted and simply does
//! not restrict any index. Values that are unknown while optimizing (unbound
//! parameters, columns of other tables) are represented explicitly so that the
//! analyzer can mark the affected key parts as "maybe".
//!
//! ## Aggregates (`AggExpr`)
//! Aggregate calls from the query's select list, consulted by the loose index
//! scan strategy.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Reference to a table in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    pub schema: String,
    pub name: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Reference to a column.
///
/// `table` is `None` for columns of the table being optimized. A column
/// qualified with a *different* table name is an outer reference whose value is
/// only known at execution time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnRef {
    #[serde(default)]
    pub table: Option<String>,
    pub name: String,
}

impl ColumnRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            table: None,
            name: name.into(),
        }
    }

    pub fn qualified(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            table: Some(table.into()),
            name: name.into(),
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref t) = self.table {
            write!(f, "{}.{}", t, self.name)
        } else {
            write!(f, "{}", self.name)
        }
    }
}

/// Scalar value for expressions.
///
/// Uses `OrderedFloat` for `f64` so that floating-point values can take part in
/// `Eq`/`Hash` as well as in the total key order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScalarValue {
    /// SQL NULL value.
    Null,
    /// Boolean true/false.
    Bool(bool),
    /// 64-bit signed integer.
    Int64(i64),
    /// 64-bit floating point, wrapped in OrderedFloat for Eq/Hash support.
    Float64(OrderedFloat<f64>),
    /// UTF-8 string.
    Utf8(String),
    /// Date as days since Unix epoch (1970-01-01).
    Date(i32),
}

impl ScalarValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ScalarValue::Null)
    }

    pub fn float(v: f64) -> Self {
        ScalarValue::Float64(OrderedFloat(v))
    }

    /// Numeric view of the value, used for interpolation against column
    /// min/max statistics.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ScalarValue::Int64(v) => Some(*v as f64),
            ScalarValue::Float64(v) => Some(v.0),
            ScalarValue::Date(v) => Some(*v as f64),
            ScalarValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            ScalarValue::Null | ScalarValue::Utf8(_) => None,
        }
    }

    /// Rank used to order values of unrelated types against each other.
    fn type_rank(&self) -> u8 {
        match self {
            ScalarValue::Null => 0,
            ScalarValue::Bool(_) => 1,
            ScalarValue::Int64(_) | ScalarValue::Float64(_) => 2,
            ScalarValue::Date(_) => 3,
            ScalarValue::Utf8(_) => 4,
        }
    }

    /// Total order of values as an index stores them.
    ///
    /// NULL is the smallest value; `Int64` and `Float64` compare numerically so
    /// a literal `3.0` and a stored `3` are the same key.
    pub fn key_cmp(&self, other: &Self) -> Ordering {
        use ScalarValue::*;
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Null, _) => Ordering::Less,
            (_, Null) => Ordering::Greater,
            (Bool(a), Bool(b)) => a.cmp(b),
            (Int64(a), Int64(b)) => a.cmp(b),
            (Float64(a), Float64(b)) => a.cmp(b),
            (Int64(a), Float64(b)) => cmp_int_float(*a, b.0),
            (Float64(a), Int64(b)) => cmp_int_float(*b, a.0).reverse(),
            (Utf8(a), Utf8(b)) => a.cmp(b),
            (Date(a), Date(b)) => a.cmp(b),
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }
}

/// Exact comparison of an integer with a float. NaN sorts above every
/// integer, matching `OrderedFloat`.
fn cmp_int_float(i: i64, f: f64) -> Ordering {
    // 2^63: the first float above i64::MAX.
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if f.is_nan() || f >= LIMIT {
        return Ordering::Less;
    }
    if f < -LIMIT {
        return Ordering::Greater;
    }
    let whole = f.trunc();
    // In range and integral, so the cast is exact.
    match i.cmp(&(whole as i64)) {
        Ordering::Equal => whole.partial_cmp(&f).unwrap_or(Ordering::Equal),
        other => other,
    }
}

impl PartialEq for ScalarValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int64(a), Self::Int64(b)) => a == b,
            (Self::Float64(a), Self::Float64(b)) => a == b,
            (Self::Utf8(a), Self::Utf8(b)) => a == b,
            (Self::Date(a), Self::Date(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ScalarValue {}

impl Hash for ScalarValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Null => {}
            Self::Bool(v) => v.hash(state),
            Self::Int64(v) => v.hash(state),
            Self::Float64(v) => v.hash(state),
            Self::Utf8(v) => v.hash(state),
            Self::Date(v) => v.hash(state),
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Null => write!(f, "NULL"),
            ScalarValue::Bool(b) => write!(f, "{b}"),
            ScalarValue::Int64(v) => write!(f, "{v}"),
            ScalarValue::Float64(v) => write!(f, "{}", v.0),
            ScalarValue::Utf8(s) => write!(f, "'{s}'"),
            ScalarValue::Date(d) => write!(f, "DATE({d})"),
        }
    }
}

impl From<i64> for ScalarValue {
    fn from(v: i64) -> Self {
        ScalarValue::Int64(v)
    }
}

impl From<i32> for ScalarValue {
    fn from(v: i32) -> Self {
        ScalarValue::Int64(v as i64)
    }
}

impl From<f64> for ScalarValue {
    fn from(v: f64) -> Self {
        ScalarValue::Float64(OrderedFloat(v))
    }
}

impl From<&str> for ScalarValue {
    fn from(v: &str) -> Self {
        ScalarValue::Utf8(v.to_string())
    }
}

impl From<bool> for ScalarValue {
    fn from(v: bool) -> Self {
        ScalarValue::Bool(v)
    }
}

/// Single-table predicate tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Expr {
    /// Reference to a column by name.
    Column(ColumnRef),
    /// Constant literal value.
    Literal(ScalarValue),
    /// Named parameter whose value is bound only at execution time.
    Param(String),
    /// Comparison (`a = 1`, `5 < b`, `a <=> NULL`).
    BinaryOp {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Unary operation (`NOT p`, `a IS NULL`).
    UnaryOp {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    /// `expr [NOT] BETWEEN low AND high`.
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        #[serde(default)]
        negated: bool,
    },
    /// `expr [NOT] IN (list)`.
    InList {
        expr: Box<Expr>,
        list: Vec<Expr>,
        #[serde(default)]
        negated: bool,
    },
    /// `expr [NOT] LIKE 'pattern'` with `\` as the escape character.
    Like {
        expr: Box<Expr>,
        pattern: String,
        #[serde(default)]
        negated: bool,
    },
    /// Named function call. Never sargable.
    Function { name: String, args: Vec<Expr> },
    /// Conjunction (AND) of multiple predicates. Stored as a flat list to simplify
    /// predicate decomposition.
    And(Vec<Expr>),
    /// Disjunction (OR) of multiple predicates.
    Or(Vec<Expr>),
}

impl Expr {
    /// Return all column references in this expression.
    pub fn columns(&self) -> Vec<&ColumnRef> {
        let mut cols = Vec::new();
        self.collect_columns(&mut cols);
        cols
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a ColumnRef>) {
        match self {
            Expr::Column(c) => out.push(c),
            Expr::Literal(_) | Expr::Param(_) => {}
            Expr::BinaryOp { left, right, .. } => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
            Expr::UnaryOp { operand, .. } => operand.collect_columns(out),
            Expr::Between {
                expr, low, high, ..
            } => {
                expr.collect_columns(out);
                low.collect_columns(out);
                high.collect_columns(out);
            }
            Expr::InList { expr, list, .. } => {
                expr.collect_columns(out);
                for e in list {
                    e.collect_columns(out);
                }
            }
            Expr::Like { expr, .. } => expr.collect_columns(out),
            Expr::Function { args, .. } => {
                for a in args {
                    a.collect_columns(out);
                }
            }
            Expr::And(exprs) | Expr::Or(exprs) => {
                for e in exprs {
                    e.collect_columns(out);
                }
            }
        }
    }

    /// Flatten AND-chains: (A AND (B AND C)) → [A, B, C].
    pub fn conjuncts(&self) -> Vec<&Expr> {
        match self {
            Expr::And(exprs) => exprs.iter().flat_map(|e| e.conjuncts()).collect(),
            other => vec![other],
        }
    }

    // Builders, mostly for tests and hand-written request bodies.

    pub fn col(name: &str) -> Expr {
        Expr::Column(ColumnRef::new(name))
    }

    pub fn lit(value: impl Into<ScalarValue>) -> Expr {
        Expr::Literal(value.into())
    }

    pub fn param(name: &str) -> Expr {
        Expr::Param(name.to_string())
    }

    pub fn null() -> Expr {
        Expr::Literal(ScalarValue::Null)
    }

    pub fn binary(self, op: BinaryOp, right: Expr) -> Expr {
        Expr::BinaryOp {
            op,
            left: Box::new(self),
            right: Box::new(right),
        }
    }

    pub fn equals(self, right: Expr) -> Expr {
        self.binary(BinaryOp::Eq, right)
    }

    pub fn not_equals(self, right: Expr) -> Expr {
        self.binary(BinaryOp::NotEq, right)
    }

    pub fn lt(self, right: Expr) -> Expr {
        self.binary(BinaryOp::Lt, right)
    }

    pub fn lt_eq(self, right: Expr) -> Expr {
        self.binary(BinaryOp::LtEq, right)
    }

    pub fn gt(self, right: Expr) -> Expr {
        self.binary(BinaryOp::Gt, right)
    }

    pub fn gt_eq(self, right: Expr) -> Expr {
        self.binary(BinaryOp::GtEq, right)
    }

    pub fn between(self, low: Expr, high: Expr) -> Expr {
        Expr::Between {
            expr: Box::new(self),
            low: Box::new(low),
            high: Box::new(high),
            negated: false,
        }
    }

    pub fn in_list(self, list: Vec<Expr>) -> Expr {
        Expr::InList {
            expr: Box::new(self),
            list,
            negated: false,
        }
    }

    pub fn like(self, pattern: &str) -> Expr {
        Expr::Like {
            expr: Box::new(self),
            pattern: pattern.to_string(),
            negated: false,
        }
    }

    pub fn is_null(self) -> Expr {
        Expr::UnaryOp {
            op: UnaryOp::IsNull,
            operand: Box::new(self),
        }
    }

    pub fn is_not_null(self) -> Expr {
        Expr::UnaryOp {
            op: UnaryOp::IsNotNull,
            operand: Box::new(self),
        }
    }

    pub fn negate(self) -> Expr {
        Expr::UnaryOp {
            op: UnaryOp::Not,
            operand: Box::new(self),
        }
    }

    pub fn and(self, other: Expr) -> Expr {
        match self {
            Expr::And(mut items) => {
                items.push(other);
                Expr::And(items)
            }
            first => Expr::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Expr) -> Expr {
        match self {
            Expr::Or(mut items) => {
                items.push(other);
                Expr::Or(items)
            }
            first => Expr::Or(vec![first, other]),
        }
    }
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    /// Equality comparison (`=`).
    Eq,
    /// Null-safe equality (`<=>`): `NULL <=> NULL` is true.
    NullSafeEq,
    /// Inequality comparison (`<>` or `!=`).
    NotEq,
    /// Less than (`<`).
    Lt,
    /// Less than or equal (`<=`).
    LtEq,
    /// Greater than (`>`).
    Gt,
    /// Greater than or equal (`>=`).
    GtEq,
}

impl BinaryOp {
    /// The operator that yields the same result with operands swapped
    /// (`5 < a` is `a > 5`).
    pub fn mirror(self) -> BinaryOp {
        match self {
            BinaryOp::Lt => BinaryOp::Gt,
            BinaryOp::LtEq => BinaryOp::GtEq,
            BinaryOp::Gt => BinaryOp::Lt,
            BinaryOp::GtEq => BinaryOp::LtEq,
            other => other,
        }
    }

    /// Logical complement under two-valued logic, used when pushing NOT down.
    /// `<=>` has no complement expressible as a single comparison.
    pub fn negate(self) -> Option<BinaryOp> {
        match self {
            BinaryOp::Eq => Some(BinaryOp::NotEq),
            BinaryOp::NotEq => Some(BinaryOp::Eq),
            BinaryOp::Lt => Some(BinaryOp::GtEq),
            BinaryOp::LtEq => Some(BinaryOp::Gt),
            BinaryOp::Gt => Some(BinaryOp::LtEq),
            BinaryOp::GtEq => Some(BinaryOp::Lt),
            BinaryOp::NullSafeEq => None,
        }
    }
}

/// Unary operators for boolean logic and null checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    /// Boolean negation (`NOT`).
    Not,
    /// Null check (`IS NULL`).
    IsNull,
    /// Non-null check (`IS NOT NULL`).
    IsNotNull,
}

/// Aggregate expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggExpr {
    pub func: AggFunc,
    pub arg: Expr,
    #[serde(default)]
    pub distinct: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_sorts_first() {
        assert_eq!(
            ScalarValue::Null.key_cmp(&ScalarValue::Int64(i64::MIN)),
            Ordering::Less
        );
        assert_eq!(
            ScalarValue::Utf8("a".into()).key_cmp(&ScalarValue::Null),
            Ordering::Greater
        );
    }

    #[test]
    fn test_mixed_numeric_key_order() {
        assert_eq!(
            ScalarValue::Int64(3).key_cmp(&ScalarValue::float(3.0)),
            Ordering::Equal
        );
        assert_eq!(
            ScalarValue::float(2.5).key_cmp(&ScalarValue::Int64(3)),
            Ordering::Less
        );
        // Structural equality still distinguishes the variants.
        assert_ne!(ScalarValue::Int64(3), ScalarValue::float(3.0));
    }

    #[test]
    fn test_mixed_numeric_order_is_exact_past_float_precision() {
        // 2^53 + 1 has no f64 of its own; `as f64` would round it onto 2^53.
        let big = 9_007_199_254_740_993_i64;
        assert_eq!(
            ScalarValue::Int64(big).key_cmp(&ScalarValue::float(9_007_199_254_740_992.0)),
            Ordering::Greater
        );
        assert_eq!(
            ScalarValue::float(9_007_199_254_740_992.0).key_cmp(&ScalarValue::Int64(big)),
            Ordering::Less
        );
        assert_eq!(
            ScalarValue::Int64(i64::MAX).key_cmp(&ScalarValue::float(9_223_372_036_854_775_808.0)),
            Ordering::Less
        );
        assert_eq!(
            ScalarValue::Int64(i64::MIN).key_cmp(&ScalarValue::float(-9_223_372_036_854_775_808.0)),
            Ordering::Equal
        );
    }

    #[test]
    fn test_mixed_numeric_order_with_fractions() {
        assert_eq!(ScalarValue::Int64(-2).key_cmp(&ScalarValue::float(-2.5)), Ordering::Greater);
        assert_eq!(ScalarValue::Int64(-3).key_cmp(&ScalarValue::float(-2.5)), Ordering::Less);
        assert_eq!(ScalarValue::Int64(2).key_cmp(&ScalarValue::float(2.5)), Ordering::Less);
        assert_eq!(ScalarValue::Int64(0).key_cmp(&ScalarValue::float(-0.0)), Ordering::Equal);
        assert_eq!(ScalarValue::Int64(i64::MAX).key_cmp(&ScalarValue::float(f64::NAN)), Ordering::Less);
        assert_eq!(ScalarValue::float(f64::NEG_INFINITY).key_cmp(&ScalarValue::Int64(i64::MIN)), Ordering::Less);
    }

    #[test]
    fn test_conjuncts_flatten_nested_and() {
        let e = Expr::And(vec![
            Expr::col("a").equals(Expr::lit(1)),
            Expr::And(vec![
                Expr::col("b").gt(Expr::lit(2)),
                Expr::col("c").is_null(),
            ]),
        ]);
        assert_eq!(e.conjuncts().len(), 3);
        assert_eq!(e.columns().len(), 3);
    }

    #[test]
    fn test_mirror_and_negate() {
        assert_eq!(BinaryOp::Lt.mirror(), BinaryOp::Gt);
        assert_eq!(BinaryOp::Eq.mirror(), BinaryOp::Eq);
        assert_eq!(BinaryOp::LtEq.negate(), Some(BinaryOp::Gt));
        assert_eq!(BinaryOp::NullSafeEq.negate(), None);
    }

    #[test]
    fn test_expr_serde_shape() {
        let e = Expr::col("a").between(Expr::lit(1), Expr::lit(5));
        let json = serde_json::to_string(&e).unwrap();
        let back: Expr = serde_json::from_str(&json).unwrap();
        assert_eq!(e, back);
    }
}
