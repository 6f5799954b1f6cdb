//! # Interval Algebra over Index Key Parts
//!
//! The range machinery turns a predicate into, per index, a graph of
//! intervals over the index's key parts, and combines such graphs under AND
//! and OR. Graphs never describe *fewer* keys than the predicate admits: every
//! simplification (weight pruning, budget exhaustion, unsupported shapes)
//! widens the ranges, it never narrows them.
//!
//! ## Layout
//!
//! - [`node`]: intervals, interval lists and endpoint comparison.
//! - [`arena`]: the node arena with reference counting and copy-on-write.
//! - `and` / `or`: `key_and` and `key_or` on graphs of one index.
//! - `weight`: weight control applied after every combination.
//! - [`seq`]: flattening a graph into [`KeyRange`]s for cost estimation and execution.

pub mod arena;
pub mod node;
pub mod seq;

mod and;
mod or;
mod weight;

use crate::catalog::DataType;
use serde::{Deserialize, Serialize};

pub use arena::{RangeArena, RangeCounters};
pub use node::{Interval, NodeId, NodeKind, RangeNode};
pub use seq::{KeyRange, RangeFlags};

/// Deepest key part an index may have.
pub const MAX_KEY_PARTS: usize = 32;

/// One key part of an index, resolved against the table's columns.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KeyPart {
    /// Column ordinal in the table.
    pub column: usize,
    pub data_type: DataType,
    pub nullable: bool,
    pub descending: bool,
}
