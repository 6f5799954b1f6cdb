//! # ixopt-core: Range and Index-Merge Access Path Optimizer
//!
//! This crate decides how rows of a single table should be read given a
//! predicate: through key ranges on one index, by combining several indexes,
//! with a loose index scan, or by reading the whole table.
//!
//! ## Module Overview
//!
//! - **`expr`**: Predicate expressions, scalar values and their key ordering.
//! - **`catalog`**: Table, column and index metadata.
//! - **`stats`**: Table, column and index statistics used by the cost oracle.
//! - **`range`**: The interval graph algebra (AND, OR, weight limits, key
//!   range sequencing) over an arena of shared nodes.
//! - **`tree`**: Range trees (one graph per index plus index-merge sets).
//! - **`analyzer`**: Translation of predicates into range trees.
//! - **`context`**: Per-table state shared by analysis and planning.
//! - **`cost`**: The cost oracle trait and the statistics-driven default.
//! - **`scan`**: Priced range scan candidates.
//! - **`plan`**: The closed set of candidate plans and the access decision.
//! - **`rule`**: The AccessRule trait and RuleRegistry.
//! - **`search`**: The access path search driver and its configuration.
//! - **`quick`**: Executor descriptions of plans and their row retrieval.
//! - **`trace`**: Structured optimizer diagnostics.

pub mod analyzer;
pub mod catalog;
pub mod context;
pub mod cost;
pub mod error;
pub mod expr;
pub mod keymap;
pub mod plan;
pub mod quick;
pub mod range;
pub mod rule;
pub mod scan;
pub mod search;
pub mod stats;
pub mod trace;
pub mod tree;
