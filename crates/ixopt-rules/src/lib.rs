//! # Built-in Access Strategies
//!
//! This crate provides the default set of access strategies for the access
//! path search. Each strategy is an [`AccessRule`](ixopt_core::rule::AccessRule)
//! that turns the analyzed range tree into at most one costed plan:
//!
//! - **`RangeScanRule`**: the cheapest single-index range scan.
//! - **`GroupMinMaxRule`**: loose index scan for GROUP BY, DISTINCT and
//!   MIN/MAX queries, reading one or two index entries per group.
//! - **`RorIntersectRule`**: intersection of rowid-ordered scans, merged on
//!   row identity without sorting. Also tries a covering variant that never
//!   reads full rows.
//! - **`IndexIntersectRule`**: intersection of arbitrary scans through the
//!   row id de-duplication structure.
//! - **`IndexMergeRule`**: union of the best scan of every disjunct of an OR,
//!   either sorted and de-duplicated or, when all scans are rowid-ordered,
//!   merged directly (ROR union).

pub mod group_min_max;
pub mod index_intersect;
pub mod index_merge;
pub mod range_scan;
pub mod ror_intersect;

use ixopt_core::rule::RuleRegistry;

/// Create a rule registry with all built-in strategies.
pub fn default_rule_registry() -> RuleRegistry {
    let mut registry = RuleRegistry::new();

    // Single index strategies.
    registry.add_rule(Box::new(range_scan::RangeScanRule));
    registry.add_rule(Box::new(group_min_max::GroupMinMaxRule));

    // Multi-index strategies.
    registry.add_rule(Box::new(ror_intersect::RorIntersectRule));
    registry.add_rule(Box::new(index_intersect::IndexIntersectRule));
    registry.add_rule(Box::new(index_merge::IndexMergeRule));

    registry
}
