//! # Access Strategy Rules
//!
//! Each plan strategy (range scan, ROR intersection, index merge, loose index
//! scan, ...) is an [`AccessRule`]. The search runs every active rule against
//! the same [`PlanContext`] and keeps the cheapest plan.
//!
//! ## Rule Contract
//!
//! - A rule returns `Ok(None)` when it does not apply or cannot beat
//!   `ctx.best_cost`; returning a more expensive plan is allowed but wasted.
//! - Rules record their reasoning as children of `ctx.trace`.
//! - `Err` is reserved for conditions that abort the whole table
//!   (allocation failure, kill flag). Everything else degrades to `Ok(None)`.
//!
//! ## Rule Registry
//!
//! The `RuleRegistry` holds the rules in evaluation order. Rules can be
//! disabled by name through [`SearchConfig::disabled_rules`] and by the
//! strategy switches of the configuration.

use crate::catalog::TableInfo;
use crate::context::RangeContext;
use crate::cost::{Cost, CostOracle};
use crate::error::OptResult;
use crate::expr::Expr;
use crate::plan::{CandidatePlan, QueryShape};
use crate::scan::ScanCandidate;
use crate::search::SearchConfig;
use crate::trace::TraceRecord;
use crate::tree::RangeTree;

/// Everything a rule may look at while planning one table.
pub struct PlanContext<'a> {
    pub range: &'a mut RangeContext,
    pub table: &'a TableInfo,
    pub oracle: &'a dyn CostOracle,
    pub query: &'a QueryShape,
    pub predicate: Option<&'a Expr>,
    /// Range tree of the predicate, when it restricts any index.
    pub tree: Option<&'a RangeTree>,
    /// Range scan candidates of `tree`, cheapest first.
    pub scans: &'a [ScanCandidate],
    /// Cost of the best plan found so far (initially the full table scan).
    pub best_cost: Cost,
    pub config: &'a SearchConfig,
    /// Diagnostics of the running rule.
    pub trace: &'a mut TraceRecord,
}

pub trait AccessRule: Send + Sync {
    /// Unique name of this rule.
    fn name(&self) -> &str;

    /// Whether the rule needs a range tree to do anything.
    fn requires_tree(&self) -> bool {
        true
    }

    /// Whether the configuration's strategy switches allow this rule.
    fn enabled(&self, _config: &SearchConfig) -> bool {
        true
    }

    fn apply(&self, ctx: &mut PlanContext<'_>) -> OptResult<Option<CandidatePlan>>;
}

/// Registry of access strategies, in evaluation order.
pub struct RuleRegistry {
    pub rules: Vec<Box<dyn AccessRule>>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn add_rule(&mut self, rule: Box<dyn AccessRule>) {
        self.rules.push(rule);
    }

    /// Rules allowed by `config`.
    pub fn active_rules<'a>(&'a self, config: &SearchConfig) -> Vec<&'a dyn AccessRule> {
        self.rules
            .iter()
            .map(|r| r.as_ref())
            .filter(|r| !config.disabled_rules.contains(r.name()) && r.enabled(config))
            .collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name()).collect()
    }
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}
