//! # Access Path Search
//!
//! Drives the optimization of one table from predicate to access decision.
//!
//! ## Phases
//!
//! 1. **Analysis**: the predicate is translated into a [`RangeTree`] by the
//!    [`PredicateAnalyzer`]. An IMPOSSIBLE tree ends the search: no row can
//!    match, and that is a plan, not an error.
//! 2. **Range scans**: every index with an interval graph gets a priced
//!    [`RangeScan`](crate::scan::RangeScan) candidate. The cheapest one feeds
//!    the condition selectivity estimate.
//! 3. **Strategies**: every active [`AccessRule`](crate::rule::AccessRule) is
//!    given the tree, the scans and the cost to beat. The cheapest plan wins.
//! 4. **Fallback**: if nothing beats the full table scan, the decision is a
//!    full scan.
//!
//! ## Failure Model
//!
//! [`AccessPathSearch::optimize`] never fails. Allocation failure or a kill
//! request during [`AccessPathSearch::try_optimize`] is reported as a full
//! scan carrying the reason. The kill flag is checked between phases and
//! between rules.

use crate::analyzer::PredicateAnalyzer;
use crate::catalog::TableInfo;
use crate::context::RangeContext;
use crate::cost::{Cost, CostConstants, CostOracle};
use crate::error::OptResult;
use crate::expr::Expr;
use crate::plan::{AccessDecision, QueryShape};
use crate::range::RangeCounters;
use crate::rule::{PlanContext, RuleRegistry};
use crate::scan::{estimate_range_scans, maybe_keys};
use crate::trace::{emit, TraceRecord, TraceSink};
use crate::tree::TreeKind;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Configuration knobs of the range analysis and plan search.
///
/// The caps bound memory and CPU for pathological predicates; hitting any of
/// them makes the ranges wider (or drops a candidate) but never fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Weight cap enforced after every AND/OR of interval graphs. `0`
    /// disables the cap.
    pub max_sel_arg_weight: u32,
    /// Cap on intervals allocated per optimization.
    pub max_sel_args: usize,
    /// Cap on disjuncts held by one merge set.
    pub max_merge_disjuncts: usize,
    /// `NOT IN` lists longer than this are not analyzed.
    pub max_not_in_list: usize,
    /// Master switch for every index merge strategy.
    pub index_merge: bool,
    /// ROR union.
    pub index_merge_union: bool,
    /// Sort-based union (index merge).
    pub index_merge_sort_union: bool,
    /// ROR intersection.
    pub index_merge_intersection: bool,
    /// Sort-based intersection.
    pub index_merge_sort_intersection: bool,
    /// Loose index scan for GROUP BY / DISTINCT.
    pub group_min_max: bool,
    /// Memory budget of the row id de-duplication structure, in bytes.
    pub sort_buffer_size: usize,
    /// Scans considered by the sort-based intersection search.
    pub index_intersect_cutoff: usize,
    /// Unit costs used by the default oracle.
    pub cost: CostConstants,
    /// Rules switched off by name.
    pub disabled_rules: BTreeSet<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_sel_arg_weight: 32_000,
            max_sel_args: 16_000,
            max_merge_disjuncts: 64,
            max_not_in_list: 256,
            index_merge: true,
            index_merge_union: true,
            index_merge_sort_union: true,
            index_merge_intersection: true,
            index_merge_sort_intersection: true,
            group_min_max: true,
            sort_buffer_size: 256 * 1024,
            index_intersect_cutoff: 16,
            cost: CostConstants::default(),
            disabled_rules: BTreeSet::new(),
        }
    }
}

/// Result of optimizing one table.
#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub decision: AccessDecision,
    /// Smallest row estimate of any range scan.
    pub quick_condition_rows: Option<f64>,
    /// `quick_condition_rows / table rows`.
    pub selectivity: Option<f64>,
    /// Row estimate per index with a usable range scan.
    pub quick_rows: BTreeMap<String, f64>,
    /// Indexes whose ranges are only known at execution time.
    pub maybe_keys: Vec<String>,
    pub table_rows: f64,
    pub table_scan_cost: Cost,
    pub counters: RangeCounters,
    pub trace: TraceRecord,
}

/// The access path search engine.
pub struct AccessPathSearch {
    /// Registry of access strategies to try.
    pub rule_registry: Arc<RuleRegistry>,
    pub config: SearchConfig,
    /// Cancellation flag of the running statement.
    kill: Option<Arc<AtomicBool>>,
}

impl AccessPathSearch {
    pub fn new(rule_registry: Arc<RuleRegistry>, config: SearchConfig) -> Self {
        Self {
            rule_registry,
            config,
            kill: None,
        }
    }

    pub fn with_kill_flag(mut self, kill: Arc<AtomicBool>) -> Self {
        self.kill = Some(kill);
        self
    }

    /// Choose the access path for `table`. Always returns a decision; errors
    /// degrade to a full table scan.
    pub fn optimize(
        &self,
        table: &TableInfo,
        oracle: &dyn CostOracle,
        predicate: Option<&Expr>,
        query: &QueryShape,
        sink: &mut dyn TraceSink,
    ) -> SearchOutcome {
        match self.try_optimize(table, oracle, predicate, query, sink) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(table = %table.table, error = %err, "range optimization aborted, using full scan");
                let cost = oracle.table_scan_cost();
                let trace = TraceRecord::new("range_analysis")
                    .with("table", table.table.to_string())
                    .with("aborted", err.to_string());
                emit(sink, &trace);
                SearchOutcome {
                    decision: AccessDecision::FullScan {
                        rows: oracle.table_rows(),
                        cost,
                        reason: err.to_string(),
                    },
                    quick_condition_rows: None,
                    selectivity: None,
                    quick_rows: BTreeMap::new(),
                    maybe_keys: Vec::new(),
                    table_rows: oracle.table_rows(),
                    table_scan_cost: cost,
                    counters: RangeCounters::default(),
                    trace,
                }
            }
        }
    }

    pub fn try_optimize(
        &self,
        table: &TableInfo,
        oracle: &dyn CostOracle,
        predicate: Option<&Expr>,
        query: &QueryShape,
        sink: &mut dyn TraceSink,
    ) -> OptResult<SearchOutcome> {
        let mut ctx = RangeContext::new(table, &self.config)?.with_kill_flag(self.kill.clone());
        let table_rows = oracle.table_rows();
        let table_scan_cost = oracle.table_scan_cost();
        debug!(
            table = %table.table,
            rows = table_rows,
            scan_cost = table_scan_cost.total,
            "starting range optimization"
        );
        let mut root = TraceRecord::new("range_analysis")
            .with("table", table.table.to_string())
            .with("table_rows", table_rows)
            .with("table_scan_cost", table_scan_cost.total);

        let mut tree = match predicate {
            Some(p) => PredicateAnalyzer::new(&mut ctx, table).analyze(p)?,
            None => None,
        };
        ctx.check_killed()?;
        root.set("tree", tree.as_ref().map(|t| t.kind));

        let mut outcome = SearchOutcome {
            decision: AccessDecision::FullScan {
                rows: table_rows,
                cost: table_scan_cost,
                reason: "no cheaper access path".to_string(),
            },
            quick_condition_rows: None,
            selectivity: None,
            quick_rows: BTreeMap::new(),
            maybe_keys: Vec::new(),
            table_rows,
            table_scan_cost,
            counters: RangeCounters::default(),
            trace: TraceRecord::default(),
        };

        if tree.as_ref().is_some_and(|t| t.kind == TreeKind::Impossible) {
            debug!(table = %table.table, "predicate is impossible");
            root.set("impossible_range", true);
            outcome.decision = AccessDecision::Impossible;
            return Ok(self.finish(outcome, &ctx, root, sink));
        }
        // Only key trees restrict indexes.
        if let Some(t) = tree.take() {
            if t.is_key() {
                tree = Some(t);
            } else {
                ctx.release_tree(t);
            }
        }
        if let Some(t) = tree.as_mut() {
            ctx.remove_nonrange_trees(t);
        }

        let mut scans_trace = TraceRecord::new("range_scan_alternatives");
        let scans = match &tree {
            Some(t) => {
                outcome.maybe_keys = maybe_keys(&ctx, t)
                    .into_iter()
                    .map(|i| table.indexes[i].name.clone())
                    .collect();
                estimate_range_scans(&ctx, table, oracle, query, t, &mut scans_trace)
            }
            None => Vec::new(),
        };
        root.push(scans_trace);
        for c in &scans {
            outcome.quick_rows.insert(c.scan.index_name.clone(), c.scan.rows);
        }
        outcome.quick_condition_rows = scans
            .iter()
            .map(|c| c.scan.rows)
            .min_by(|a, b| a.total_cmp(b));
        if table_rows > 0.0 {
            outcome.selectivity = outcome
                .quick_condition_rows
                .map(|rows| (rows / table_rows).min(1.0));
        }
        ctx.check_killed()?;

        let mut best = None;
        let mut best_cost = table_scan_cost;
        for rule in self.rule_registry.active_rules(&self.config) {
            if rule.requires_tree() && tree.is_none() {
                continue;
            }
            let mut rule_trace = TraceRecord::new(rule.name());
            let candidate = {
                let mut pctx = PlanContext {
                    range: &mut ctx,
                    table,
                    oracle,
                    query,
                    predicate,
                    tree: tree.as_ref(),
                    scans: &scans,
                    best_cost,
                    config: &self.config,
                    trace: &mut rule_trace,
                };
                rule.apply(&mut pctx)?
            };
            ctx.check_killed()?;
            match candidate {
                Some(plan) if plan.cost() < best_cost => {
                    trace!(rule = rule.name(), rows = plan.rows(), cost = plan.cost().total, "new best plan");
                    rule_trace.set("rows", plan.rows());
                    rule_trace.set("cost", plan.cost().total);
                    rule_trace.set("chosen", true);
                    best_cost = plan.cost();
                    best = Some(plan);
                }
                Some(plan) => {
                    rule_trace.set("cost", plan.cost().total);
                    rule_trace.set("chosen", false);
                    rule_trace.set("cause", "cost");
                }
                None => rule_trace.set("chosen", false),
            }
            root.push(rule_trace);
        }

        if let Some(plan) = best {
            debug!(
                table = %table.table,
                kind = ?plan.kind(),
                indexes = ?plan.index_names(),
                rows = plan.rows(),
                cost = plan.cost().total,
                "chose access plan"
            );
            outcome.decision = AccessDecision::Plan(plan);
        } else {
            debug!(table = %table.table, "no index access beats the full scan");
        }
        if let Some(t) = tree {
            ctx.release_tree(t);
        }
        Ok(self.finish(outcome, &ctx, root, sink))
    }

    fn finish(
        &self,
        mut outcome: SearchOutcome,
        ctx: &RangeContext,
        mut root: TraceRecord,
        sink: &mut dyn TraceSink,
    ) -> SearchOutcome {
        outcome.counters = ctx.arena.counters();
        root.set("decision", &outcome.decision);
        root.set("counters", &outcome.counters);
        emit(sink, &root);
        outcome.trace = root;
        outcome
    }
}
