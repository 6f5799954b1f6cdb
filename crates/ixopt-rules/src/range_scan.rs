//! # Range Scan Rule
//!
//! Picks the cheapest single-index range scan. The candidates are priced by
//! the search before any rule runs, so this rule only compares them with the
//! cost to beat.

use ixopt_core::error::OptResult;
use ixopt_core::plan::CandidatePlan;
use ixopt_core::rule::{AccessRule, PlanContext};
use tracing::trace;

pub struct RangeScanRule;

impl AccessRule for RangeScanRule {
    fn name(&self) -> &str {
        "range_scan"
    }

    fn apply(&self, ctx: &mut PlanContext<'_>) -> OptResult<Option<CandidatePlan>> {
        let Some(best) = ctx.scans.first() else {
            ctx.trace.set("cause", "no usable range");
            return Ok(None);
        };
        ctx.trace.set("index", &best.scan.index_name);
        if best.scan.cost >= ctx.best_cost {
            trace!(
                index = %best.scan.index_name,
                cost = best.scan.cost.total,
                best = ctx.best_cost.total,
                "range scan not cheaper than current best"
            );
            return Ok(None);
        }
        Ok(Some(CandidatePlan::RangeScan(best.scan.clone())))
    }
}
