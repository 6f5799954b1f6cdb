//! # HTTP Route Handlers
//!
//! This module defines the Axum route handlers for the optimizer service.
//!
//! ## Optimization Pipeline
//!
//! `run_optimization` serves `POST /optimize/access-path`:
//!
//! 1. **Resolve**: take the inline table or look the named one up in the catalog.
//! 2. **Configure**: apply the request's config override to the server config.
//! 3. **Optimize**: run the access path search with the statistics-based oracle.
//! 4. **Describe**: materialize the chosen plan and collect the trace.
//!
//! ## Error Handling
//!
//! Errors are returned as HTTP status codes with descriptive messages:
//! - 400 Bad Request: malformed table definitions, unknown columns or rules,
//!   invalid config overrides
//! - 404 Not Found: a `tableRef` that was never registered
//! - 500 Internal Server Error: a poisoned lock
//!
//! Optimizer failures are not HTTP errors: they degrade to a full scan
//! decision that carries the reason.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use std::sync::Arc;
use tracing::{debug, info};

use ixopt_core::catalog::{Catalog, TableInfo};
use ixopt_core::cost::StatsCostOracle;
use ixopt_core::error::OptError;
use ixopt_core::plan::QueryShape;
use ixopt_core::search::AccessPathSearch;
use ixopt_core::stats::Statistics;
use ixopt_core::trace::{JsonTraceSink, NoopTraceSink};

use crate::state::AppState;
use crate::wire::{
    merge_config, validate_table, AccessPathRequest, AccessPathResponse, ConfigureRulesRequest,
    HealthResponse, RegisterTableRequest, RuleInfo, RulesResponse, ServerError,
};

/// GET /health
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// GET /rules: list every strategy and whether it currently runs.
pub async fn list_rules(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let config = state.current_config()?;
    let active: Vec<&str> = state
        .rule_registry
        .active_rules(&config)
        .iter()
        .map(|r| r.name())
        .collect();
    let rules = state
        .rule_registry
        .names()
        .into_iter()
        .map(|name| RuleInfo {
            name: name.to_string(),
            enabled: active.contains(&name),
        })
        .collect();
    Ok(Json(RulesResponse { rules }))
}

/// POST /rules/configure: enable/disable rules by name.
pub async fn configure_rules(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ConfigureRulesRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let known = state.rule_registry.names();
    if let Some(unknown) = req
        .enable
        .iter()
        .chain(&req.disable)
        .find(|n| !known.contains(&n.as_str()))
    {
        return Err(ServerError::BadRequest(format!("unknown rule: {unknown}")).into());
    }
    let mut config = state
        .config
        .write()
        .map_err(|_| ServerError::Internal("configuration lock poisoned".to_string()))?;
    for name in &req.enable {
        config.disabled_rules.remove(name);
    }
    for name in &req.disable {
        config.disabled_rules.insert(name.clone());
    }
    info!(enabled = ?req.enable, disabled = ?req.disable, "rule configuration updated");
    Ok(Json(serde_json::json!({
        "status": "ok",
        "disabled": config.disabled_rules,
    })))
}

/// POST /tables: register a table so later requests can name it.
pub async fn register_table(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterTableRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    validate_table(&req.table)?;
    let name = req.table.table.to_string();
    state
        .catalog
        .write()
        .map_err(|_| ServerError::Internal("catalog lock poisoned".to_string()))?
        .add_table(req.table, req.statistics);
    info!(table = %name, "table registered");
    Ok((StatusCode::CREATED, Json(serde_json::json!({ "table": name }))))
}

/// POST /optimize/access-path: choose the access path of one table.
pub async fn optimize_access_path(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AccessPathRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    Ok(Json(run_optimization(&state, req)?))
}

fn resolve_table(state: &AppState, req: &mut AccessPathRequest) -> Result<(TableInfo, Statistics), ServerError> {
    if let Some(table) = req.table.take() {
        validate_table(&table)?;
        let stats = req
            .statistics
            .take()
            .ok_or_else(|| ServerError::BadRequest("an inline table needs statistics".to_string()))?;
        return Ok((table, stats));
    }
    let Some(table_ref) = &req.table_ref else {
        return Err(ServerError::BadRequest("either table or tableRef is required".to_string()));
    };
    let catalog = state
        .catalog
        .read()
        .map_err(|_| ServerError::Internal("catalog lock poisoned".to_string()))?;
    let unknown = || ServerError::from(OptError::UnknownTable(table_ref.to_string()));
    let table = catalog.get_table(table_ref).ok_or_else(unknown)?;
    let stats = match req.statistics.take() {
        Some(stats) => stats,
        None => catalog.get_table_stats(table_ref).ok_or_else(unknown)?,
    };
    Ok((table, stats))
}

/// Resolve, configure, optimize and describe one request.
fn run_optimization(state: &AppState, mut req: AccessPathRequest) -> Result<AccessPathResponse, ServerError> {
    let (table, stats) = resolve_table(state, &mut req)?;
    let config = merge_config(&state.current_config()?, req.config.as_ref())?;
    let query = QueryShape::resolve(
        &table,
        &req.select,
        &req.group_by,
        &req.aggregates,
        req.distinct,
        req.predicate.as_ref(),
    )?;
    let oracle = StatsCostOracle::new(table.clone(), stats, config.cost.clone());
    let search = AccessPathSearch::new(state.rule_registry.clone(), config);

    let (outcome, trace) = if req.trace {
        let mut sink = JsonTraceSink::new();
        let outcome = search.optimize(&table, &oracle, req.predicate.as_ref(), &query, &mut sink);
        (outcome, Some(sink.into_records()))
    } else {
        let outcome = search.optimize(&table, &oracle, req.predicate.as_ref(), &query, &mut NoopTraceSink);
        (outcome, None)
    };
    debug!(
        table = %table.table,
        rows = outcome.decision.rows(),
        cost = outcome.decision.cost().total,
        "access path chosen"
    );
    Ok(AccessPathResponse::new(&table, outcome, trace))
}
