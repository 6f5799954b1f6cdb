//! # JSON Wire Protocol
//!
//! Request and response bodies of the access path endpoint, plus the error
//! type of the service.
//!
//! - Request: `POST /optimize/access-path` with [`AccessPathRequest`]. The
//!   table is either sent inline (`table` + `statistics`) or named
//!   (`tableRef`) after registering it with `POST /tables`.
//! - Response: [`AccessPathResponse`] with the decision, the materialized
//!   row retrieval description, selectivity feedback and, on request, the
//!   optimizer trace.

use axum::http::StatusCode;
use ixopt_core::catalog::TableInfo;
use ixopt_core::error::OptError;
use ixopt_core::expr::{AggExpr, ColumnRef, Expr, TableRef};
use ixopt_core::plan::{AccessDecision, PlanKind};
use ixopt_core::quick::QuickSelect;
use ixopt_core::range::RangeCounters;
use ixopt_core::search::{SearchConfig, SearchOutcome};
use ixopt_core::stats::Statistics;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<OptError> for ServerError {
    fn from(err: OptError) -> Self {
        match err {
            OptError::UnknownTable(_) => ServerError::NotFound(err.to_string()),
            OptError::UnknownColumn { .. } | OptError::TooManyIndexes { .. } => {
                ServerError::BadRequest(err.to_string())
            }
            OptError::OutOfMemory | OptError::Killed => ServerError::Internal(err.to_string()),
        }
    }
}

impl From<ServerError> for (StatusCode, String) {
    fn from(err: ServerError) -> Self {
        let status = match err {
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Request body for `POST /optimize/access-path`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessPathRequest {
    /// Inline table definition.
    #[serde(default)]
    pub table: Option<TableInfo>,
    /// Statistics of the inline table.
    #[serde(default)]
    pub statistics: Option<Statistics>,
    /// A table registered through `POST /tables`.
    #[serde(default)]
    pub table_ref: Option<TableRef>,
    /// WHERE clause restricted to this table.
    #[serde(default)]
    pub predicate: Option<Expr>,
    /// Plain columns of the select list.
    #[serde(default)]
    pub select: Vec<ColumnRef>,
    #[serde(default)]
    pub group_by: Vec<ColumnRef>,
    #[serde(default)]
    pub aggregates: Vec<AggExpr>,
    #[serde(default)]
    pub distinct: bool,
    /// Partial [`SearchConfig`] override for this request only.
    #[serde(default)]
    pub config: Option<Value>,
    /// Include the optimizer trace in the response.
    #[serde(default)]
    pub trace: bool,
}

/// Request body for `POST /tables`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterTableRequest {
    pub table: TableInfo,
    pub statistics: Statistics,
}

/// Request body for `POST /rules/configure`.
#[derive(Debug, Deserialize)]
pub struct ConfigureRulesRequest {
    /// Rules to enable (by name).
    #[serde(default)]
    pub enable: Vec<String>,
    /// Rules to disable (by name).
    #[serde(default)]
    pub disable: Vec<String>,
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessPathResponse {
    /// `impossible`, `full_scan` or `plan`.
    pub decision: &'static str,
    pub plan_kind: Option<PlanKind>,
    pub indexes: Vec<String>,
    pub rows: f64,
    pub cost: f64,
    /// Why no index access was chosen.
    pub reason: Option<String>,
    pub quick: Option<QuickSelect>,
    pub quick_condition_rows: Option<f64>,
    pub selectivity: Option<f64>,
    pub quick_rows: BTreeMap<String, f64>,
    pub maybe_keys: Vec<String>,
    pub table_scan_cost: f64,
    pub counters: RangeCounters,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<Vec<Value>>,
}

impl AccessPathResponse {
    pub fn new(table: &TableInfo, outcome: SearchOutcome, trace: Option<Vec<Value>>) -> Self {
        let (decision, reason) = match &outcome.decision {
            AccessDecision::Impossible => ("impossible", None),
            AccessDecision::FullScan { reason, .. } => ("full_scan", Some(reason.clone())),
            AccessDecision::Plan(_) => ("plan", None),
        };
        let plan = outcome.decision.plan();
        Self {
            decision,
            plan_kind: plan.map(|p| p.kind()),
            indexes: plan.map(|p| p.index_names()).unwrap_or_default(),
            rows: outcome.decision.rows(),
            cost: outcome.decision.cost().total,
            reason,
            quick: plan.map(|p| p.materialize(table)),
            quick_condition_rows: outcome.quick_condition_rows,
            selectivity: outcome.selectivity,
            quick_rows: outcome.quick_rows,
            maybe_keys: outcome.maybe_keys,
            table_scan_cost: outcome.table_scan_cost.total,
            counters: outcome.counters,
            trace,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct RulesResponse {
    pub rules: Vec<RuleInfo>,
}

#[derive(Debug, Serialize)]
pub struct RuleInfo {
    pub name: String,
    pub enabled: bool,
}

/// Apply a partial configuration object on top of `base`.
pub fn merge_config(base: &SearchConfig, patch: Option<&Value>) -> Result<SearchConfig, ServerError> {
    let Some(patch) = patch else {
        return Ok(base.clone());
    };
    let Value::Object(fields) = patch else {
        return Err(ServerError::BadRequest("config must be an object".to_string()));
    };
    let mut merged = serde_json::to_value(base).map_err(|e| ServerError::Internal(e.to_string()))?;
    if let Value::Object(target) = &mut merged {
        for (k, v) in fields {
            match (target.get_mut(k), v) {
                // Nested cost constants merge field by field.
                (Some(Value::Object(inner)), Value::Object(patch_inner)) => {
                    for (ik, iv) in patch_inner {
                        inner.insert(ik.clone(), iv.clone());
                    }
                }
                _ => {
                    target.insert(k.clone(), v.clone());
                }
            }
        }
    }
    serde_json::from_value(merged).map_err(|e| ServerError::BadRequest(format!("invalid config: {e}")))
}

/// Reject table definitions that reference missing columns or indexes.
pub fn validate_table(table: &TableInfo) -> Result<(), ServerError> {
    for index in &table.indexes {
        if index.parts.is_empty() {
            return Err(ServerError::BadRequest(format!("index {} has no key parts", index.name)));
        }
        if let Some(p) = index.parts.iter().find(|p| p.column >= table.columns.len()) {
            return Err(ServerError::BadRequest(format!(
                "index {} references column #{} but the table has {} columns",
                index.name,
                p.column,
                table.columns.len()
            )));
        }
    }
    if table.primary_key.is_some_and(|pk| pk >= table.indexes.len()) {
        return Err(ServerError::BadRequest("primary key is not one of the indexes".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ixopt_core::catalog::{ColumnDef, DataType, IndexDef};
    use serde_json::json;

    #[test]
    fn test_merge_config_partial() {
        let base = SearchConfig::default();
        let patch = json!({"index_merge": false, "cost": {"row_evaluate": 0.5}});
        let merged = merge_config(&base, Some(&patch)).unwrap();
        assert!(!merged.index_merge);
        assert_eq!(merged.cost.row_evaluate, 0.5);
        assert_eq!(merged.cost.io_block_read, base.cost.io_block_read);
        assert_eq!(merged.max_sel_arg_weight, base.max_sel_arg_weight);
    }

    #[test]
    fn test_merge_config_rejects_bad_types() {
        let base = SearchConfig::default();
        assert!(matches!(
            merge_config(&base, Some(&json!({"max_sel_args": "many"}))),
            Err(ServerError::BadRequest(_))
        ));
        assert!(matches!(
            merge_config(&base, Some(&json!([1, 2]))),
            Err(ServerError::BadRequest(_))
        ));
    }

    #[test]
    fn test_validate_table() {
        let int = DataType::Int {
            bits: 32,
            unsigned: false,
        };
        let ok = TableInfo::new(TableRef::new("s", "t"), vec![ColumnDef::new("a", int, false)])
            .with_index(IndexDef::new("a", &[0]));
        assert!(validate_table(&ok).is_ok());
        let bad = ok.clone().with_index(IndexDef::new("b", &[1]));
        assert!(matches!(validate_table(&bad), Err(ServerError::BadRequest(_))));
    }

    #[test]
    fn test_error_status_codes() {
        let (status, _) = <(StatusCode, String)>::from(ServerError::from(OptError::UnknownTable("s.t".into())));
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, msg) = <(StatusCode, String)>::from(ServerError::from(OptError::UnknownColumn {
            table: "s.t".into(),
            column: "z".into(),
        }));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(msg.contains("'z'"));
    }

    #[test]
    fn test_request_deserializes() {
        let body = json!({
            "tableRef": {"schema": "s", "name": "t"},
            "predicate": {"BinaryOp": {
                "op": "Eq",
                "left": {"Column": {"name": "a"}},
                "right": {"Literal": {"Int64": 5}}
            }},
            "groupBy": [{"name": "a"}],
            "trace": true
        });
        let req: AccessPathRequest = serde_json::from_value(body).unwrap();
        assert!(req.table.is_none());
        assert_eq!(req.group_by.len(), 1);
        assert!(req.trace);
        assert!(matches!(req.predicate, Some(Expr::BinaryOp { .. })));
    }
}
