//! # Application State
//!
//! Shared state available to all HTTP request handlers, created once at
//! startup and shared via `Arc`.
//!
//! ## Components
//!
//! - **Rule Registry**: the access strategies. Rules are stateless, so the
//!   registry is shared rather than cloned per request.
//! - **Search Config**: the server-wide [`SearchConfig`]. `/rules/configure`
//!   updates its disabled rules; requests may override any field for one call.
//! - **Catalog**: tables registered through `/tables`, so that requests can
//!   name a table instead of sending its definition each time.

use ixopt_core::catalog::InMemoryCatalog;
use ixopt_core::rule::RuleRegistry;
use ixopt_core::search::SearchConfig;
use std::sync::{Arc, RwLock};

use crate::wire::ServerError;

pub struct AppState {
    /// All access strategies available to the optimizer.
    pub rule_registry: Arc<RuleRegistry>,
    pub config: RwLock<SearchConfig>,
    pub catalog: RwLock<InMemoryCatalog>,
}

impl AppState {
    /// State with the built-in strategies, the default configuration and an
    /// empty catalog.
    pub fn new() -> Self {
        Self {
            rule_registry: Arc::new(ixopt_rules::default_rule_registry()),
            config: RwLock::new(SearchConfig::default()),
            catalog: RwLock::new(InMemoryCatalog::new()),
        }
    }

    pub fn current_config(&self) -> Result<SearchConfig, ServerError> {
        self.config
            .read()
            .map(|c| c.clone())
            .map_err(|_| ServerError::Internal("configuration lock poisoned".to_string()))
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
