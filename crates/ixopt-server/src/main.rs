//! # ixopt-server: HTTP Service for the Access Path Optimizer
//!
//! This binary crate exposes the range and index-merge optimizer as a network
//! service. A query planner sends one table, its statistics and the table's
//! part of the WHERE clause; the service answers with the chosen access path.
//!
//! ## Architecture
//!
//! ```text
//! Query planner
//!   |
//!   | HTTP POST /optimize/access-path (JSON)
//!   v
//! ixopt-server (this binary)
//!   |
//!   +-> predicate analysis (range graphs per index)
//!   +-> range scan estimation (records in ranges, costs)
//!   +-> access strategies (range, intersection, union, loose index scan)
//!   |
//!   | HTTP response (decision, row retrieval description, trace)
//!   v
//! Query planner
//! ```
//!
//! ## Endpoints
//!
//! - `GET  /health`                - Health check
//! - `GET  /rules`                 - List access strategies and whether they run
//! - `POST /rules/configure`       - Enable/disable strategies by name
//! - `POST /tables`                - Register a table with its statistics
//! - `POST /optimize/access-path`  - Choose the access path of one table
//!
//! ## Configuration
//!
//! The server listens on `0.0.0.0:3000` unless `IXOPT_LISTEN` names another
//! address. Logging is controlled by the `RUST_LOG` environment variable
//! (defaults to `ixopt=debug`).

mod routes;
mod state;
mod wire;

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

const DEFAULT_LISTEN: &str = "0.0.0.0:3000";

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ixopt=debug")))
        .init();

    let state = Arc::new(state::AppState::new());

    let app = Router::new()
        .route("/health", get(routes::health))
        .route("/rules", get(routes::list_rules))
        .route("/rules/configure", post(routes::configure_rules))
        .route("/tables", post(routes::register_table))
        .route("/optimize/access-path", post(routes::optimize_access_path))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = std::env::var("IXOPT_LISTEN").unwrap_or_else(|_| DEFAULT_LISTEN.to_string());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("ixopt-server listening on http://{addr}");
    axum::serve(listener, app).await
}
