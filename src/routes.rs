//! Route definitions for the status API

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;
use crate::handlers::*;

pub fn status_routes() -> Router<AppState> {
    Router::new()
        .route("/requests", get(list_requests))
        .route("/status", get(node_status))
}

/// Full status router with request tracing.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .merge(status_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
