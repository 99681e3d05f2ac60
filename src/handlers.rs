//! Status API handlers

use std::sync::Arc;

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::app_state::AppState;
use crate::models::{ApiResponse, Pubkey, RequestSummary};
use crate::services::RequestTracker;

#[derive(Debug, Serialize)]
pub struct NodeStatus {
    pub identity: Pubkey,
    pub programs: Vec<Pubkey>,
    pub tracked_requests: usize,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: i64,
}

pub async fn root() -> &'static str {
    "CoolRouter oracle node"
}

pub async fn health_check() -> &'static str {
    "OK"
}

/// In-flight workflows, oldest first.
pub async fn list_requests(
    State(tracker): State<Arc<RequestTracker>>,
) -> Json<ApiResponse<Vec<RequestSummary>>> {
    Json(ApiResponse::ok(tracker.summaries().await))
}

pub async fn node_status(State(state): State<AppState>) -> Json<ApiResponse<NodeStatus>> {
    let now = Utc::now();
    Json(ApiResponse::ok(NodeStatus {
        identity: state.identity,
        programs: state.programs.clone(),
        tracked_requests: state.tracker.len().await,
        started_at: state.started_at,
        uptime_secs: (now - state.started_at).num_seconds(),
    }))
}
