//! State shared with the status API handlers

use std::sync::Arc;

use axum::extract::FromRef;
use chrono::{DateTime, Utc};

use crate::models::Pubkey;
use crate::services::RequestTracker;

#[derive(Clone)]
pub struct AppState {
    pub tracker: Arc<RequestTracker>,
    pub identity: Pubkey,
    pub programs: Vec<Pubkey>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(tracker: Arc<RequestTracker>, identity: Pubkey, programs: Vec<Pubkey>) -> Self {
        Self {
            tracker,
            identity,
            programs,
            started_at: Utc::now(),
        }
    }
}

impl FromRef<AppState> for Arc<RequestTracker> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.tracker.clone()
    }
}
