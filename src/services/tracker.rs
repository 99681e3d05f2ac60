use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, info};

use super::executor::Action;
use crate::models::{
    Candidate, RequestCreated, RequestFulfilled, RequestSummary, RequestWorkflow, VotingCompleted,
    VotingOutcome,
};

/// Finished ids remembered so a re-delivered RequestCreated stays a no-op.
pub const DEFAULT_FINISHED_HISTORY: usize = 4096;

/// Owner of all in-flight request workflows.
///
/// Entries are created by RequestCreated, enriched by VotingCompleted and
/// removed by RequestFulfilled or the expiry sweep. Nothing else inserts or
/// deletes. Removed ids are kept in a bounded history and never re-created.
#[derive(Debug)]
pub struct RequestTracker {
    requests: RwLock<Requests>,
}

#[derive(Debug)]
struct Requests {
    active: HashMap<String, RequestWorkflow>,
    finished: FinishedIds,
}

/// Insertion-ordered set that forgets its oldest ids past `capacity`.
#[derive(Debug)]
struct FinishedIds {
    capacity: usize,
    order: VecDeque<String>,
    ids: HashSet<String>,
}

impl FinishedIds {
    fn insert(&mut self, id: &str) {
        if self.capacity == 0 || !self.ids.insert(id.to_string()) {
            return;
        }
        self.order.push_back(id.to_string());
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }
}

impl Default for RequestTracker {
    fn default() -> Self {
        Self::with_history(DEFAULT_FINISHED_HISTORY)
    }
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracker remembering up to `finished_history` fulfilled or evicted ids.
    pub fn with_history(finished_history: usize) -> Self {
        Self {
            requests: RwLock::new(Requests {
                active: HashMap::new(),
                finished: FinishedIds {
                    capacity: finished_history,
                    order: VecDeque::new(),
                    ids: HashSet::new(),
                },
            }),
        }
    }

    /// Inserts the workflow and returns the vote to schedule. Duplicate
    /// deliveries, including those for recently finished requests, return
    /// `None`.
    pub async fn on_request_created(&self, event: &RequestCreated) -> Option<Action> {
        let mut requests = self.requests.write().await;
        if requests.active.contains_key(&event.request_id) {
            debug!(request_id = %event.request_id, "duplicate RequestCreated ignored");
            return None;
        }
        if requests.finished.contains(&event.request_id) {
            debug!(request_id = %event.request_id, "RequestCreated for a finished request ignored");
            return None;
        }

        requests.active.insert(event.request_id.clone(), RequestWorkflow::from_event(event));
        info!(
            request_id = %event.request_id,
            caller = %event.caller_program,
            model = %event.model_id,
            messages = event.messages.len(),
            min_votes = event.min_votes,
            approval_threshold = event.approval_threshold,
            "tracking new request"
        );
        Some(Action::SubmitVote {
            request_id: event.request_id.clone(),
        })
    }

    /// Records the consensus outcome and returns the admission decision to
    /// schedule. Unknown ids and repeated outcomes return `None`.
    pub async fn on_voting_completed(&self, event: &VotingCompleted) -> Option<Action> {
        let mut requests = self.requests.write().await;
        let Some(workflow) = requests.active.get_mut(&event.request_id) else {
            info!(request_id = %event.request_id, "voting completed for a request this node never saw");
            return None;
        };
        if workflow.outcome.is_some() {
            debug!(request_id = %event.request_id, "duplicate VotingCompleted ignored");
            return None;
        }

        let outcome = VotingOutcome::from(event);
        workflow.outcome = Some(outcome);
        info!(
            request_id = %event.request_id,
            winning_digest = %hex::encode(event.winning_digest),
            vote_count = event.vote_count,
            total_votes = event.total_votes,
            "voting completed"
        );
        Some(Action::ConsiderFulfillment {
            request_id: event.request_id.clone(),
            outcome,
        })
    }

    pub async fn on_request_fulfilled(&self, event: &RequestFulfilled) -> Option<RequestWorkflow> {
        let mut requests = self.requests.write().await;
        let removed = requests.active.remove(&event.request_id);
        requests.finished.insert(&event.request_id);
        info!(
            request_id = %event.request_id,
            response_length = event.response_length,
            tracked = removed.is_some(),
            "request fulfilled"
        );
        removed
    }

    /// Stores this node's answer. Set once; returns false when the request is
    /// gone or already has a candidate.
    pub async fn record_candidate(&self, request_id: &str, candidate: Candidate) -> bool {
        match self.requests.write().await.active.get_mut(request_id) {
            Some(workflow) if workflow.candidate.is_none() => {
                workflow.candidate = Some(candidate);
                true
            }
            _ => false,
        }
    }

    pub async fn get(&self, request_id: &str) -> Option<RequestWorkflow> {
        self.requests.read().await.active.get(request_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.requests.read().await.active.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.requests.read().await.active.is_empty()
    }

    /// Oldest first.
    pub async fn summaries(&self) -> Vec<RequestSummary> {
        let requests = self.requests.read().await;
        let mut workflows: Vec<&RequestWorkflow> = requests.active.values().collect();
        workflows.sort_by_key(|workflow| workflow.observed_at);
        workflows.into_iter().map(RequestWorkflow::summary).collect()
    }

    /// Evicts workflows tracked for at least `ttl`. Returns the evicted ids.
    pub async fn expire(&self, ttl: Duration) -> Vec<String> {
        let mut requests = self.requests.write().await;
        let expired: Vec<String> = requests
            .active
            .values()
            .filter(|workflow| workflow.age() >= ttl)
            .map(|workflow| workflow.id.clone())
            .collect();

        for id in &expired {
            requests.finished.insert(id);
            if let Some(workflow) = requests.active.remove(id) {
                info!(
                    request_id = %id,
                    voted = workflow.candidate.is_some(),
                    voting_completed = workflow.outcome.is_some(),
                    age_secs = workflow.age().as_secs(),
                    "evicting stale request"
                );
            }
        }
        expired
    }
}
