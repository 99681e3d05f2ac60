//! In-flight request workflow state

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{Digest32, Message, Pubkey, RequestCreated, VotingCompleted};

/// This node's answer for a request and its digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub answer: String,
    pub digest: Digest32,
}

/// Consensus outcome copied from a VotingCompleted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VotingOutcome {
    pub winning_digest: Digest32,
    pub vote_count: u64,
    pub total_votes: u64,
}

impl From<&VotingCompleted> for VotingOutcome {
    fn from(event: &VotingCompleted) -> Self {
        Self {
            winning_digest: event.winning_digest,
            vote_count: event.vote_count,
            total_votes: event.total_votes,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequestWorkflow {
    pub id: String,
    pub caller_program: Pubkey,
    pub provider: String,
    pub model_id: String,
    pub messages: Vec<Message>,
    pub min_votes: u8,
    pub approval_threshold: u8,
    pub candidate: Option<Candidate>,
    pub outcome: Option<VotingOutcome>,
    pub(crate) observed_at: Instant,
    pub(crate) observed_at_utc: DateTime<Utc>,
}

impl RequestWorkflow {
    pub fn from_event(event: &RequestCreated) -> Self {
        Self {
            id: event.request_id.clone(),
            caller_program: event.caller_program,
            provider: event.provider.clone(),
            model_id: event.model_id.clone(),
            messages: event.messages.clone(),
            min_votes: event.min_votes,
            approval_threshold: event.approval_threshold,
            candidate: None,
            outcome: None,
            observed_at: Instant::now(),
            observed_at_utc: Utc::now(),
        }
    }

    pub fn age(&self) -> Duration {
        self.observed_at.elapsed()
    }

    pub fn summary(&self) -> RequestSummary {
        RequestSummary {
            id: self.id.clone(),
            caller_program: self.caller_program,
            model_id: self.model_id.clone(),
            min_votes: self.min_votes,
            approval_threshold: self.approval_threshold,
            voted: self.candidate.is_some(),
            answer_digest: self.candidate.as_ref().map(|c| hex::encode(c.digest)),
            winning_digest: self.outcome.map(|o| hex::encode(o.winning_digest)),
            total_votes: self.outcome.map(|o| o.total_votes),
            observed_at: self.observed_at_utc,
            age_secs: self.age().as_secs(),
        }
    }
}

/// Serializable view of a workflow for the status API
#[derive(Debug, Clone, Serialize)]
pub struct RequestSummary {
    pub id: String,
    pub caller_program: Pubkey,
    pub model_id: String,
    pub min_votes: u8,
    pub approval_threshold: u8,
    pub voted: bool,
    pub answer_digest: Option<String>,
    pub winning_digest: Option<String>,
    pub total_votes: Option<u64>,
    pub observed_at: DateTime<Utc>,
    pub age_secs: u64,
}
