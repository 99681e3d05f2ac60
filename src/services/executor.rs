//! Deferred actions and the bounded worker that runs them

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Semaphore};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::admission::{AbstainReason, Admission, AdmissionController};
use super::builder::InstructionBuilder;
use super::oracle_service::{answer_digest, AnswerOracle};
use super::submitter::Submitter;
use super::tracker::RequestTracker;
use crate::error::{OracleError, Result};
use crate::models::{Candidate, RequestStatus, VotingOutcome};

/// Follow-up work scheduled by the tracker.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    SubmitVote {
        request_id: String,
    },
    ConsiderFulfillment {
        request_id: String,
        outcome: VotingOutcome,
    },
}

impl Action {
    pub fn request_id(&self) -> &str {
        match self {
            Self::SubmitVote { request_id } | Self::ConsiderFulfillment { request_id, .. } => request_id,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::SubmitVote { .. } => "vote",
            Self::ConsiderFulfillment { .. } => "fulfill",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    Voted { signature: String },
    Fulfilled { signature: String },
    Abstained(AbstainReason),
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The workflow was fulfilled or evicted before the action ran.
    NotTracked,
    /// A vote for this request was already recorded.
    AlreadyVoted,
    AlreadyFulfilled,
}

pub struct ActionExecutor {
    tracker: Arc<RequestTracker>,
    oracle: Arc<dyn AnswerOracle>,
    admission: AdmissionController,
    builder: InstructionBuilder,
    submitter: Submitter,
    fulfillment_delay: Duration,
}

impl ActionExecutor {
    pub fn new(
        tracker: Arc<RequestTracker>,
        oracle: Arc<dyn AnswerOracle>,
        admission: AdmissionController,
        builder: InstructionBuilder,
        submitter: Submitter,
        fulfillment_delay: Duration,
    ) -> Self {
        Self {
            tracker,
            oracle,
            admission,
            builder,
            submitter,
            fulfillment_delay,
        }
    }

    /// Runs `action`, logging the result. Failures stay contained to the
    /// request they concern.
    pub async fn execute(&self, action: Action) -> Option<ActionOutcome> {
        let request_id = action.request_id().to_string();
        let label = action.label();

        match self.run(action).await {
            Ok(outcome) => {
                match &outcome {
                    ActionOutcome::Voted { signature } => {
                        info!(%request_id, %signature, "vote submitted")
                    }
                    ActionOutcome::Fulfilled { signature } => {
                        info!(%request_id, %signature, "fulfillment submitted")
                    }
                    ActionOutcome::Abstained(reason) => {
                        info!(%request_id, %reason, "abstaining from fulfillment")
                    }
                    ActionOutcome::Skipped(reason) => {
                        debug!(%request_id, action = label, ?reason, "action skipped")
                    }
                }
                Some(outcome)
            }
            Err(OracleError::AccountNotFound(address)) => {
                warn!(%request_id, action = label, %address, "request account not found; abandoning");
                None
            }
            Err(OracleError::SubmissionRejected { reason, logs }) => {
                error!(%request_id, action = label, %reason, ?logs, "transaction rejected");
                None
            }
            Err(err) => {
                error!(%request_id, action = label, error = %err, "action failed");
                None
            }
        }
    }

    pub async fn run(&self, action: Action) -> Result<ActionOutcome> {
        match action {
            Action::SubmitVote { request_id } => self.vote(&request_id).await,
            Action::ConsiderFulfillment {
                request_id,
                outcome,
            } => self.consider_fulfillment(&request_id, &outcome).await,
        }
    }

    async fn vote(&self, request_id: &str) -> Result<ActionOutcome> {
        let Some(workflow) = self.tracker.get(request_id).await else {
            return Ok(ActionOutcome::Skipped(SkipReason::NotTracked));
        };
        if workflow.candidate.is_some() {
            return Ok(ActionOutcome::Skipped(SkipReason::AlreadyVoted));
        }

        let answer = self
            .oracle
            .answer(&workflow)
            .await
            .map_err(|err| OracleError::Answer(format!("{err:#}")))?;
        let digest = answer_digest(&answer);
        debug!(%request_id, digest = %hex::encode(digest), answer_len = answer.len(), "computed candidate answer");

        let candidate = Candidate { answer, digest };
        if !self.tracker.record_candidate(request_id, candidate).await {
            return Ok(ActionOutcome::Skipped(SkipReason::NotTracked));
        }

        let instruction = self.builder.vote(request_id, &digest)?;
        let signature = self.submitter.submit("vote", instruction).await?;
        Ok(ActionOutcome::Voted { signature })
    }

    /// Damping delay to wait out before `action` may take a worker slot.
    pub fn delay_for(&self, action: &Action) -> Duration {
        match action {
            Action::SubmitVote { .. } => Duration::ZERO,
            Action::ConsiderFulfillment { .. } => self.fulfillment_delay,
        }
    }

    async fn consider_fulfillment(&self, request_id: &str, outcome: &VotingOutcome) -> Result<ActionOutcome> {
        let Some(workflow) = self.tracker.get(request_id).await else {
            return Ok(ActionOutcome::Skipped(SkipReason::NotTracked));
        };

        let probability = match self.admission.decide(workflow.candidate.as_ref(), outcome) {
            Admission::Abstain(reason) => return Ok(ActionOutcome::Abstained(reason)),
            Admission::Attempt { probability } => probability,
        };
        let Some(candidate) = workflow.candidate else {
            return Ok(ActionOutcome::Abstained(AbstainReason::NoCandidate));
        };
        info!(%request_id, probability, total_votes = outcome.total_votes, "selected to fulfill");

        let address = self.builder.request_address(request_id)?;
        let request = self
            .submitter
            .fetch_request(self.builder.schema(), &address)
            .await?;
        if request.status >= RequestStatus::Fulfilled {
            return Ok(ActionOutcome::Skipped(SkipReason::AlreadyFulfilled));
        }

        let instruction = self.builder.fulfill(&request, &candidate.answer)?;
        let signature = self.submitter.submit("fulfill", instruction).await?;
        Ok(ActionOutcome::Fulfilled { signature })
    }
}

/// Sending half of the bounded action queue.
#[derive(Debug, Clone)]
pub struct ActionQueue {
    tx: mpsc::Sender<Action>,
}

impl ActionQueue {
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<Action>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Enqueues without waiting. A full or closed queue drops the action.
    pub fn enqueue(&self, action: Action) -> bool {
        match self.tx.try_send(action) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(action)) => {
                warn!(request_id = %action.request_id(), action = action.label(), "action queue full; dropping");
                false
            }
            Err(mpsc::error::TrySendError::Closed(action)) => {
                warn!(request_id = %action.request_id(), "action queue closed; dropping");
                false
            }
        }
    }
}

/// Drains `actions`, running at most `max_concurrent` at a time, until the
/// queue closes or shutdown is signalled. In-flight actions are not awaited.
///
/// A delayed action sleeps on its own timer and only then competes for a
/// slot, so the fulfillment delay never occupies submission capacity.
pub async fn run_worker(
    executor: Arc<ActionExecutor>,
    mut actions: mpsc::Receiver<Action>,
    max_concurrent: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    let permits = Arc::new(Semaphore::new(max_concurrent.max(1)));
    info!(max_concurrent, "action worker started");

    loop {
        let action = tokio::select! {
            action = actions.recv() => action,
            _ = shutdown.changed() => None,
        };
        let Some(action) = action else {
            break;
        };

        let delay = executor.delay_for(&action);
        if !delay.is_zero() {
            let executor = executor.clone();
            let permits = permits.clone();
            let mut shutdown = shutdown.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = sleep(delay) => {}
                    _ = shutdown.changed() => return,
                }
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };
                executor.execute(action).await;
            });
            continue;
        }

        let permit = tokio::select! {
            permit = permits.clone().acquire_owned() => permit,
            _ = shutdown.changed() => break,
        };
        let Ok(permit) = permit else {
            break;
        };

        let executor = executor.clone();
        tokio::spawn(async move {
            executor.execute(action).await;
            drop(permit);
        });
    }
    info!("action worker stopped");
}
