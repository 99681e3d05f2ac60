//! Probabilistic gate in front of the terminal fulfillment transaction.
//!
//! Every node that voted for the winning answer sees the same
//! VotingCompleted event. Each one proceeds with probability
//! `max_fulfillers / total_votes`, so about `max_fulfillers` nodes attempt
//! the fulfillment regardless of how many voted.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::models::{Candidate, VotingOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionPolicy {
    /// Share of the voters expected to attempt fulfillment, in percent.
    pub fulfiller_percent: u64,
    /// Upper bound on the expected number of fulfillers.
    pub max_fulfillers: u64,
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        Self {
            fulfiller_percent: 20,
            max_fulfillers: 4,
        }
    }
}

impl AdmissionPolicy {
    /// `clamp(floor(total_votes * percent / 100), 1, max_fulfillers)`
    pub fn max_fulfillers(&self, total_votes: u64) -> u64 {
        (total_votes.saturating_mul(self.fulfiller_percent) / 100).clamp(1, self.max_fulfillers.max(1))
    }

    /// Chance that one node attempts the fulfillment. Zero when nobody voted.
    pub fn probability(&self, total_votes: u64) -> f64 {
        if total_votes == 0 {
            return 0.0;
        }
        (self.max_fulfillers(total_votes) as f64 / total_votes as f64).min(1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Admission {
    Attempt { probability: f64 },
    Abstain(AbstainReason),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AbstainReason {
    /// This node never stored an answer for the request.
    NoCandidate,
    /// Our answer lost the vote.
    DigestMismatch,
    NoVotes,
    NotSampled { probability: f64, draw: f64 },
}

impl fmt::Display for AbstainReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoCandidate => f.write_str("no candidate answer"),
            Self::DigestMismatch => f.write_str("answer did not win consensus"),
            Self::NoVotes => f.write_str("no votes recorded"),
            Self::NotSampled { probability, draw } => {
                write!(f, "not sampled (draw {draw:.3} >= p {probability:.3})")
            }
        }
    }
}

pub struct AdmissionController {
    policy: AdmissionPolicy,
    rng: Mutex<StdRng>,
}

impl AdmissionController {
    pub fn new(policy: AdmissionPolicy) -> Self {
        Self::with_rng(policy, StdRng::from_entropy())
    }

    pub fn with_rng(policy: AdmissionPolicy, rng: StdRng) -> Self {
        Self {
            policy,
            rng: Mutex::new(rng),
        }
    }

    pub fn policy(&self) -> AdmissionPolicy {
        self.policy
    }

    pub fn decide(&self, candidate: Option<&Candidate>, outcome: &VotingOutcome) -> Admission {
        let Some(candidate) = candidate else {
            return Admission::Abstain(AbstainReason::NoCandidate);
        };
        if candidate.digest != outcome.winning_digest {
            return Admission::Abstain(AbstainReason::DigestMismatch);
        }
        if outcome.total_votes == 0 {
            return Admission::Abstain(AbstainReason::NoVotes);
        }

        let probability = self.policy.probability(outcome.total_votes);
        let draw = self.draw();
        if draw >= probability {
            Admission::Abstain(AbstainReason::NotSampled { probability, draw })
        } else {
            Admission::Attempt { probability }
        }
    }

    /// Uniform sample in `[0, 1)`.
    fn draw(&self) -> f64 {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        rng.gen::<f64>()
    }
}

impl fmt::Debug for AdmissionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionController")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
