//! Request workflow services for the oracle node

pub mod admission;
pub mod builder;
pub mod executor;
pub mod oracle_service;
pub mod submitter;
pub mod tracker;

pub use admission::{AbstainReason, Admission, AdmissionController, AdmissionPolicy};
pub use builder::InstructionBuilder;
pub use executor::{run_worker, Action, ActionExecutor, ActionOutcome, ActionQueue, SkipReason};
pub use oracle_service::{answer_digest, AnswerOracle, ChatCompletionOracle, StaticOracle};
pub use submitter::Submitter;
pub use tracker::RequestTracker;
