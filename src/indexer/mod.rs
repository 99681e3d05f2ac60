//! Program log ingestion
//!
//! [`LogSubscriber`] keeps a websocket log subscription open per monitored
//! program and forwards every notification as a [`LogBatch`]. The
//! [`EventDispatcher`] turns batches into typed events.

mod dispatcher;
mod subscription;

pub use dispatcher::{DispatchedEvent, EventDispatcher, PROGRAM_DATA_PREFIX};
pub use subscription::{parse_notification, LogSubscriber, SubscriptionError};

use crate::models::Pubkey;

/// Logs of one transaction, as delivered for one monitored program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogBatch {
    pub program: Pubkey,
    pub slot: u64,
    pub signature: String,
    pub failed: bool,
    pub logs: Vec<String>,
}
