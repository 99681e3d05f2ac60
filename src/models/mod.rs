//! Data models for the oracle node

use serde::{Deserialize, Serialize};

pub mod account;
pub mod events;
pub mod pubkey;
pub mod request;

pub use account::{CallbackAccount, RequestAccount, RequestStatus};
pub use events::{EventKind, NodeEvent, RequestCreated, RequestFulfilled, ResponseReceived, VotingCompleted};
pub use pubkey::Pubkey;
pub use request::{Candidate, RequestSummary, RequestWorkflow, VotingOutcome};

/// 32-byte content digest of an answer.
pub type Digest32 = [u8; 32];

/// One role-tagged segment of a prompt conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

/// Envelope for status API responses
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}
