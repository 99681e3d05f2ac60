//! Error taxonomy for the oracle node

use thiserror::Error;

use crate::models::Pubkey;

pub type Result<T, E = OracleError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum OracleError {
    /// A named event, account or type has no field list to decode with.
    #[error("schema has no field list for `{0}`")]
    SchemaMissing(String),

    #[error("read of {wanted} bytes at offset {offset} exceeds buffer of {len} bytes")]
    OutOfBounds {
        offset: usize,
        wanted: usize,
        len: usize,
    },

    #[error("account {0} not found")]
    AccountNotFound(Pubkey),

    #[error("transaction rejected: {reason}")]
    SubmissionRejected {
        reason: String,
        /// Program logs returned by the ledger's simulation, if any.
        logs: Vec<String>,
    },

    #[error("invalid schema: {0}")]
    Schema(String),

    #[error("malformed payload: {0}")]
    Decode(String),

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("answer backend failed: {0}")]
    Answer(String),
}

impl OracleError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::SubmissionRejected {
            reason: reason.into(),
            logs: Vec::new(),
        }
    }
}

impl From<reqwest::Error> for OracleError {
    fn from(err: reqwest::Error) -> Self {
        Self::Rpc(err.to_string())
    }
}

impl From<serde_json::Error> for OracleError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}
