//! Ledger-side request record (read-only view)

use std::fmt;

use crate::codec::{Record, Value};
use crate::error::{OracleError, Result};

use super::{Digest32, Pubkey};

/// Schema name of the request account type.
pub const REQUEST_ACCOUNT: &str = "LLMRequest";

/// Seed prefix of the request account's derived address.
pub const REQUEST_SEED: &[u8] = b"request";

/// Forward-only: Pending, then VotingCompleted, then Fulfilled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RequestStatus {
    Pending,
    VotingCompleted,
    Fulfilled,
}

impl RequestStatus {
    fn parse(variant: &str) -> Result<Self> {
        match variant {
            "Pending" => Ok(Self::Pending),
            "VotingCompleted" => Ok(Self::VotingCompleted),
            "Fulfilled" => Ok(Self::Fulfilled),
            other => Err(OracleError::Decode(format!("unknown request status `{other}`"))),
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// An account the caller program needs forwarded into the fulfillment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackAccount {
    pub pubkey: Pubkey,
    pub writable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestAccount {
    pub id: String,
    pub caller_program: Pubkey,
    pub status: RequestStatus,
    pub callbacks: Vec<CallbackAccount>,
    pub winning_digest: Option<Digest32>,
}

impl RequestAccount {
    /// Derived address of the request record under the router program.
    pub fn address(request_id: &str, router: &Pubkey) -> Option<Pubkey> {
        Pubkey::find_program_address(&[REQUEST_SEED, request_id.as_bytes()], router)
            .map(|(address, _)| address)
    }

    pub fn from_record(record: &Record) -> Result<Self> {
        let keys = record
            .list("callback_accounts")?
            .iter()
            .map(|value| match value {
                Value::Pubkey(key) => Ok(*key),
                other => Err(OracleError::Decode(format!(
                    "callback account is {other:?}, expected pubkey"
                ))),
            })
            .collect::<Result<Vec<_>>>()?;

        let flags = record
            .list("callback_writable")?
            .iter()
            .map(|value| match value {
                Value::Bool(flag) => Ok(*flag),
                other => Err(OracleError::Decode(format!(
                    "callback flag is {other:?}, expected bool"
                ))),
            })
            .collect::<Result<Vec<_>>>()?;

        if keys.len() != flags.len() {
            return Err(OracleError::Decode(format!(
                "{} callback accounts but {} writable flags",
                keys.len(),
                flags.len()
            )));
        }

        let digest_field = if record.get("winning_hash").is_some() {
            "winning_hash"
        } else {
            "winning_digest"
        };

        Ok(Self {
            id: record.str("id")?.to_string(),
            caller_program: record.pubkey("caller_program")?,
            status: RequestStatus::parse(record.enum_variant("status")?)?,
            callbacks: keys
                .into_iter()
                .zip(flags)
                .map(|(pubkey, writable)| CallbackAccount { pubkey, writable })
                .collect(),
            winning_digest: record.optional_digest(digest_field)?,
        })
    }
}
