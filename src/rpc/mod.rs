//! Ledger access: account reads and transaction submission

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::Pubkey;
use crate::transaction::{Blockhash, Transaction};

mod http;

pub use http::RpcClient;

/// Confirmation level used for both reads and submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Commitment {
    Processed,
    #[default]
    Confirmed,
    Finalized,
}

impl Commitment {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::Confirmed => "confirmed",
            Self::Finalized => "finalized",
        }
    }
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Commitment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "processed" => Ok(Self::Processed),
            "confirmed" => Ok(Self::Confirmed),
            "finalized" => Ok(Self::Finalized),
            other => Err(format!("unknown commitment `{other}`")),
        }
    }
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Raw account data. A missing account is `OracleError::AccountNotFound`.
    async fn get_account_data(&self, address: &Pubkey) -> Result<Vec<u8>>;

    async fn latest_blockhash(&self) -> Result<Blockhash>;

    /// Returns the transaction signature once the ledger accepted it.
    async fn send_transaction(&self, tx: &Transaction) -> Result<String>;

    /// Waits until `signature` reaches the client's commitment level.
    async fn confirm_transaction(&self, signature: &str) -> Result<()>;
}
