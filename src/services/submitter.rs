use std::sync::Arc;

use ed25519_dalek::SigningKey;
use tracing::{debug, info};

use crate::error::Result;
use crate::models::account::REQUEST_ACCOUNT;
use crate::models::{Pubkey, RequestAccount};
use crate::rpc::LedgerClient;
use crate::schema::Schema;
use crate::transaction::{Instruction, Message, Transaction};

/// Signs, sends and confirms transactions as this node's oracle identity.
#[derive(Clone)]
pub struct Submitter {
    ledger: Arc<dyn LedgerClient>,
    signer: Arc<SigningKey>,
    identity: Pubkey,
}

impl Submitter {
    pub fn new(ledger: Arc<dyn LedgerClient>, signer: Arc<SigningKey>) -> Self {
        let identity = Pubkey::new(signer.verifying_key().to_bytes());
        Self {
            ledger,
            signer,
            identity,
        }
    }

    pub fn identity(&self) -> &Pubkey {
        &self.identity
    }

    /// Submits `instruction` in a fresh transaction and waits for
    /// confirmation. Returns the transaction signature.
    pub async fn submit(&self, label: &str, instruction: Instruction) -> Result<String> {
        let blockhash = self.ledger.latest_blockhash().await?;
        let message = Message::compile(&self.identity, &[instruction], blockhash)?;
        let tx = Transaction::sign(message, &[self.signer.as_ref()])?;
        debug!(action = label, tx = %tx.id(), "sending transaction");

        let signature = self.ledger.send_transaction(&tx).await?;
        self.ledger.confirm_transaction(&signature).await?;
        info!(action = label, %signature, "transaction confirmed");
        Ok(signature)
    }

    /// Reads and decodes the request record at `address`.
    pub async fn fetch_request(&self, schema: &Schema, address: &Pubkey) -> Result<RequestAccount> {
        let data = self.ledger.get_account_data(address).await?;
        let record = schema.decode_account(REQUEST_ACCOUNT, &data)?;
        RequestAccount::from_record(&record)
    }
}

impl std::fmt::Debug for Submitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Submitter")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}
