use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::Client;
use serde_json::{json, Value};
use tokio::time::{sleep, Instant};
use tracing::debug;

use super::{Commitment, LedgerClient};
use crate::error::{OracleError, Result};
use crate::models::Pubkey;
use crate::transaction::{Blockhash, Transaction};

const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// JSON-RPC ledger client over HTTP
#[derive(Clone)]
pub struct RpcClient {
    rpc_url: String,
    commitment: Commitment,
    confirm_timeout: Duration,
    http: Client,
}

impl RpcClient {
    pub fn new(rpc_url: impl Into<String>, commitment: Commitment, confirm_timeout: Duration) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            commitment,
            confirm_timeout,
            http: Client::new(),
        }
    }

    pub fn commitment(&self) -> Commitment {
        self.commitment
    }

    async fn rpc_call(&self, method: &str, params: Value) -> Result<Value> {
        let response = self
            .http
            .post(&self.rpc_url)
            .json(&json!({
                "jsonrpc": "2.0",
                "id": "coolrouter-node",
                "method": method,
                "params": params,
            }))
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?;

        if let Some(error) = response.get("error") {
            return Err(rpc_error(method, error));
        }

        response
            .get("result")
            .cloned()
            .ok_or_else(|| OracleError::Rpc(format!("{method}: missing result")))
    }
}

#[async_trait]
impl LedgerClient for RpcClient {
    async fn get_account_data(&self, address: &Pubkey) -> Result<Vec<u8>> {
        let result = self
            .rpc_call(
                "getAccountInfo",
                json!([address.to_string(), {
                    "encoding": "base64",
                    "commitment": self.commitment.as_str(),
                }]),
            )
            .await?;

        let value = match result.get("value") {
            Some(value) if !value.is_null() => value,
            _ => return Err(OracleError::AccountNotFound(*address)),
        };

        let encoded = value
            .pointer("/data/0")
            .and_then(Value::as_str)
            .ok_or_else(|| OracleError::Rpc("getAccountInfo: missing data".into()))?;
        BASE64
            .decode(encoded)
            .map_err(|err| OracleError::Rpc(format!("getAccountInfo: bad base64: {err}")))
    }

    async fn latest_blockhash(&self) -> Result<Blockhash> {
        let result = self
            .rpc_call(
                "getLatestBlockhash",
                json!([{ "commitment": self.commitment.as_str() }]),
            )
            .await?;

        let raw = result
            .pointer("/value/blockhash")
            .and_then(Value::as_str)
            .ok_or_else(|| OracleError::Rpc("getLatestBlockhash: missing blockhash".into()))?;
        raw.parse::<Pubkey>()
            .map(Pubkey::to_bytes)
            .map_err(|err| OracleError::Rpc(format!("getLatestBlockhash: {err}")))
    }

    async fn send_transaction(&self, tx: &Transaction) -> Result<String> {
        let wire = BASE64.encode(tx.serialize()?);
        let result = self
            .rpc_call(
                "sendTransaction",
                json!([wire, {
                    "encoding": "base64",
                    "preflightCommitment": self.commitment.as_str(),
                }]),
            )
            .await?;

        result
            .as_str()
            .map(ToString::to_string)
            .ok_or_else(|| OracleError::Rpc("sendTransaction: missing signature".into()))
    }

    async fn confirm_transaction(&self, signature: &str) -> Result<()> {
        let deadline = Instant::now() + self.confirm_timeout;

        loop {
            let result = self
                .rpc_call("getSignatureStatuses", json!([[signature]]))
                .await?;
            let status = result.pointer("/value/0").filter(|status| !status.is_null());

            if let Some(status) = status {
                if let Some(err) = status.get("err").filter(|err| !err.is_null()) {
                    return Err(OracleError::rejected(format!("transaction failed: {err}")));
                }
                let reached = status
                    .get("confirmationStatus")
                    .and_then(Value::as_str)
                    .and_then(|level| level.parse::<Commitment>().ok())
                    .map(|level| level >= self.commitment)
                    .unwrap_or(false);
                if reached {
                    return Ok(());
                }
            }

            if Instant::now() >= deadline {
                return Err(OracleError::rejected(format!(
                    "not {} within {}s",
                    self.commitment,
                    self.confirm_timeout.as_secs()
                )));
            }
            debug!(%signature, "waiting for confirmation");
            sleep(STATUS_POLL_INTERVAL).await;
        }
    }
}

/// Maps a JSON-RPC error object, keeping any simulation logs.
fn rpc_error(method: &str, error: &Value) -> OracleError {
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string();

    if method != "sendTransaction" {
        return OracleError::Rpc(format!("{method}: {message}"));
    }

    let logs = error
        .pointer("/data/logs")
        .and_then(Value::as_array)
        .map(|lines| {
            lines
                .iter()
                .filter_map(Value::as_str)
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default();

    OracleError::SubmissionRejected {
        reason: message,
        logs,
    }
}
