use std::collections::HashMap;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use super::LogBatch;
use crate::models::Pubkey;
use crate::rpc::Commitment;

const MAX_RECONNECT_BACKOFF_SECONDS: u64 = 30;

#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("websocket error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("subscription for {program} rejected: {reason}")]
    Rejected { program: Pubkey, reason: String },
    #[error("connection closed by peer")]
    Closed,
}

/// Streams the transaction logs of every monitored program.
///
/// One `logsSubscribe` is issued per program on a shared connection. A lost
/// connection is re-established with exponential backoff; events emitted
/// while disconnected are not replayed.
#[derive(Debug, Clone)]
pub struct LogSubscriber {
    ws_url: String,
    commitment: Commitment,
    programs: Vec<Pubkey>,
}

impl LogSubscriber {
    pub fn new(ws_url: impl Into<String>, commitment: Commitment, programs: Vec<Pubkey>) -> Self {
        Self {
            ws_url: ws_url.into(),
            commitment,
            programs,
        }
    }

    /// Runs until `shutdown` flips to true or `sink` is dropped.
    pub async fn run(self, sink: mpsc::Sender<LogBatch>, mut shutdown: watch::Receiver<bool>) {
        if self.programs.is_empty() {
            info!("log subscription disabled: no programs configured");
            return;
        }

        let mut restart_count: u32 = 0;
        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.session(&sink, &mut shutdown, &mut restart_count).await {
                Ok(()) => break,
                Err(err) => error!(error = %err, url = %self.ws_url, "log subscription lost"),
            }

            restart_count = restart_count.saturating_add(1);
            let backoff = reconnect_backoff(restart_count);
            warn!(restart_count, backoff_seconds = backoff.as_secs(), "log subscription reconnect backoff");

            tokio::select! {
                _ = sleep(backoff) => {}
                _ = shutdown.changed() => break,
            }
        }
        info!("log subscription stopped");
    }

    async fn session(
        &self,
        sink: &mpsc::Sender<LogBatch>,
        shutdown: &mut watch::Receiver<bool>,
        restart_count: &mut u32,
    ) -> Result<(), SubscriptionError> {
        let (stream, _) = connect_async(self.ws_url.as_str()).await?;
        let (mut write, mut read) = stream.split();
        info!(url = %self.ws_url, programs = self.programs.len(), "connected to log stream");

        // request id -> program, until the subscription id comes back
        let mut pending: HashMap<u64, Pubkey> = HashMap::new();
        for (id, program) in (1u64..).zip(self.programs.iter()) {
            let request = subscribe_request(id, program, self.commitment);
            write.send(Message::Text(request.to_string())).await?;
            pending.insert(id, *program);
        }

        let mut subscriptions: HashMap<u64, Pubkey> = HashMap::new();
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        for (offset, subscription) in (0u64..).zip(subscriptions.keys()) {
                            let request = unsubscribe_request(1_000 + offset, *subscription);
                            if let Err(err) = write.send(Message::Text(request.to_string())).await {
                                debug!(error = %err, "unsubscribe failed");
                                break;
                            }
                        }
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(());
                    }
                }
                frame = read.next() => {
                    let Some(frame) = frame else {
                        return Err(SubscriptionError::Closed);
                    };
                    match frame? {
                        Message::Text(text) => {
                            let Ok(value) = serde_json::from_str::<Value>(&text) else {
                                debug!("ignoring non-JSON frame");
                                continue;
                            };

                            if let Some(id) = value.get("id").and_then(Value::as_u64) {
                                let Some(program) = pending.remove(&id) else {
                                    continue;
                                };
                                let subscription = value.get("result").and_then(Value::as_u64);
                                let Some(subscription) = subscription else {
                                    let reason = value
                                        .get("error")
                                        .map(ToString::to_string)
                                        .unwrap_or_else(|| "missing subscription id".into());
                                    return Err(SubscriptionError::Rejected { program, reason });
                                };
                                info!(%program, subscription, "subscribed to program logs");
                                subscriptions.insert(subscription, program);
                                if pending.is_empty() {
                                    *restart_count = 0;
                                }
                                continue;
                            }

                            if let Some(batch) = parse_notification(&value, &subscriptions) {
                                if sink.send(batch).await.is_err() {
                                    return Ok(());
                                }
                            }
                        }
                        Message::Ping(payload) => write.send(Message::Pong(payload)).await?,
                        Message::Close(frame) => {
                            warn!(?frame, "log stream closed by peer");
                            return Err(SubscriptionError::Closed);
                        }
                        _ => {}
                    }
                }
            }
        }
    }
}

fn subscribe_request(id: u64, program: &Pubkey, commitment: Commitment) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "logsSubscribe",
        "params": [
            { "mentions": [program.to_string()] },
            { "commitment": commitment.as_str() }
        ]
    })
}

fn unsubscribe_request(id: u64, subscription: u64) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "logsUnsubscribe",
        "params": [subscription]
    })
}

fn reconnect_backoff(restart_count: u32) -> Duration {
    Duration::from_secs(2u64.saturating_pow(restart_count.min(5)).min(MAX_RECONNECT_BACKOFF_SECONDS))
}

/// Converts a `logsNotification` frame into a [`LogBatch`] for the program
/// the subscription was opened for.
pub fn parse_notification(frame: &Value, subscriptions: &HashMap<u64, Pubkey>) -> Option<LogBatch> {
    if frame.get("method").and_then(Value::as_str) != Some("logsNotification") {
        return None;
    }
    let params = frame.get("params")?;
    let subscription = params.get("subscription").and_then(Value::as_u64)?;
    let Some(program) = subscriptions.get(&subscription) else {
        debug!(subscription, "notification for unknown subscription");
        return None;
    };

    let result = params.get("result")?;
    let value = result.get("value")?;
    let logs = value
        .get("logs")
        .and_then(Value::as_array)?
        .iter()
        .filter_map(Value::as_str)
        .map(ToString::to_string)
        .collect();

    Some(LogBatch {
        program: *program,
        slot: result.pointer("/context/slot").and_then(Value::as_u64).unwrap_or_default(),
        signature: value
            .get("signature")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        failed: value.get("err").map_or(false, |err| !err.is_null()),
        logs,
    })
}
