//! The oracle node's event loop

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::indexer::{DispatchedEvent, EventDispatcher, LogBatch};
use crate::models::{NodeEvent, Pubkey};
use crate::services::{Action, ActionQueue, RequestTracker};

/// Turns log batches into tracker transitions and queued actions.
pub struct OracleNode {
    router: Pubkey,
    dispatcher: EventDispatcher,
    tracker: Arc<RequestTracker>,
    queue: ActionQueue,
    request_ttl: Duration,
    sweep_interval: Duration,
}

impl OracleNode {
    pub fn new(
        router: Pubkey,
        dispatcher: EventDispatcher,
        tracker: Arc<RequestTracker>,
        queue: ActionQueue,
        request_ttl: Duration,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            router,
            dispatcher,
            tracker,
            queue,
            request_ttl,
            sweep_interval,
        }
    }

    pub fn tracker(&self) -> &Arc<RequestTracker> {
        &self.tracker
    }

    /// Applies every event in `batch` and enqueues the resulting actions.
    /// Returns the number of actions enqueued.
    pub async fn handle_batch(&self, batch: &LogBatch) -> usize {
        let mut enqueued = 0;
        for event in self.dispatcher.dispatch(batch) {
            if let Some(action) = self.apply(&event).await {
                if self.queue.enqueue(action) {
                    enqueued += 1;
                }
            }
        }
        enqueued
    }

    /// Runs the tracker transition for one event and returns the follow-up
    /// action, if any. Request lifecycle events only count when emitted by
    /// the router.
    pub async fn apply(&self, dispatched: &DispatchedEvent) -> Option<Action> {
        let from_router = dispatched.program == self.router;
        match &dispatched.event {
            NodeEvent::RequestCreated(event) if from_router => {
                self.tracker.on_request_created(event).await
            }
            NodeEvent::VotingCompleted(event) if from_router => {
                self.tracker.on_voting_completed(event).await
            }
            NodeEvent::RequestFulfilled(event) if from_router => {
                self.tracker.on_request_fulfilled(event).await;
                None
            }
            NodeEvent::ResponseReceived(event) => {
                info!(
                    request_id = %event.request_id,
                    program = %dispatched.program,
                    preview = %event.response_preview,
                    "consumer received response"
                );
                None
            }
            other => {
                debug!(
                    request_id = %other.request_id(),
                    program = %dispatched.program,
                    "ignoring request event from a non-router program"
                );
                None
            }
        }
    }

    /// Evicts stale workflows. Returns how many were evicted.
    pub async fn sweep(&self) -> usize {
        let expired = self.tracker.expire(self.request_ttl).await;
        if !expired.is_empty() {
            warn!(
                count = expired.len(),
                ttl_secs = self.request_ttl.as_secs(),
                "evicted requests that never completed"
            );
        }
        expired.len()
    }

    /// Processes batches until the subscription ends or shutdown is signalled.
    pub async fn run(self, mut batches: mpsc::Receiver<LogBatch>, mut shutdown: watch::Receiver<bool>) {
        let mut sweep = interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        sweep.tick().await;

        info!(router = %self.router, programs = self.dispatcher.programs().len(), "oracle node running");
        loop {
            tokio::select! {
                batch = batches.recv() => match batch {
                    Some(batch) => {
                        let enqueued = self.handle_batch(&batch).await;
                        debug!(slot = batch.slot, signature = %batch.signature, enqueued, "processed log batch");
                    }
                    None => break,
                },
                _ = sweep.tick() => {
                    self.sweep().await;
                }
                _ = shutdown.changed() => break,
            }
        }
        let tracked = self.tracker.len().await;
        info!(tracked, "oracle node stopped");
    }
}
