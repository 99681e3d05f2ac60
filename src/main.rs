//! CoolRouter oracle node binary
//!
//! Loads configuration and program schemas, then runs the log subscription,
//! the event loop, the action worker and the status API until interrupted.

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use coolrouter_node::app_state::AppState;
use coolrouter_node::config::NodeConfig;
use coolrouter_node::indexer::{EventDispatcher, LogSubscriber};
use coolrouter_node::models::Pubkey;
use coolrouter_node::node::OracleNode;
use coolrouter_node::routes;
use coolrouter_node::rpc::{LedgerClient, RpcClient};
use coolrouter_node::schema::Schema;
use coolrouter_node::services::{
    run_worker, ActionExecutor, ActionQueue, AdmissionController, AdmissionPolicy, AnswerOracle,
    ChatCompletionOracle, InstructionBuilder, RequestTracker, StaticOracle, Submitter,
};

const LOG_BATCH_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = NodeConfig::from_env().context("invalid configuration")?;
    let signer = Arc::new(config.key_source.load().await?);
    let identity = Pubkey::new(signer.verifying_key().to_bytes());
    let router = config.programs.router.program_id;
    info!(%identity, %router, rpc = %config.rpc_url, commitment = %config.commitment, "starting oracle node");

    // Program schemas and event routes
    let router_schema = Arc::new(
        Schema::load(&config.programs.router.idl_path)
            .await
            .context("loading router schema")?,
    );
    let mut dispatcher = EventDispatcher::new();
    if dispatcher.register_program(router, router_schema.clone()) == 0 {
        warn!(%router, "router schema declares none of the expected events");
    }
    let consumer = config.programs.consumer.as_ref().filter(|consumer| consumer.program_id != router);
    if let Some(consumer) = consumer {
        let schema = Schema::load(&consumer.idl_path)
            .await
            .context("loading consumer schema")?;
        let events = dispatcher.register_program(consumer.program_id, Arc::new(schema));
        info!(program = %consumer.program_id, events, "monitoring consumer program");
    }
    let programs = dispatcher.programs();

    // Ledger access and answer generation
    let ledger: Arc<dyn LedgerClient> = Arc::new(RpcClient::new(
        config.rpc_url.clone(),
        config.commitment,
        config.confirm_timeout,
    ));
    let oracle: Arc<dyn AnswerOracle> = match &config.answer.static_answer {
        Some(answer) => {
            warn!("STATIC_ANSWER set; every request gets the same answer");
            Arc::new(StaticOracle::new(answer.clone()))
        }
        None => Arc::new(ChatCompletionOracle::new(
            config.answer.api_url.clone(),
            config.answer.api_key.clone(),
            config.answer.default_model.clone(),
        )),
    };

    let tracker = Arc::new(RequestTracker::new());
    let (queue, actions) = ActionQueue::bounded(config.action_queue_capacity);
    let executor = Arc::new(ActionExecutor::new(
        tracker.clone(),
        oracle,
        AdmissionController::new(AdmissionPolicy::default()),
        InstructionBuilder::new(router, identity, router_schema),
        Submitter::new(ledger, signer),
        config.fulfillment_delay,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (batch_tx, batch_rx) = mpsc::channel(LOG_BATCH_CAPACITY);

    let subscriber = LogSubscriber::new(config.ws_url.clone(), config.commitment, programs.clone());
    let node = OracleNode::new(
        router,
        dispatcher,
        tracker.clone(),
        queue,
        config.request_ttl,
        config.sweep_interval,
    );

    let subscription = tokio::spawn(subscriber.run(batch_tx, shutdown_rx.clone()));
    let event_loop = tokio::spawn(node.run(batch_rx, shutdown_rx.clone()));
    let worker = tokio::spawn(run_worker(
        executor,
        actions,
        config.max_concurrent_actions,
        shutdown_rx.clone(),
    ));

    // Status API
    let app = routes::app(AppState::new(tracker, identity, programs));
    let listener = TcpListener::bind(config.status_addr)
        .await
        .with_context(|| format!("binding status API to {}", config.status_addr))?;
    info!("Status API listening on {}", config.status_addr);

    let mut api_shutdown = shutdown_rx.clone();
    let api = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = api_shutdown.changed().await;
            })
            .await
    });

    tokio::signal::ctrl_c().await.context("waiting for interrupt")?;
    info!("interrupt received; shutting down");
    let _ = shutdown_tx.send(true);

    let (subscription, event_loop, worker) = tokio::join!(subscription, event_loop, worker);
    for (task, result) in [("subscription", subscription), ("event loop", event_loop), ("worker", worker)] {
        if let Err(err) = result {
            warn!(task, error = %err, "task ended abnormally");
        }
    }
    api.await?.context("status API")?;

    info!("oracle node stopped");
    Ok(())
}
