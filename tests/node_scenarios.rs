//! End-to-end request scenarios against an in-memory ledger.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ed25519_dalek::SigningKey;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::{mpsc, watch};

use coolrouter_node::codec::{Decoder, Encoder, Record, Value};
use coolrouter_node::indexer::{EventDispatcher, LogBatch, PROGRAM_DATA_PREFIX};
use coolrouter_node::models::account::REQUEST_ACCOUNT;
use coolrouter_node::models::{Pubkey, RequestAccount};
use coolrouter_node::node::OracleNode;
use coolrouter_node::rpc::LedgerClient;
use coolrouter_node::schema::{Schema, TypeDef};
use coolrouter_node::services::{
    answer_digest, run_worker, AbstainReason, Action, ActionExecutor, ActionOutcome, ActionQueue,
    AdmissionController, AdmissionPolicy, InstructionBuilder, RequestTracker, SkipReason,
    StaticOracle, Submitter,
};
use coolrouter_node::transaction::{Blockhash, Transaction};
use coolrouter_node::{OracleError, Result};

const SCHEMA: &str = include_str!("fixtures/coolrouter.json");
const ANSWER: &str = "2 + 2 = 4";

#[derive(Default)]
struct MockLedger {
    accounts: Mutex<HashMap<Pubkey, Vec<u8>>>,
    sent: Mutex<Vec<Transaction>>,
}

impl MockLedger {
    fn put_account(&self, address: Pubkey, data: Vec<u8>) {
        self.accounts.lock().unwrap().insert(address, data);
    }

    fn sent(&self) -> Vec<Transaction> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn get_account_data(&self, address: &Pubkey) -> Result<Vec<u8>> {
        self.accounts
            .lock()
            .unwrap()
            .get(address)
            .cloned()
            .ok_or(OracleError::AccountNotFound(*address))
    }

    async fn latest_blockhash(&self) -> Result<Blockhash> {
        Ok([3; 32])
    }

    async fn send_transaction(&self, tx: &Transaction) -> Result<String> {
        self.sent.lock().unwrap().push(tx.clone());
        Ok(tx.id())
    }

    async fn confirm_transaction(&self, _signature: &str) -> Result<()> {
        Ok(())
    }
}

struct Harness {
    schema: Arc<Schema>,
    router: Pubkey,
    identity: Pubkey,
    caller: Pubkey,
    ledger: Arc<MockLedger>,
    tracker: Arc<RequestTracker>,
    node: OracleNode,
    executor: ActionExecutor,
    actions: mpsc::Receiver<Action>,
}

fn harness() -> Harness {
    harness_with_delay(Duration::ZERO)
}

fn harness_with_delay(fulfillment_delay: Duration) -> Harness {
    let schema = Arc::new(Schema::from_json("coolrouter", SCHEMA).unwrap());
    let router = schema.address.unwrap();
    let signer = SigningKey::from_bytes(&[7; 32]);
    let identity = Pubkey::new(signer.verifying_key().to_bytes());

    let mut dispatcher = EventDispatcher::new();
    assert_eq!(dispatcher.register_program(router, schema.clone()), 3);

    let ledger = Arc::new(MockLedger::default());
    let tracker = Arc::new(RequestTracker::new());
    let (queue, actions) = ActionQueue::bounded(16);
    let node = OracleNode::new(
        router,
        dispatcher,
        tracker.clone(),
        queue,
        Duration::from_secs(3600),
        Duration::from_secs(60),
    );
    let executor = ActionExecutor::new(
        tracker.clone(),
        Arc::new(StaticOracle::new(ANSWER)),
        AdmissionController::with_rng(AdmissionPolicy::default(), StdRng::seed_from_u64(7)),
        InstructionBuilder::new(router, identity, schema.clone()),
        Submitter::new(ledger.clone(), Arc::new(signer)),
        fulfillment_delay,
    );

    Harness {
        schema,
        router,
        identity,
        caller: Pubkey::new([42; 32]),
        ledger,
        tracker,
        node,
        executor,
        actions,
    }
}

impl Harness {
    fn event_line(&self, name: &str, record: &Record) -> String {
        let event = self.schema.event(name).unwrap();
        let mut encoder = Encoder::new();
        encoder.write_raw(&event.discriminator);
        encoder
            .write_record(event.fields().unwrap(), record, self.schema.types())
            .unwrap();
        format!("{PROGRAM_DATA_PREFIX}{}", BASE64.encode(encoder.into_inner()))
    }

    fn batch(&self, lines: Vec<String>) -> LogBatch {
        let mut logs = vec![format!("Program {} invoke [1]", self.router)];
        logs.extend(lines);
        logs.push(format!("Program {} success", self.router));
        LogBatch {
            program: self.router,
            slot: 100,
            signature: "test-signature".into(),
            failed: false,
            logs,
        }
    }

    fn created(&self, id: &str) -> String {
        let message = Record::new()
            .with("role", Value::String("user".into()))
            .with("content", Value::String("What is 2+2?".into()));
        let record = Record::new()
            .with("request_id", Value::String(id.into()))
            .with("caller_program", Value::Pubkey(self.caller))
            .with("provider", Value::String("openai".into()))
            .with("model_id", Value::String("gpt-4".into()))
            .with("messages", Value::List(vec![Value::Record(message)]))
            .with("min_votes", Value::U8(1))
            .with("approval_threshold", Value::U8(100));
        self.event_line("RequestCreated", &record)
    }

    fn voting_completed(&self, id: &str, digest: [u8; 32], total_votes: u8) -> String {
        let record = Record::new()
            .with("request_id", Value::String(id.into()))
            .with("winning_hash", Value::Bytes(digest.to_vec()))
            .with("vote_count", Value::U8(total_votes))
            .with("total_votes", Value::U8(total_votes));
        self.event_line("VotingCompleted", &record)
    }

    fn fulfilled(&self, id: &str) -> String {
        let record = Record::new()
            .with("request_id", Value::String(id.into()))
            .with("response_length", Value::U64(ANSWER.len() as u64));
        self.event_line("RequestFulfilled", &record)
    }

    fn put_request_account(&self, id: &str, status: &str, callbacks: &[(Pubkey, bool)]) -> Pubkey {
        let Some(TypeDef::Struct(fields)) = self.schema.types().get(REQUEST_ACCOUNT) else {
            panic!("fixture has no LLMRequest struct");
        };
        let record = Record::new()
            .with("id", Value::String(id.into()))
            .with("caller_program", Value::Pubkey(self.caller))
            .with("provider", Value::String("openai".into()))
            .with("model_id", Value::String("gpt-4".into()))
            .with(
                "callback_accounts",
                Value::List(callbacks.iter().map(|(key, _)| Value::Pubkey(*key)).collect()),
            )
            .with(
                "callback_writable",
                Value::List(callbacks.iter().map(|(_, w)| Value::Bool(*w)).collect()),
            )
            .with("status", Value::Enum(status.into()))
            .with("created_at", Value::I64(1_700_000_000))
            .with("min_votes", Value::U8(1))
            .with("approval_threshold", Value::U8(100))
            .with(
                "winning_hash",
                Value::Option(Some(Box::new(Value::Bytes(answer_digest(ANSWER).to_vec())))),
            );

        let mut encoder = Encoder::new();
        encoder.write_raw(&self.schema.account_discriminator(REQUEST_ACCOUNT).unwrap());
        encoder.write_record(fields, &record, self.schema.types()).unwrap();

        let address = RequestAccount::address(id, &self.router).unwrap();
        self.ledger.put_account(address, encoder.into_inner());
        address
    }

    async fn deliver(&mut self, lines: Vec<String>) -> Vec<Action> {
        let batch = self.batch(lines);
        self.node.handle_batch(&batch).await;
        let mut scheduled = Vec::new();
        while let Ok(action) = self.actions.try_recv() {
            scheduled.push(action);
        }
        scheduled
    }

    /// Delivers RequestCreated for `id` and runs the resulting vote.
    async fn voted(&mut self, id: &str) {
        let line = self.created(id);
        let actions = self.deliver(vec![line]).await;
        assert_eq!(actions.len(), 1);
        let outcome = self.executor.run(actions[0].clone()).await.unwrap();
        assert!(matches!(outcome, ActionOutcome::Voted { .. }));
    }
}

/// Account keys referenced by the transaction's single instruction.
fn instruction_keys(tx: &Transaction) -> Vec<Pubkey> {
    let message = &tx.message;
    message.instructions[0]
        .accounts
        .iter()
        .map(|index| message.account_keys[usize::from(*index)])
        .collect()
}

#[tokio::test]
async fn request_created_schedules_one_vote_with_answer_digest() {
    let mut h = harness();
    let line = h.created("r1");
    let actions = h.deliver(vec![line]).await;
    assert_eq!(actions, vec![Action::SubmitVote { request_id: "r1".into() }]);

    let outcome = h.executor.run(actions[0].clone()).await.unwrap();
    assert!(matches!(outcome, ActionOutcome::Voted { .. }));

    let sent = h.ledger.sent();
    assert_eq!(sent.len(), 1);
    let data = &sent[0].message.instructions[0].data;
    assert_eq!(&data[..8], &[115, 242, 100, 0, 49, 178, 242, 133]);

    let mut decoder = Decoder::new(&data[8..]);
    assert_eq!(decoder.read_string().unwrap(), "r1");
    assert_eq!(decoder.read_fixed::<32>().unwrap(), answer_digest(ANSWER));

    let workflow = h.tracker.get("r1").await.unwrap();
    assert_eq!(workflow.candidate.unwrap().digest, answer_digest(ANSWER));
    assert_eq!(sent[0].message.account_keys[0], h.identity);
}

#[tokio::test]
async fn duplicate_creation_does_not_vote_twice() {
    let mut h = harness();
    let line = h.created("r1");
    let actions = h.deliver(vec![line.clone(), line]).await;
    assert_eq!(actions.len(), 1);
}

#[tokio::test]
async fn mismatched_winning_digest_never_fulfills() {
    let mut h = harness();
    h.voted("r1").await;
    h.put_request_account("r1", "VotingCompleted", &[]);

    let line = h.voting_completed("r1", [0xab; 32], 1);
    let actions = h.deliver(vec![line]).await;
    assert_eq!(actions.len(), 1);

    let outcome = h.executor.run(actions[0].clone()).await.unwrap();
    assert_eq!(outcome, ActionOutcome::Abstained(AbstainReason::DigestMismatch));
    assert_eq!(h.ledger.sent().len(), 1);
}

#[tokio::test]
async fn single_voter_always_fulfills_with_callbacks() {
    let mut h = harness();
    h.voted("r1").await;
    let writable = Pubkey::new([5; 32]);
    let readonly = Pubkey::new([6; 32]);
    let request = h.put_request_account("r1", "VotingCompleted", &[(writable, true), (readonly, false)]);

    let line = h.voting_completed("r1", answer_digest(ANSWER), 1);
    let actions = h.deliver(vec![line]).await;
    let outcome = h.executor.run(actions[0].clone()).await.unwrap();
    assert!(matches!(outcome, ActionOutcome::Fulfilled { .. }));

    let sent = h.ledger.sent();
    assert_eq!(sent.len(), 2);
    let fulfill = &sent[1];
    assert_eq!(&fulfill.message.instructions[0].data[..8], &[5, 72, 5, 37, 184, 185, 63, 123]);
    assert_eq!(
        instruction_keys(fulfill),
        vec![request, h.identity, h.caller, writable, readonly]
    );

    let mut decoder = Decoder::new(&fulfill.message.instructions[0].data[8..]);
    assert_eq!(decoder.read_bytes().unwrap(), ANSWER.as_bytes());
}

#[tokio::test]
async fn already_fulfilled_request_is_skipped() {
    let mut h = harness();
    h.voted("r1").await;
    h.put_request_account("r1", "Fulfilled", &[]);

    let line = h.voting_completed("r1", answer_digest(ANSWER), 1);
    let actions = h.deliver(vec![line]).await;
    let outcome = h.executor.run(actions[0].clone()).await.unwrap();
    assert_eq!(outcome, ActionOutcome::Skipped(SkipReason::AlreadyFulfilled));
    assert_eq!(h.ledger.sent().len(), 1);
}

#[tokio::test]
async fn missing_request_account_is_contained() {
    let mut h = harness();
    h.voted("r1").await;

    let line = h.voting_completed("r1", answer_digest(ANSWER), 1);
    let actions = h.deliver(vec![line]).await;
    assert!(matches!(
        h.executor.run(actions[0].clone()).await,
        Err(OracleError::AccountNotFound(_))
    ));
    assert_eq!(h.executor.execute(actions[0].clone()).await, None);
}

#[tokio::test]
async fn unknown_ids_are_safe_no_ops() {
    let mut h = harness();
    let lines = vec![h.fulfilled("ghost"), h.voting_completed("ghost", [1; 32], 3)];
    assert!(h.deliver(lines).await.is_empty());
    assert!(h.tracker.is_empty().await);
}

#[tokio::test]
async fn fulfillment_event_ends_the_workflow() {
    let mut h = harness();
    let line = h.created("r1");
    let actions = h.deliver(vec![line]).await;

    let line = h.fulfilled("r1");
    assert!(h.deliver(vec![line]).await.is_empty());
    assert!(h.tracker.get("r1").await.is_none());

    let outcome = h.executor.run(actions[0].clone()).await.unwrap();
    assert_eq!(outcome, ActionOutcome::Skipped(SkipReason::NotTracked));
    assert!(h.ledger.sent().is_empty());
}

#[tokio::test]
async fn undecodable_event_does_not_abort_the_batch() {
    let mut h = harness();
    let full = h.created("r2");
    let payload = BASE64.decode(full.trim_start_matches(PROGRAM_DATA_PREFIX)).unwrap();
    let truncated = format!("{PROGRAM_DATA_PREFIX}{}", BASE64.encode(&payload[..payload.len() - 5]));

    let actions = h.deliver(vec![truncated, full]).await;
    assert_eq!(actions, vec![Action::SubmitVote { request_id: "r2".into() }]);
}

#[tokio::test]
async fn failed_transactions_are_ignored() {
    let h = harness();
    let mut batch = h.batch(vec![h.created("r1")]);
    batch.failed = true;
    assert_eq!(h.node.handle_batch(&batch).await, 0);
    assert!(h.tracker.is_empty().await);
}

#[tokio::test]
async fn fulfillment_delay_does_not_hold_back_new_votes() {
    let mut h = harness_with_delay(Duration::from_secs(30));
    let completed = ["a", "b", "c", "d"];
    for id in completed {
        h.voted(id).await;
    }

    let lines: Vec<String> = completed
        .iter()
        .map(|id| h.voting_completed(id, answer_digest(ANSWER), 1))
        .collect();
    let mut scheduled = h.deliver(lines).await;
    assert_eq!(scheduled.len(), 4);
    let line = h.created("fresh");
    scheduled.extend(h.deliver(vec![line]).await);

    let Harness { executor, ledger, .. } = h;
    let (tx, rx) = mpsc::channel(16);
    for action in scheduled {
        tx.send(action).await.unwrap();
    }
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = tokio::spawn(run_worker(Arc::new(executor), rx, 4, shutdown_rx));

    let vote_landed = tokio::time::timeout(Duration::from_secs(5), async {
        while ledger.sent().len() < completed.len() + 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(vote_landed.is_ok(), "vote for a new request waited behind delayed fulfillments");

    shutdown_tx.send(true).unwrap();
    worker.await.unwrap();
}
