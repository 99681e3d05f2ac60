use std::collections::HashMap;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use tracing::{debug, trace, warn};

use super::LogBatch;
use crate::error::Result;
use crate::models::{EventKind, NodeEvent, Pubkey};
use crate::schema::{Discriminator, RecordDef, Schema};

/// Log line prefix carrying a base64 event payload.
pub const PROGRAM_DATA_PREFIX: &str = "Program data: ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchedEvent {
    pub program: Pubkey,
    pub slot: u64,
    pub signature: String,
    pub event: NodeEvent,
}

#[derive(Debug, Clone)]
struct Route {
    kind: EventKind,
    event: RecordDef,
}

#[derive(Debug, Clone)]
struct ProgramRoutes {
    schema: Arc<Schema>,
    routes: Vec<Route>,
}

impl ProgramRoutes {
    fn route(&self, tag: &[u8]) -> Option<&Route> {
        self.routes
            .iter()
            .find(|route| route.event.discriminator.as_slice() == tag)
    }
}

/// Routes event payloads found in program logs by their discriminator
#[derive(Debug, Clone, Default)]
pub struct EventDispatcher {
    programs: HashMap<Pubkey, ProgramRoutes>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every event of `schema` this node understands. Returns the
    /// number of routes added.
    pub fn register_program(&mut self, program: Pubkey, schema: Arc<Schema>) -> usize {
        let routes: Vec<Route> = EventKind::ALL
            .iter()
            .filter_map(|kind| {
                schema.event(kind.name()).map(|event| Route {
                    kind: *kind,
                    event: event.clone(),
                })
            })
            .collect();

        for route in &routes {
            debug!(
                %program,
                event = route.kind.name(),
                discriminator = %hex::encode(route.event.discriminator),
                "registered event route"
            );
        }

        let count = routes.len();
        self.programs.insert(program, ProgramRoutes { schema, routes });
        count
    }

    pub fn programs(&self) -> Vec<Pubkey> {
        self.programs.keys().copied().collect()
    }

    pub fn discriminator(&self, program: &Pubkey, kind: EventKind) -> Option<Discriminator> {
        self.programs.get(program).and_then(|routes| {
            routes
                .routes
                .iter()
                .find(|route| route.kind == kind)
                .map(|route| route.event.discriminator)
        })
    }

    /// Extracts every recognised event emitted by `batch.program`.
    ///
    /// Failed transactions are skipped. Undecodable payloads are logged and
    /// dropped without affecting the rest of the batch.
    pub fn dispatch(&self, batch: &LogBatch) -> Vec<DispatchedEvent> {
        if batch.failed {
            trace!(signature = %batch.signature, "skipping failed transaction");
            return Vec::new();
        }
        let Some(routes) = self.programs.get(&batch.program) else {
            return Vec::new();
        };

        let mut events = Vec::new();
        for payload in program_payloads(batch) {
            let Ok(data) = BASE64.decode(payload) else {
                debug!(signature = %batch.signature, "ignoring non-base64 program data");
                continue;
            };
            if data.len() < 8 {
                continue;
            }
            let (tag, body) = data.split_at(8);
            let Some(route) = routes.route(tag) else {
                trace!(discriminator = %hex::encode(tag), "unrecognised event");
                continue;
            };

            match decode(&routes.schema, route, body) {
                Ok(event) => events.push(DispatchedEvent {
                    program: batch.program,
                    slot: batch.slot,
                    signature: batch.signature.clone(),
                    event,
                }),
                Err(err) => warn!(
                    error = %err,
                    event = route.kind.name(),
                    signature = %batch.signature,
                    slot = batch.slot,
                    "dropping undecodable event"
                ),
            }
        }
        events
    }
}

fn decode(schema: &Schema, route: &Route, body: &[u8]) -> Result<NodeEvent> {
    let record = schema.decode_event(&route.event, body)?;
    route.kind.parse(&record)
}

/// Payloads of `Program data:` lines written while `batch.program` was the
/// executing program. The invoke stack is rebuilt from the log so that events
/// of other programs in the same transaction (e.g. a CPI caller that is also
/// monitored) are not attributed twice.
fn program_payloads(batch: &LogBatch) -> Vec<&str> {
    let mut stack: Vec<Option<Pubkey>> = Vec::new();
    let mut payloads = Vec::new();

    for line in &batch.logs {
        if let Some(payload) = line.strip_prefix(PROGRAM_DATA_PREFIX) {
            let current = stack.last().copied().unwrap_or(Some(batch.program));
            if current == Some(batch.program) {
                if let Some(first) = payload.split_whitespace().next() {
                    payloads.push(first);
                }
            }
            continue;
        }

        let Some(rest) = line.strip_prefix("Program ") else {
            continue;
        };
        let mut parts = rest.split_whitespace();
        let (Some(id), Some(verb)) = (parts.next(), parts.next()) else {
            continue;
        };
        if verb == "invoke" {
            stack.push(id.parse().ok());
        } else if verb == "success" || verb.starts_with("failed") {
            stack.pop();
        }
    }
    payloads
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Encoder;

    const SCHEMA: &str = r#"{
        "events": [
            { "name": "RequestFulfilled" },
            { "name": "VotingCompleted" }
        ],
        "types": [
            { "name": "RequestFulfilled", "type": { "kind": "struct", "fields": [
                { "name": "request_id", "type": "string" },
                { "name": "response_length", "type": "u64" }
            ] } }
        ]
    }"#;

    fn dispatcher(program: Pubkey) -> EventDispatcher {
        let mut dispatcher = EventDispatcher::new();
        let schema = Arc::new(Schema::from_json("router", SCHEMA).unwrap());
        assert_eq!(dispatcher.register_program(program, schema), 2);
        dispatcher
    }

    fn fulfilled_line(dispatcher: &EventDispatcher, program: &Pubkey, id: &str) -> String {
        let mut encoder = Encoder::new();
        encoder.write_raw(
            &dispatcher
                .discriminator(program, EventKind::RequestFulfilled)
                .unwrap(),
        );
        encoder.write_string(id).unwrap();
        encoder.write_u64(12);
        format!("{PROGRAM_DATA_PREFIX}{}", BASE64.encode(encoder.into_inner()))
    }

    fn batch(program: Pubkey, logs: Vec<String>) -> LogBatch {
        LogBatch {
            program,
            slot: 7,
            signature: "sig".into(),
            failed: false,
            logs,
        }
    }

    #[test]
    fn routes_by_discriminator() {
        let program = Pubkey::new([1; 32]);
        let dispatcher = dispatcher(program);
        let logs = vec![
            format!("Program {program} invoke [1]"),
            "Program log: Request fulfilled: r1".to_string(),
            fulfilled_line(&dispatcher, &program, "r1"),
            format!("Program {program} success"),
        ];

        let events = dispatcher.dispatch(&batch(program, logs));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].slot, 7);
        assert_eq!(events[0].event.request_id(), "r1");
    }

    #[test]
    fn skips_failed_short_unknown_and_missing_layouts() {
        let program = Pubkey::new([1; 32]);
        let dispatcher = dispatcher(program);

        let mut failed = batch(program, vec![fulfilled_line(&dispatcher, &program, "r1")]);
        failed.failed = true;
        assert!(dispatcher.dispatch(&failed).is_empty());

        let voting = dispatcher
            .discriminator(&program, EventKind::VotingCompleted)
            .unwrap();
        let logs = vec![
            format!("{PROGRAM_DATA_PREFIX}{}", BASE64.encode([1, 2, 3])),
            format!("{PROGRAM_DATA_PREFIX}{}", BASE64.encode([9u8; 12])),
            format!("{PROGRAM_DATA_PREFIX}!!not base64!!"),
            // VotingCompleted has no field list in this schema.
            format!("{PROGRAM_DATA_PREFIX}{}", BASE64.encode(voting)),
            fulfilled_line(&dispatcher, &program, "r2"),
        ];
        let events = dispatcher.dispatch(&batch(program, logs));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.request_id(), "r2");
    }

    #[test]
    fn truncated_payload_does_not_abort_batch() {
        let program = Pubkey::new([1; 32]);
        let dispatcher = dispatcher(program);
        let full = fulfilled_line(&dispatcher, &program, "r1");
        let raw = BASE64.decode(full.trim_start_matches(PROGRAM_DATA_PREFIX)).unwrap();
        let truncated = format!("{PROGRAM_DATA_PREFIX}{}", BASE64.encode(&raw[..raw.len() - 3]));

        let events = dispatcher.dispatch(&batch(program, vec![truncated, full]));
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn ignores_data_emitted_by_other_programs() {
        let router = Pubkey::new([1; 32]);
        let consumer = Pubkey::new([2; 32]);
        let dispatcher = dispatcher(router);
        let line = fulfilled_line(&dispatcher, &router, "r1");

        let logs = vec![
            format!("Program {consumer} invoke [1]"),
            line.clone(),
            format!("Program {router} invoke [2]"),
            line,
            format!("Program {router} success"),
            format!("Program {consumer} success"),
        ];
        assert_eq!(dispatcher.dispatch(&batch(router, logs)).len(), 1);
    }

    #[test]
    fn unknown_program_yields_nothing() {
        let dispatcher = dispatcher(Pubkey::new([1; 32]));
        let other = Pubkey::new([3; 32]);
        assert!(dispatcher.dispatch(&batch(other, vec![])).is_empty());
    }
}
