//! Typed views over decoded program events

use crate::codec::Record;
use crate::error::Result;

use super::{Digest32, Message, Pubkey};

/// Event kinds this node reacts to, keyed by their schema name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    RequestCreated,
    VotingCompleted,
    RequestFulfilled,
    ResponseReceived,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::RequestCreated,
        EventKind::VotingCompleted,
        EventKind::RequestFulfilled,
        EventKind::ResponseReceived,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::RequestCreated => "RequestCreated",
            Self::VotingCompleted => "VotingCompleted",
            Self::RequestFulfilled => "RequestFulfilled",
            Self::ResponseReceived => "ResponseReceived",
        }
    }

    pub fn parse(self, record: &Record) -> Result<NodeEvent> {
        Ok(match self {
            Self::RequestCreated => NodeEvent::RequestCreated(RequestCreated::from_record(record)?),
            Self::VotingCompleted => NodeEvent::VotingCompleted(VotingCompleted::from_record(record)?),
            Self::RequestFulfilled => {
                NodeEvent::RequestFulfilled(RequestFulfilled::from_record(record)?)
            }
            Self::ResponseReceived => {
                NodeEvent::ResponseReceived(ResponseReceived::from_record(record)?)
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    RequestCreated(RequestCreated),
    VotingCompleted(VotingCompleted),
    RequestFulfilled(RequestFulfilled),
    ResponseReceived(ResponseReceived),
}

impl NodeEvent {
    pub fn request_id(&self) -> &str {
        match self {
            Self::RequestCreated(e) => &e.request_id,
            Self::VotingCompleted(e) => &e.request_id,
            Self::RequestFulfilled(e) => &e.request_id,
            Self::ResponseReceived(e) => &e.request_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestCreated {
    pub request_id: String,
    pub caller_program: Pubkey,
    pub provider: String,
    pub model_id: String,
    pub messages: Vec<Message>,
    pub min_votes: u8,
    pub approval_threshold: u8,
}

impl RequestCreated {
    pub fn from_record(record: &Record) -> Result<Self> {
        let messages = record
            .records("messages")?
            .into_iter()
            .map(|message| {
                Ok(Message {
                    role: message.str("role")?.to_string(),
                    content: message.str("content")?.to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            request_id: record.str("request_id")?.to_string(),
            caller_program: record.pubkey("caller_program")?,
            provider: optional_str(record, "provider")?,
            model_id: optional_str(record, "model_id")?,
            messages,
            min_votes: optional_u8(record, "min_votes", 1)?,
            approval_threshold: optional_u8(record, "approval_threshold", 100)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VotingCompleted {
    pub request_id: String,
    pub winning_digest: Digest32,
    pub vote_count: u64,
    pub total_votes: u64,
}

impl VotingCompleted {
    pub fn from_record(record: &Record) -> Result<Self> {
        let digest_field = if record.get("winning_hash").is_some() {
            "winning_hash"
        } else {
            "winning_digest"
        };
        Ok(Self {
            request_id: record.str("request_id")?.to_string(),
            winning_digest: record.digest(digest_field)?,
            vote_count: record.uint("vote_count")?,
            total_votes: record.uint("total_votes")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFulfilled {
    pub request_id: String,
    pub response_length: u64,
}

impl RequestFulfilled {
    pub fn from_record(record: &Record) -> Result<Self> {
        Ok(Self {
            request_id: record.str("request_id")?.to_string(),
            response_length: record.uint("response_length")?,
        })
    }
}

/// Emitted by a consumer program once its callback stored a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseReceived {
    pub request_id: String,
    pub response_preview: String,
}

impl ResponseReceived {
    pub fn from_record(record: &Record) -> Result<Self> {
        Ok(Self {
            request_id: record.str("request_id")?.to_string(),
            response_preview: optional_str(record, "response_preview")?,
        })
    }
}

fn optional_str(record: &Record, name: &str) -> Result<String> {
    match record.get(name) {
        Some(_) => Ok(record.str(name)?.to_string()),
        None => Ok(String::new()),
    }
}

/// Consensus parameters are absent from older router builds.
fn optional_u8(record: &Record, name: &str, default: u8) -> Result<u8> {
    match record.get(name) {
        Some(_) => record.u8(name),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Value;

    #[test]
    fn request_created_from_camel_case_record() {
        let record = Record::new()
            .with("requestId", Value::String("r1".into()))
            .with("callerProgram", Value::Pubkey(Pubkey::new([1; 32])))
            .with(
                "messages",
                Value::List(vec![Value::Record(
                    Record::new()
                        .with("role", Value::String("user".into()))
                        .with("content", Value::String("hi".into())),
                )]),
            )
            .with("minVotes", Value::U8(1))
            .with("approvalThreshold", Value::U8(100));

        let event = RequestCreated::from_record(&record).unwrap();
        assert_eq!(event.request_id, "r1");
        assert_eq!(event.provider, "");
        assert_eq!(event.messages[0].content, "hi");
        assert_eq!(event.approval_threshold, 100);
    }

    #[test]
    fn consensus_parameters_default_when_absent() {
        let record = Record::new()
            .with("request_id", Value::String("r1".into()))
            .with("caller_program", Value::Pubkey(Pubkey::new([1; 32])))
            .with("messages", Value::List(vec![]));

        let event = RequestCreated::from_record(&record).unwrap();
        assert_eq!((event.min_votes, event.approval_threshold), (1, 100));
    }

    #[test]
    fn voting_completed_widens_counts() {
        let record = Record::new()
            .with("request_id", Value::String("r1".into()))
            .with("winning_hash", Value::Bytes(vec![7; 32]))
            .with("vote_count", Value::U8(3))
            .with("total_votes", Value::U32(20));

        let event = VotingCompleted::from_record(&record).unwrap();
        assert_eq!(event.winning_digest, [7; 32]);
        assert_eq!(event.total_votes, 20);
    }

    #[test]
    fn missing_field_is_an_error() {
        let record = Record::new().with("request_id", Value::String("r1".into()));
        assert!(RequestFulfilled::from_record(&record).is_err());
    }
}
