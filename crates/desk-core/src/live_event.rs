use crate::record::Record;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: &str = "1";

/// The four events the live channel carries. Any bidirectional pub/sub
/// transport that moves these frames is a valid relay; nothing here is
/// durable or ordered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum LiveEvent {
    JoinPartition { key: String },
    RecordCreated(Record),
    RecordUpdated(Record),
    InboxSnapshot(Vec<Record>),
}

impl LiveEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LiveEvent::JoinPartition { .. } => "join-partition",
            LiveEvent::RecordCreated(_) => "record-created",
            LiveEvent::RecordUpdated(_) => "record-updated",
            LiveEvent::InboxSnapshot(_) => "inbox-snapshot",
        }
    }
}

/// Wire envelope around a [`LiveEvent`]. `sender_id` is the emitting
/// instance, never a user identity; receivers use it to skip their own
/// echoes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub version: String,
    pub sender_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: LiveEvent,
}

impl Envelope {
    pub fn new(sender_id: impl Into<String>, event: LiveEvent) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            sender_id: sender_id.into(),
            timestamp: Utc::now(),
            event,
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_event_round_trips() {
        let envelope = Envelope::new("inst-1", LiveEvent::JoinPartition {
            key: "client:acme".to_string(),
        });
        let raw = envelope.encode().expect("encode");
        assert!(raw.contains("\"event\":\"join-partition\""));
        let decoded = Envelope::decode(&raw).expect("decode");
        assert_eq!(decoded.event.name(), "join-partition");
        assert_eq!(decoded.sender_id, "inst-1");
    }

    #[test]
    fn malformed_frame_is_an_error_not_a_panic() {
        assert!(Envelope::decode("{\"event\":\"record-created\"}").is_err());
        assert!(Envelope::decode("not json").is_err());
    }
}
