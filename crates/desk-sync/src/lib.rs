pub mod engine;
pub mod read_state;
pub mod reconcile;
pub mod transport;
pub mod writer;

use thiserror::Error;

pub use engine::MergeEngine;
pub use read_state::ReadStateTracker;
pub use reconcile::{RecordNotice, ReconcileConfig, ReconcileLoop, ViewUpdate};
pub use transport::{LiveTransport, TransportConfig, TransportState};
pub use writer::RecordWriter;

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{DateTime, TimeZone, Utc};
    use desk_core::record::{Message, Priority, Record, RecordKind, RecordStatus, Sender};
    use desk_storage::SeedStore;

    pub fn ts(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 3, 12, minute, 0)
            .single()
            .expect("valid timestamp")
    }

    pub fn ticket(id: &str, minute: u32) -> Record {
        Record {
            id: id.to_string(),
            partition_key: "client:acme".to_string(),
            kind: RecordKind::Ticket,
            subject: format!("subject {id}"),
            preview: String::new(),
            thread: Vec::new(),
            status: RecordStatus::Open,
            priority: Some(Priority::Low),
            is_read: Some(false),
            tags: Vec::new(),
            assigned_to: None,
            origin_instance: None,
            created_at: ts(minute),
            updated_at: ts(minute),
            extra: Default::default(),
        }
    }

    pub fn chat_message(minute: u32) -> Message {
        Message {
            id: format!("msg-{minute}"),
            from: Sender {
                name: "Laura".to_string(),
                email: "laura@acme.example".to_string(),
                support: false,
            },
            content: "mensagem".to_string(),
            created_at: ts(minute),
        }
    }

    pub fn seed_with(records: Vec<Record>) -> SeedStore {
        SeedStore::from_slices([(
            RecordKind::Ticket,
            "client:acme".to_string(),
            records,
        )])
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("storage error: {0}")]
    Storage(#[from] desk_storage::StorageError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("record not found: {0}")]
    RecordNotFound(String),
    #[error("invalid relay url: {0}")]
    InvalidRelayUrl(String),
}
