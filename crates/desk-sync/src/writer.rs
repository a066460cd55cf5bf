use crate::engine::MergeEngine;
use crate::SyncError;
use chrono::Utc;
use desk_core::record::{Message, Record, RecordKind, RecordStatus, Sender};
use desk_core::triage;
use desk_storage::{SliceStore, WriteOutcome};
use std::sync::Arc;
use tracing::{debug, info};

/// All record mutations funnel through here: resolve the merged slice,
/// apply the change to a full record, overwrite the whole slice. Collaborators
/// never patch individual fields behind the engine's back. The durable write
/// always happens before any transport emit, so transport availability never
/// affects correctness.
pub struct RecordWriter {
    engine: Arc<MergeEngine>,
    instance_id: String,
}

impl RecordWriter {
    pub fn new(engine: Arc<MergeEngine>, instance_id: impl Into<String>) -> Self {
        Self {
            engine,
            instance_id: instance_id.into(),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Creates a ticket; the triage classifier assigns its priority here,
    /// once, from the free text.
    pub fn create_ticket(
        &self,
        partition: &str,
        subject: &str,
        description: &str,
        author: Sender,
    ) -> Result<Record, SyncError> {
        let priority = triage::classify(subject, description);
        let record = Record::new_ticket(
            partition,
            subject,
            description,
            priority,
            author,
            self.instance_id.clone(),
            Utc::now(),
        );
        info!(
            event = "ticket_created",
            id = %record.id,
            partition = %partition,
            priority = %priority,
        );
        self.commit(RecordKind::Ticket, partition, record.clone())?;
        Ok(record)
    }

    /// Appends a message to an existing record's thread.
    pub fn append_message(
        &self,
        kind: RecordKind,
        partition: &str,
        id: &str,
        message: Message,
    ) -> Result<Record, SyncError> {
        self.mutate(kind, partition, id, |record| {
            record.append_message(message);
        })
    }

    /// Explicit human status change.
    pub fn set_status(
        &self,
        kind: RecordKind,
        partition: &str,
        id: &str,
        status: RecordStatus,
    ) -> Result<Record, SyncError> {
        self.mutate(kind, partition, id, |record| {
            record.status = status;
            record.touch(Utc::now());
        })
    }

    /// Full-record update from a collaborator (tag editor, assignment
    /// widget). The caller hands back a complete record; partial writes
    /// bypassing the merge engine do not exist.
    pub fn update_record(
        &self,
        kind: RecordKind,
        partition: &str,
        record: Record,
    ) -> Result<Record, SyncError> {
        let id = record.id.clone();
        let mut updated = record;
        updated.touch(Utc::now());
        self.mutate(kind, partition, &id, |existing| {
            *existing = updated.clone();
        })
    }

    /// Applies a record received from the live transport. Shaped exactly
    /// like a local mutation so downstream consumers cannot tell the two
    /// apart. A remote copy that is not strictly newer than what this
    /// instance already has is ignored; the transport is never authoritative.
    pub fn apply_remote(
        &self,
        kind: RecordKind,
        partition: &str,
        record: Record,
    ) -> Result<bool, SyncError> {
        let merged = self.engine.resolve(kind, partition);
        if let Some(existing) = merged.iter().find(|candidate| candidate.id == record.id) {
            if record.updated_at <= existing.updated_at {
                debug!(
                    event = "remote_record_stale",
                    id = %record.id,
                    partition = %partition,
                );
                return Ok(false);
            }
        }
        let outcome = self.commit_into(kind, partition, merged, record)?;
        Ok(outcome == WriteOutcome::Applied)
    }

    fn mutate(
        &self,
        kind: RecordKind,
        partition: &str,
        id: &str,
        apply: impl FnOnce(&mut Record),
    ) -> Result<Record, SyncError> {
        let mut merged = self.engine.resolve(kind, partition);
        let record = merged
            .iter_mut()
            .find(|record| record.id == id)
            .ok_or_else(|| SyncError::RecordNotFound(id.to_string()))?;
        apply(record);
        let updated = record.clone();
        let outcome = self.engine.store().write_records(kind, partition, &merged)?;
        if outcome == WriteOutcome::StaleDiscarded {
            debug!(event = "slice_write_lost", id = %updated.id, partition = %partition);
        }
        Ok(updated)
    }

    fn commit(
        &self,
        kind: RecordKind,
        partition: &str,
        record: Record,
    ) -> Result<WriteOutcome, SyncError> {
        let merged = self.engine.resolve(kind, partition);
        self.commit_into(kind, partition, merged, record)
    }

    fn commit_into(
        &self,
        kind: RecordKind,
        partition: &str,
        mut merged: Vec<Record>,
        record: Record,
    ) -> Result<WriteOutcome, SyncError> {
        let id = record.id.clone();
        match merged.iter_mut().find(|existing| existing.id == record.id) {
            Some(slot) => *slot = record,
            None => merged.push(record),
        }
        let outcome = self.engine.store().write_records(kind, partition, &merged)?;
        if outcome == WriteOutcome::StaleDiscarded {
            debug!(event = "slice_write_lost", id = %id, partition = %partition);
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{chat_message, seed_with, ticket, ts};
    use desk_core::record::Priority;
    use desk_storage::MemoryStore;

    const PARTITION: &str = "client:acme";

    fn writer_with(seed: Vec<Record>) -> (RecordWriter, Arc<MergeEngine>) {
        let engine = Arc::new(MergeEngine::new(
            seed_with(seed),
            Arc::new(MemoryStore::new()),
        ));
        (RecordWriter::new(engine.clone(), "inst-a"), engine)
    }

    fn author() -> Sender {
        Sender {
            name: "Laura".to_string(),
            email: "laura@acme.example".to_string(),
            support: false,
        }
    }

    #[test]
    fn create_ticket_triages_and_persists() {
        let (writer, engine) = writer_with(Vec::new());
        let record = writer
            .create_ticket(PARTITION, "Sistema caiu", "erro crítico no checkout", author())
            .expect("create");
        assert_eq!(record.priority, Some(Priority::High));
        assert_eq!(record.origin_instance.as_deref(), Some("inst-a"));

        let resolved = engine.resolve(RecordKind::Ticket, PARTITION);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].id, record.id);
    }

    #[test]
    fn append_message_only_grows_the_thread() {
        let (writer, engine) = writer_with(vec![ticket("tic-1", 0)]);
        writer
            .append_message(RecordKind::Ticket, PARTITION, "tic-1", chat_message(1))
            .expect("first append");
        writer
            .append_message(RecordKind::Ticket, PARTITION, "tic-1", chat_message(2))
            .expect("second append");

        let record = engine
            .find(RecordKind::Ticket, PARTITION, "tic-1")
            .expect("record");
        assert_eq!(record.thread.len(), 2);
        assert_eq!(record.updated_at, ts(2));
    }

    #[test]
    fn stale_remote_copy_is_ignored() {
        let (writer, engine) = writer_with(vec![ticket("tic-1", 5)]);

        let stale = ticket("tic-1", 2);
        assert!(!writer
            .apply_remote(RecordKind::Ticket, PARTITION, stale)
            .expect("stale apply"));

        let mut fresh = ticket("tic-1", 9);
        fresh.status = RecordStatus::InProgress;
        assert!(writer
            .apply_remote(RecordKind::Ticket, PARTITION, fresh)
            .expect("fresh apply"));

        let record = engine
            .find(RecordKind::Ticket, PARTITION, "tic-1")
            .expect("record");
        assert_eq!(record.status, RecordStatus::InProgress);
    }

    #[test]
    fn losing_the_store_race_surfaces_as_not_applied() {
        use chrono::TimeZone;
        use desk_storage::SliceStore;

        let (writer, engine) = writer_with(vec![ticket("tic-1", 0)]);
        let payload = serde_json::to_string(&vec![ticket("tic-1", 0)]).expect("payload");
        let ahead = chrono::Utc
            .with_ymd_and_hms(2099, 1, 1, 0, 0, 0)
            .single()
            .expect("valid timestamp");
        engine
            .store()
            .write_slice(RecordKind::Ticket, PARTITION, &payload, ahead)
            .expect("competing write");

        // Newer than the record it replaces, older than the slice stamp:
        // the compare-and-swap discards it and the caller hears so.
        assert!(!writer
            .apply_remote(RecordKind::Ticket, PARTITION, ticket("tic-1", 9))
            .expect("apply"));
    }

    #[test]
    fn remote_create_lands_like_a_local_write() {
        let (writer, engine) = writer_with(Vec::new());
        let mut incoming = ticket("tic-remote", 3);
        incoming.origin_instance = Some("inst-b".to_string());

        assert!(writer
            .apply_remote(RecordKind::Ticket, PARTITION, incoming)
            .expect("apply"));
        let resolved = engine.resolve(RecordKind::Ticket, PARTITION);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].origin_instance.as_deref(), Some("inst-b"));
    }

    #[test]
    fn update_record_replaces_the_full_record() {
        let (writer, engine) = writer_with(vec![ticket("tic-1", 0)]);
        let mut edited = engine
            .find(RecordKind::Ticket, PARTITION, "tic-1")
            .expect("record");
        edited.tags = vec!["billing".to_string()];
        edited.status = RecordStatus::Pending;

        writer
            .update_record(RecordKind::Ticket, PARTITION, edited)
            .expect("update");

        let stored = engine
            .find(RecordKind::Ticket, PARTITION, "tic-1")
            .expect("record");
        assert_eq!(stored.tags, vec!["billing".to_string()]);
        assert_eq!(stored.status, RecordStatus::Pending);
    }
}
