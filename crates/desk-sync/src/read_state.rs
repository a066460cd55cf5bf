use crate::engine::MergeEngine;
use crate::SyncError;
use chrono::Utc;
use desk_core::record::{Record, RecordKind};
use desk_storage::{SliceStore, WriteOutcome};
use std::sync::Arc;
use tracing::debug;

/// Flips and persists the read/unread flag and computes aggregate unread
/// counts for badges. Every flip writes the whole merged slice back to the
/// durable store, so a flag on a seed-originated record survives restarts;
/// the store's change signal fires as part of that write.
pub struct ReadStateTracker {
    engine: Arc<MergeEngine>,
}

impl ReadStateTracker {
    pub fn new(engine: Arc<MergeEngine>) -> Self {
        Self { engine }
    }

    /// Marks a record read. Idempotent: an already-read record is a no-op
    /// and no write-back happens. Returns the updated record when the flag
    /// flipped and the write stuck, `None` otherwise.
    pub fn mark_read(
        &self,
        kind: RecordKind,
        partition: &str,
        id: &str,
    ) -> Result<Option<Record>, SyncError> {
        self.set_read_flag(kind, partition, id, true)
    }

    /// Explicit manual unread. The engine itself never performs a
    /// `true -> false` transition; this is the human-action path.
    pub fn mark_unread(
        &self,
        kind: RecordKind,
        partition: &str,
        id: &str,
    ) -> Result<Option<Record>, SyncError> {
        self.set_read_flag(kind, partition, id, false)
    }

    /// Folds the merged view and counts unread records, applying the legacy
    /// fallback for tickets that never carried the flag.
    pub fn unread_count(&self, kind: RecordKind, partition: &str) -> usize {
        self.engine
            .resolve(kind, partition)
            .iter()
            .filter(|record| record.is_unread())
            .count()
    }

    fn set_read_flag(
        &self,
        kind: RecordKind,
        partition: &str,
        id: &str,
        read: bool,
    ) -> Result<Option<Record>, SyncError> {
        let mut merged = self.engine.resolve(kind, partition);
        let record = merged
            .iter_mut()
            .find(|record| record.id == id)
            .ok_or_else(|| SyncError::RecordNotFound(id.to_string()))?;

        if record.is_read == Some(read) {
            debug!(event = "read_flag_noop", id = %id, read = read);
            return Ok(None);
        }

        record.is_read = Some(read);
        record.touch(Utc::now());
        let updated = record.clone();

        // Whole-slice overwrite, never a per-record patch.
        match self.engine.store().write_records(kind, partition, &merged)? {
            WriteOutcome::Applied => Ok(Some(updated)),
            WriteOutcome::StaleDiscarded => {
                debug!(event = "read_flag_write_lost", id = %id, partition = %partition);
                Ok(None)
            }
        }
    }
}
