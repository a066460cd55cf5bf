use desk_core::merge::merge_slices;
use desk_core::record::{Record, RecordKind};
use desk_storage::{SeedStore, SliceStore};
use std::sync::Arc;
use tracing::warn;

/// Resolves the current per-partition record view from the immutable seed
/// and the injected durable store. The resolve path never fails: a corrupt
/// or unreadable local slice degrades to seed-only so rendering is never
/// blocked.
pub struct MergeEngine {
    seed: SeedStore,
    store: Arc<dyn SliceStore>,
}

impl MergeEngine {
    pub fn new(seed: SeedStore, store: Arc<dyn SliceStore>) -> Self {
        Self { seed, store }
    }

    pub fn store(&self) -> &Arc<dyn SliceStore> {
        &self.store
    }

    pub fn seed(&self) -> &SeedStore {
        &self.seed
    }

    /// Seed slice first, local overlay by id (local wins), local-only
    /// records appended. Two entries never share an id.
    pub fn resolve(&self, kind: RecordKind, partition: &str) -> Vec<Record> {
        let seed_slice = self.seed.slice(kind, partition);
        match self.store.load_slice(kind, partition) {
            Ok(local) => merge_slices(seed_slice, &local),
            Err(err) => {
                warn!(
                    event = "local_slice_unreadable",
                    kind = %kind,
                    partition = %partition,
                    error = %err,
                );
                merge_slices(seed_slice, &[])
            }
        }
    }

    /// Every partition holding records of `kind`, seed and store combined.
    /// A store that cannot list its partitions degrades to the seed's list.
    pub fn partitions(&self, kind: RecordKind) -> Vec<String> {
        let mut keys: Vec<String> = self
            .seed
            .partitions(kind)
            .into_iter()
            .map(str::to_string)
            .collect();
        match self.store.partitions(kind) {
            Ok(stored) => keys.extend(stored),
            Err(err) => {
                warn!(event = "partition_list_unreadable", kind = %kind, error = %err);
            }
        }
        keys.sort();
        keys.dedup();
        keys
    }

    /// Cross-partition resolve backing the support-side view: every client
    /// and guest slice of `kind`, each merged under the usual rules,
    /// concatenated in partition order.
    pub fn resolve_all(&self, kind: RecordKind) -> Vec<Record> {
        let mut records = Vec::new();
        for partition in self.partitions(kind) {
            records.extend(self.resolve(kind, &partition));
        }
        records
    }

    /// Looks up one record in the merged view.
    pub fn find(&self, kind: RecordKind, partition: &str, id: &str) -> Option<Record> {
        self.resolve(kind, partition)
            .into_iter()
            .find(|record| record.id == id)
    }
}
