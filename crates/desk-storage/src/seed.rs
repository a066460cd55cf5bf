use crate::StorageError;
use desk_core::record::{Record, RecordKind};
use serde::Deserialize;
use std::collections::HashMap;

const BUILTIN_SEED: &str = include_str!("../data/seed.json");

#[derive(Debug, Deserialize)]
struct SeedSlice {
    kind: RecordKind,
    partition: String,
    records: Vec<Record>,
}

/// The immutable default dataset shipped with the application. Fixed at
/// build time; the floor every merge falls back to when the durable store
/// has nothing (or nothing readable) for a partition.
#[derive(Debug, Clone)]
pub struct SeedStore {
    slices: HashMap<(RecordKind, String), Vec<Record>>,
}

impl SeedStore {
    /// Loads the dataset embedded in the binary.
    pub fn builtin() -> Result<Self, StorageError> {
        Self::from_json(BUILTIN_SEED)
    }

    pub fn from_json(raw: &str) -> Result<Self, StorageError> {
        let parsed: Vec<SeedSlice> = serde_json::from_str(raw)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        let mut slices = HashMap::new();
        for slice in parsed {
            slices.insert((slice.kind, slice.partition), slice.records);
        }
        Ok(Self { slices })
    }

    /// Empty seed, for tests that want full control of the dataset.
    pub fn empty() -> Self {
        Self {
            slices: HashMap::new(),
        }
    }

    /// Builds a seed from explicit slices instead of the embedded dataset.
    pub fn from_slices(
        slices: impl IntoIterator<Item = (RecordKind, String, Vec<Record>)>,
    ) -> Self {
        Self {
            slices: slices
                .into_iter()
                .map(|(kind, partition, records)| ((kind, partition), records))
                .collect(),
        }
    }

    pub fn slice(&self, kind: RecordKind, partition: &str) -> &[Record] {
        self.slices
            .get(&(kind, partition.to_string()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn partitions(&self, kind: RecordKind) -> Vec<&str> {
        let mut partitions: Vec<&str> = self
            .slices
            .keys()
            .filter(|(slice_kind, _)| *slice_kind == kind)
            .map(|(_, partition)| partition.as_str())
            .collect();
        partitions.sort();
        partitions
    }
}
