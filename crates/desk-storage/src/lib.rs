use chrono::{DateTime, SecondsFormat, Utc};
use desk_core::record::{Record, RecordKind};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

pub mod seed;
pub mod signal;

pub use seed::SeedStore;
pub use signal::ChangeSignal;

pub const SCHEMA_VERSION: i64 = 1;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("timestamp parse error: {0}")]
    Timestamp(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store lock poisoned")]
    LockPoisoned,
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
}

/// One durable slice: the full JSON array of records for a
/// `(kind, partition)` pair plus the slice-level write timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSlice {
    pub payload: String,
    pub updated_at: DateTime<Utc>,
}

/// Result of a slice write-back under the monotonic timestamp rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    /// The stored slice carried a newer timestamp; the write was dropped.
    /// Last-writer-wins by clock, not by call order.
    StaleDiscarded,
}

/// The injected store abstraction. The merge engine and read-state tracker
/// only ever see this trait; production wires in [`LocalStore`], tests an
/// in-memory [`MemoryStore`].
pub trait SliceStore: Send + Sync {
    fn read_slice(
        &self,
        kind: RecordKind,
        partition: &str,
    ) -> Result<Option<StoredSlice>, StorageError>;

    /// Whole-slice overwrite, applied only when `updated_at` is not older
    /// than the stored timestamp. Never a per-record patch.
    fn write_slice(
        &self,
        kind: RecordKind,
        partition: &str,
        payload: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<WriteOutcome, StorageError>;

    /// Every partition that holds a slice of `kind`, sorted. The
    /// support-side aggregate view iterates this.
    fn partitions(&self, kind: RecordKind) -> Result<Vec<String>, StorageError>;

    /// Decodes the slice payload into records. A corrupt payload surfaces as
    /// `Serialization`; callers on the render path are expected to treat
    /// that as seed-only, not as a failure.
    fn load_slice(
        &self,
        kind: RecordKind,
        partition: &str,
    ) -> Result<Vec<Record>, StorageError> {
        match self.read_slice(kind, partition)? {
            Some(slice) => serde_json::from_str(&slice.payload)
                .map_err(|err| StorageError::Serialization(err.to_string())),
            None => Ok(Vec::new()),
        }
    }

    /// Serializes and writes back a full record list for the slice, stamping
    /// it with the newest `updated_at` the list carries.
    fn write_records(
        &self,
        kind: RecordKind,
        partition: &str,
        records: &[Record],
    ) -> Result<WriteOutcome, StorageError> {
        let payload = serde_json::to_string(records)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        let updated_at = records
            .iter()
            .map(|record| record.updated_at)
            .max()
            .unwrap_or_else(Utc::now);
        self.write_slice(kind, partition, &payload, updated_at)
    }
}

/// Durable per-instance store backed by sqlite. One row per
/// `(kind, partition)` slice; schema versioned through `PRAGMA user_version`.
pub struct LocalStore {
    conn: Mutex<Connection>,
    signal: Option<ChangeSignal>,
}

impl LocalStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
            signal: None,
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
            signal: None,
        };
        store.migrate()?;
        Ok(store)
    }

    /// Attaches the sidecar change signal touched after every applied write.
    pub fn with_signal(mut self, signal: ChangeSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn signal(&self) -> Option<&ChangeSignal> {
        self.signal.as_ref()
    }

    pub fn schema_version(&self) -> Result<i64, StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::LockPoisoned)?;
        Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    fn migrate(&self) -> Result<(), StorageError> {
        let current = self.schema_version()?;
        if current > SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchemaVersion {
                found: current,
                supported: SCHEMA_VERSION,
            });
        }

        if current < 1 {
            let conn = self.conn.lock().map_err(|_| StorageError::LockPoisoned)?;
            let sql = include_str!("../migrations/0001_slices.sql");
            conn.execute_batch(sql)?;
            conn.execute("PRAGMA user_version = 1", []).map(|_| ())?;
        }

        Ok(())
    }

    /// Replaces a slice unconditionally. Test and repair paths only; the
    /// engine always goes through the compare-and-swap write.
    pub fn put_raw_slice(
        &self,
        kind: RecordKind,
        partition: &str,
        payload: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::LockPoisoned)?;
        conn.execute(
            "
            INSERT OR REPLACE INTO slices (kind, partition, payload, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ",
            params![
                kind.as_str(),
                partition,
                payload,
                format_timestamp(updated_at)
            ],
        )?;
        drop(conn);
        self.touch_signal();
        Ok(())
    }

    fn touch_signal(&self) {
        if let Some(signal) = &self.signal {
            if let Err(err) = signal.touch() {
                tracing::warn!(event = "signal_touch_failed", error = %err);
            }
        }
    }
}

impl SliceStore for LocalStore {
    fn read_slice(
        &self,
        kind: RecordKind,
        partition: &str,
    ) -> Result<Option<StoredSlice>, StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::LockPoisoned)?;
        let row = conn
            .query_row(
                "
                SELECT payload, updated_at
                FROM slices
                WHERE kind = ?1 AND partition = ?2
                ",
                params![kind.as_str(), partition],
                |row| {
                    let payload: String = row.get(0)?;
                    let updated_at: String = row.get(1)?;
                    Ok((payload, updated_at))
                },
            )
            .optional()?;

        match row {
            Some((payload, updated_at)) => Ok(Some(StoredSlice {
                payload,
                updated_at: parse_timestamp(updated_at)?,
            })),
            None => Ok(None),
        }
    }

    fn write_slice(
        &self,
        kind: RecordKind,
        partition: &str,
        payload: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<WriteOutcome, StorageError> {
        let stamp = format_timestamp(updated_at);
        let conn = self.conn.lock().map_err(|_| StorageError::LockPoisoned)?;
        // Fixed-width timestamps, so the string comparison is chronological.
        let changes = conn.execute(
            "
            INSERT INTO slices (kind, partition, payload, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(kind, partition) DO UPDATE SET
                payload = excluded.payload,
                updated_at = excluded.updated_at
            WHERE excluded.updated_at >= slices.updated_at
            ",
            params![kind.as_str(), partition, payload, stamp],
        )?;
        drop(conn);

        if changes > 0 {
            self.touch_signal();
            Ok(WriteOutcome::Applied)
        } else {
            Ok(WriteOutcome::StaleDiscarded)
        }
    }

    fn partitions(&self, kind: RecordKind) -> Result<Vec<String>, StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::LockPoisoned)?;
        let mut statement =
            conn.prepare("SELECT partition FROM slices WHERE kind = ?1 ORDER BY partition ASC")?;
        let rows = statement.query_map([kind.as_str()], |row| row.get(0))?;
        let mut partitions = Vec::new();
        for row in rows {
            partitions.push(row?);
        }
        Ok(partitions)
    }
}

/// In-memory [`SliceStore`] used by unit tests; same semantics as
/// [`LocalStore`] including the monotonic write rule.
#[derive(Default)]
pub struct MemoryStore {
    slices: Mutex<HashMap<(RecordKind, String), StoredSlice>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SliceStore for MemoryStore {
    fn read_slice(
        &self,
        kind: RecordKind,
        partition: &str,
    ) -> Result<Option<StoredSlice>, StorageError> {
        let slices = self.slices.lock().map_err(|_| StorageError::LockPoisoned)?;
        Ok(slices.get(&(kind, partition.to_string())).cloned())
    }

    fn write_slice(
        &self,
        kind: RecordKind,
        partition: &str,
        payload: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<WriteOutcome, StorageError> {
        let mut slices = self.slices.lock().map_err(|_| StorageError::LockPoisoned)?;
        let key = (kind, partition.to_string());
        if let Some(existing) = slices.get(&key) {
            if updated_at < existing.updated_at {
                return Ok(WriteOutcome::StaleDiscarded);
            }
        }
        slices.insert(
            key,
            StoredSlice {
                payload: payload.to_string(),
                updated_at,
            },
        );
        Ok(WriteOutcome::Applied)
    }

    fn partitions(&self, kind: RecordKind) -> Result<Vec<String>, StorageError> {
        let slices = self.slices.lock().map_err(|_| StorageError::LockPoisoned)?;
        let mut partitions: Vec<String> = slices
            .keys()
            .filter(|(slice_kind, _)| *slice_kind == kind)
            .map(|(_, partition)| partition.clone())
            .collect();
        partitions.sort();
        Ok(partitions)
    }
}

fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: String) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(&value)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|err| StorageError::Timestamp(err.to_string()))
}
