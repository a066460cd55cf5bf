use crate::StorageError;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Sidecar file touched after every applied durable write. Other instances
/// on the same machine watch it (via `notify`) to trigger an out-of-band
/// reconciliation tick instead of waiting for the next poll.
#[derive(Debug, Clone)]
pub struct ChangeSignal {
    path: PathBuf,
}

impl ChangeSignal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Conventional signal path for a given store database path.
    pub fn for_store(db_path: impl AsRef<Path>) -> Self {
        let mut path = db_path.as_ref().as_os_str().to_owned();
        path.push(".signal");
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrites the file with a fresh timestamp so watchers see a change
    /// even on filesystems with coarse mtime resolution.
    pub fn touch(&self) -> Result<(), StorageError> {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos())
            .unwrap_or_default();
        fs::write(&self.path, nanos.to_string())?;
        Ok(())
    }
}
