use crate::engine::MergeEngine;
use desk_core::record::{Record, RecordKind};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Default poll interval. The poll is deliberate redundancy: it is the one
/// mechanism that guarantees convergence even when the change signal is
/// missed.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    pub poll_interval: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// One re-resolved view pushed to the UI layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewUpdate {
    pub records: Vec<Record>,
    pub unread: usize,
    pub notices: Vec<RecordNotice>,
}

/// Surfaced for a newly appeared record that this instance did not author.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordNotice {
    pub id: String,
    pub subject: String,
    pub origin_instance: Option<String>,
}

/// Drives convergence for one `(kind, partition)` view: a fixed-interval
/// poll and a watcher on the store's change-signal file both feed the same
/// resolve. Neither trigger subsumes the other.
pub struct ReconcileLoop {
    engine: Arc<MergeEngine>,
    kind: RecordKind,
    /// `None` reconciles every partition of `kind` (the support-wide view).
    partition: Option<String>,
    instance_id: String,
    config: ReconcileConfig,
    signal_path: Option<PathBuf>,
    last_rendered: Option<Vec<Record>>,
    known_ids: HashSet<String>,
}

impl ReconcileLoop {
    pub fn new(
        engine: Arc<MergeEngine>,
        kind: RecordKind,
        partition: impl Into<String>,
        instance_id: impl Into<String>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            engine,
            kind,
            partition: Some(partition.into()),
            instance_id: instance_id.into(),
            config,
            signal_path: None,
            last_rendered: None,
            known_ids: HashSet::new(),
        }
    }

    /// Support-side loop over every partition that carries `kind`, so
    /// guest- and client-authored records surface without masquerading as
    /// any single client.
    pub fn across_partitions(
        engine: Arc<MergeEngine>,
        kind: RecordKind,
        instance_id: impl Into<String>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            engine,
            kind,
            partition: None,
            instance_id: instance_id.into(),
            config,
            signal_path: None,
            last_rendered: None,
            known_ids: HashSet::new(),
        }
    }

    fn scope_label(&self) -> &str {
        self.partition.as_deref().unwrap_or("*")
    }

    /// Short-circuits the poll latency for same-machine updates by watching
    /// the store's signal file.
    pub fn watch_signal(mut self, path: impl Into<PathBuf>) -> Self {
        self.signal_path = Some(path.into());
        self
    }

    /// One reconciliation pass. Returns an update only when the merged view
    /// changed since the last rendered one; the first pass always reports.
    pub fn tick(&mut self) -> Option<ViewUpdate> {
        let records = match &self.partition {
            Some(partition) => self.engine.resolve(self.kind, partition),
            None => self.engine.resolve_all(self.kind),
        };
        if self.last_rendered.as_ref() == Some(&records) {
            return None;
        }

        let notices: Vec<RecordNotice> = records
            .iter()
            .filter(|record| {
                !self.known_ids.contains(&record.id)
                    && self.last_rendered.is_some()
                    && record.origin_instance.as_deref() != Some(self.instance_id.as_str())
            })
            .map(|record| RecordNotice {
                id: record.id.clone(),
                subject: record.subject.clone(),
                origin_instance: record.origin_instance.clone(),
            })
            .collect();

        self.known_ids = records.iter().map(|record| record.id.clone()).collect();
        let unread = records.iter().filter(|record| record.is_unread()).count();
        self.last_rendered = Some(records.clone());

        Some(ViewUpdate {
            records,
            unread,
            notices,
        })
    }

    /// Runs until the update receiver goes away. Ticks on the poll interval
    /// and on every signal-file change.
    pub async fn run(mut self, updates: mpsc::Sender<ViewUpdate>) {
        let mut interval = tokio::time::interval(self.config.poll_interval);
        let (signal_tx, mut signal_rx) = mpsc::unbounded_channel::<()>();
        let _watcher = self
            .signal_path
            .take()
            .and_then(|path| spawn_signal_watcher(&path, signal_tx));

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                Some(()) = signal_rx.recv() => {
                    debug!(event = "signal_tick", partition = %self.scope_label());
                }
            }
            if let Some(update) = self.tick() {
                if updates.send(update).await.is_err() {
                    return;
                }
            }
        }
    }
}

/// Watches the signal file's parent directory; the file may not exist yet
/// when the loop starts.
fn spawn_signal_watcher(
    path: &Path,
    trigger: mpsc::UnboundedSender<()>,
) -> Option<RecommendedWatcher> {
    let signal_path = path.to_path_buf();
    let parent = path.parent()?.to_path_buf();
    let mut watcher = match notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
        match result {
            Ok(event) => {
                if event.paths.iter().any(|changed| changed == &signal_path) {
                    let _ = trigger.send(());
                }
            }
            Err(err) => warn!(event = "signal_watch_error", error = %err),
        }
    }) {
        Ok(watcher) => watcher,
        Err(err) => {
            warn!(event = "signal_watch_unavailable", error = %err);
            return None;
        }
    };

    if let Err(err) = watcher.watch(&parent, RecursiveMode::NonRecursive) {
        warn!(event = "signal_watch_unavailable", error = %err);
        return None;
    }
    Some(watcher)
}
