//! Cross-instance convergence with the transport never connected: two
//! stores on one sqlite file, second instance catches up through the
//! polling path alone.

use desk_core::record::{RecordKind, Sender};
use desk_storage::{LocalStore, SeedStore};
use desk_sync::{MergeEngine, ReconcileConfig, ReconcileLoop, RecordWriter};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

const PARTITION: &str = "client:acme";
const POLL: Duration = Duration::from_millis(50);

fn seed() -> SeedStore {
    SeedStore::from_slices([(RecordKind::Ticket, PARTITION.to_string(), Vec::new())])
}

#[tokio::test]
async fn polling_alone_converges_two_instances() {
    let db = tempfile::NamedTempFile::new().expect("temp db");

    let engine_a = Arc::new(MergeEngine::new(
        seed(),
        Arc::new(LocalStore::open(db.path()).expect("open a")),
    ));
    let engine_b = Arc::new(MergeEngine::new(
        seed(),
        Arc::new(LocalStore::open(db.path()).expect("open b")),
    ));

    let reconcile = ReconcileLoop::new(
        engine_b,
        RecordKind::Ticket,
        PARTITION,
        "inst-b",
        ReconcileConfig {
            poll_interval: POLL,
        },
    );
    let (updates_tx, mut updates) = mpsc::channel(8);
    tokio::spawn(reconcile.run(updates_tx));

    // Initial view: nothing in the partition.
    let initial = timeout(Duration::from_secs(1), updates.recv())
        .await
        .expect("initial update in time")
        .expect("loop alive");
    assert!(initial.records.is_empty());

    // Instance A writes durably; no transport exists anywhere in this test.
    let writer = RecordWriter::new(engine_a, "inst-a");
    let created = writer
        .create_ticket(
            PARTITION,
            "Sistema fora do ar",
            "ninguém consegue logar",
            Sender {
                name: "Laura".to_string(),
                email: "laura@acme.example".to_string(),
                support: false,
            },
        )
        .expect("create ticket");

    // Instance B converges within one poll interval (plus slack).
    let update = timeout(Duration::from_secs(1), updates.recv())
        .await
        .expect("converged update in time")
        .expect("loop alive");
    assert_eq!(update.records.len(), 1);
    assert_eq!(update.records[0].id, created.id);
    assert_eq!(update.unread, 1);
    assert_eq!(update.notices.len(), 1);
    assert_eq!(update.notices[0].origin_instance.as_deref(), Some("inst-a"));
}

#[tokio::test]
async fn signal_file_short_circuits_the_poll() {
    let dir = tempfile::tempdir().expect("temp dir");
    let db_path = dir.path().join("desk.db");
    let signal = desk_storage::ChangeSignal::for_store(&db_path);

    let store_a = LocalStore::open(&db_path)
        .expect("open a")
        .with_signal(signal.clone());
    let engine_a = Arc::new(MergeEngine::new(seed(), Arc::new(store_a)));
    let engine_b = Arc::new(MergeEngine::new(
        seed(),
        Arc::new(LocalStore::open(&db_path).expect("open b")),
    ));

    // Long poll: only the watcher can deliver the update quickly.
    let reconcile = ReconcileLoop::new(
        engine_b,
        RecordKind::Ticket,
        PARTITION,
        "inst-b",
        ReconcileConfig {
            poll_interval: Duration::from_secs(30),
        },
    )
    .watch_signal(signal.path());
    let (updates_tx, mut updates) = mpsc::channel(8);
    tokio::spawn(reconcile.run(updates_tx));

    let initial = timeout(Duration::from_secs(2), updates.recv())
        .await
        .expect("initial update in time")
        .expect("loop alive");
    assert!(initial.records.is_empty());

    // Give the watcher a moment to arm before writing.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let writer = RecordWriter::new(engine_a, "inst-a");
    writer
        .create_ticket(
            PARTITION,
            "Acesso bloqueado",
            "erro ao entrar",
            Sender {
                name: "Pedro".to_string(),
                email: "pedro@globex.example".to_string(),
                support: false,
            },
        )
        .expect("create ticket");

    let update = timeout(Duration::from_secs(5), updates.recv())
        .await
        .expect("signal-driven update in time")
        .expect("loop alive");
    assert_eq!(update.records.len(), 1);
}
