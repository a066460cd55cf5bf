use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use desk_core::partition::ViewerSession;
use desk_core::record::{RecordKind, RecordStatus, Sender};
use desk_storage::{ChangeSignal, LocalStore, SeedStore};
use desk_sync::{
    LiveTransport, MergeEngine, ReadStateTracker, ReconcileConfig, ReconcileLoop, RecordWriter,
    TransportConfig, TransportState,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "desk")]
#[command(about = "Support-desk sync engine CLI", long_about = None)]
struct Cli {
    /// Path to the durable store; defaults to the user data directory.
    #[arg(long)]
    db: Option<PathBuf>,
    /// Viewer role: support, client or guest.
    #[arg(long, default_value = "support")]
    role: String,
    /// Company id, required for the client role.
    #[arg(long)]
    company: Option<String>,
    /// Invite code, required for the guest role.
    #[arg(long)]
    invite: Option<String>,
    /// Record kind to operate on; defaults to email for support, ticket
    /// otherwise.
    #[arg(long)]
    kind: Option<RecordKind>,
    /// Relay URL for live propagation; omit for local-only operation.
    #[arg(long)]
    relay: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the merged record view and the unread badge
    Inbox,
    /// Create a ticket; priority is assigned by the triage classifier
    CreateTicket {
        #[arg(long)]
        subject: String,
        #[arg(long)]
        description: String,
        #[arg(long, default_value = "CLI user")]
        name: String,
        #[arg(long, default_value = "")]
        email: String,
    },
    /// Mark a record read
    Read { id: String },
    /// Mark a record unread (explicit manual action)
    Unread { id: String },
    /// Set a record's status
    SetStatus { id: String, status: RecordStatus },
    /// Follow the partition and print every view change
    Watch,
}

struct Session {
    engine: Arc<MergeEngine>,
    writer: Arc<RecordWriter>,
    tracker: ReadStateTracker,
    kind: RecordKind,
    partition: String,
    /// Support operators see every partition carrying the kind, so guest-
    /// and client-authored tickets surface without masquerading.
    aggregate: bool,
    signal: ChangeSignal,
    instance_id: String,
}

impl Session {
    fn view_records(&self) -> Vec<desk_core::record::Record> {
        if self.aggregate {
            self.engine.resolve_all(self.kind)
        } else {
            self.engine.resolve(self.kind, &self.partition)
        }
    }

    fn scope_label(&self) -> String {
        if self.aggregate {
            format!("all {} partitions", self.kind)
        } else {
            self.partition.clone()
        }
    }

    fn spawn_transport(&self, relay: Option<String>) -> Result<Option<LiveTransport>> {
        match relay {
            Some(relay) => Ok(Some(LiveTransport::spawn(
                TransportConfig::new(relay, self.instance_id.clone(), &self.partition),
                self.writer.clone(),
            )?)),
            None => Ok(None),
        }
    }
}

/// The durable write already happened; this just gives a queued frame a
/// chance to flush before the process exits.
async fn flush_transport(transport: &Option<LiveTransport>) {
    if transport.is_some() {
        tokio::time::sleep(Duration::from_millis(750)).await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let session = open_session(&cli)?;

    match cli.command {
        Commands::Inbox => {
            let records = session.view_records();
            let unread = records.iter().filter(|record| record.is_unread()).count();
            println!(
                "{} · {} records · {} unread",
                session.scope_label(),
                records.len(),
                unread
            );
            for record in records {
                let marker = if record.is_unread() { "●" } else { " " };
                let priority = record
                    .priority
                    .map(|p| format!(" [{p}]"))
                    .unwrap_or_default();
                println!(
                    "{marker} {}  {:<12}{priority}  {}",
                    record.id, record.status, record.subject
                );
            }
        }
        Commands::CreateTicket {
            subject,
            description,
            name,
            email,
        } => {
            let author = Sender {
                name,
                email,
                support: false,
            };
            let transport = session.spawn_transport(cli.relay)?;
            let record = session
                .writer
                .create_ticket(&session.partition, &subject, &description, author)
                .context("create ticket")?;
            println!(
                "created {} priority={}",
                record.id,
                record.priority.unwrap_or_default()
            );
            if let Some(transport) = &transport {
                transport.emit_record_created(record);
            }
            flush_transport(&transport).await;
        }
        Commands::Read { id } => {
            let transport = session.spawn_transport(cli.relay)?;
            match session
                .tracker
                .mark_read(session.kind, &session.partition, &id)
                .context("mark read")?
            {
                Some(record) => {
                    println!("{id}: marked read");
                    if let Some(transport) = &transport {
                        transport.emit_record_updated(record);
                    }
                    flush_transport(&transport).await;
                }
                None => println!("{id}: no change"),
            }
        }
        Commands::Unread { id } => {
            let transport = session.spawn_transport(cli.relay)?;
            match session
                .tracker
                .mark_unread(session.kind, &session.partition, &id)
                .context("mark unread")?
            {
                Some(record) => {
                    println!("{id}: marked unread");
                    if let Some(transport) = &transport {
                        transport.emit_record_updated(record);
                    }
                    flush_transport(&transport).await;
                }
                None => println!("{id}: no change"),
            }
        }
        Commands::SetStatus { id, status } => {
            let transport = session.spawn_transport(cli.relay)?;
            let record = session
                .writer
                .set_status(session.kind, &session.partition, &id, status)
                .context("set status")?;
            println!("{id}: status={}", record.status);
            if let Some(transport) = &transport {
                transport.emit_record_updated(record);
            }
            flush_transport(&transport).await;
        }
        Commands::Watch => watch(session, cli.relay).await?,
    }

    Ok(())
}

async fn watch(session: Session, relay: Option<String>) -> Result<()> {
    let transport = session.spawn_transport(relay)?;

    let reconcile = if session.aggregate {
        ReconcileLoop::across_partitions(
            session.engine.clone(),
            session.kind,
            session.instance_id.clone(),
            ReconcileConfig::default(),
        )
    } else {
        ReconcileLoop::new(
            session.engine.clone(),
            session.kind,
            session.partition.clone(),
            session.instance_id.clone(),
            ReconcileConfig::default(),
        )
    }
    .watch_signal(session.signal.path());

    let (updates_tx, mut updates) = mpsc::channel(16);
    tokio::spawn(reconcile.run(updates_tx));
    println!("watching {} (ctrl-c to stop)", session.scope_label());

    loop {
        tokio::select! {
            maybe_update = updates.recv() => {
                let Some(update) = maybe_update else { break };
                let mode = match &transport {
                    Some(transport) if transport.state() == TransportState::Connected => " [live]",
                    Some(_) => " [local-only]",
                    None => "",
                };
                println!("view: {} records, {} unread{mode}", update.records.len(), update.unread);
                for notice in update.notices {
                    let origin = notice.origin_instance.unwrap_or_else(|| "unknown".to_string());
                    println!("  new from {origin}: {} — {}", notice.id, notice.subject);
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

fn open_session(cli: &Cli) -> Result<Session> {
    let viewer = match cli.role.as_str() {
        "support" => ViewerSession::Support,
        "client" => ViewerSession::Client {
            company_id: cli
                .company
                .clone()
                .context("--company is required for the client role")?,
        },
        "guest" => ViewerSession::Guest {
            invite_code: cli
                .invite
                .clone()
                .context("--invite is required for the guest role")?,
        },
        other => anyhow::bail!("unknown role: {other}"),
    };
    let partition = viewer.partition_key();
    let kind = cli.kind.unwrap_or(match viewer {
        ViewerSession::Support => RecordKind::Email,
        _ => RecordKind::Ticket,
    });
    // Support operators reading tickets get the cross-partition view.
    let aggregate = viewer.is_support() && kind == RecordKind::Ticket;

    let db_path = match &cli.db {
        Some(path) => path.clone(),
        None => dirs::data_dir()
            .context("no user data directory")?
            .join("desk")
            .join("desk.db"),
    };
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).context("create data directory")?;
    }

    let signal = ChangeSignal::for_store(&db_path);
    let store = LocalStore::open(&db_path)
        .context("open durable store")?
        .with_signal(signal.clone());
    let seed = SeedStore::builtin().context("load seed dataset")?;
    let engine = Arc::new(MergeEngine::new(seed, Arc::new(store)));

    let instance_id = format!("inst-{}", uuid::Uuid::new_v4());
    let writer = Arc::new(RecordWriter::new(engine.clone(), instance_id.clone()));
    let tracker = ReadStateTracker::new(engine.clone());

    Ok(Session {
        engine,
        writer,
        tracker,
        kind,
        partition,
        aggregate,
        signal,
        instance_id,
    })
}
