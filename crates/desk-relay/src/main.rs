//! Best-effort fan-out relay for the live channel. Holds no durable state:
//! clients that miss a frame converge through their own stores and polls.

use axum::{
    extract::{ws::Message, ws::WebSocket, ws::WebSocketUpgrade, ConnectInfo, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use clap::Parser;
use desk_core::live_event::{Envelope, LiveEvent, PROTOCOL_VERSION};
use desk_core::record::Record;
use futures_util::{SinkExt, StreamExt};
use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const MAX_FRAME_BYTES: usize = 256 * 1024;
const RELAY_SENDER_ID: &str = "relay";

#[derive(Parser, Debug)]
#[command(name = "desk-relay")]
struct Args {
    #[arg(long, default_value = "127.0.0.1:8787")]
    addr: String,
    #[arg(long, default_value_t = 2)]
    write_timeout: u64,
}

#[derive(Clone, Debug)]
struct Config {
    addr: String,
    write_timeout: Duration,
}

struct Client {
    conn_id: u64,
    partition: String,
    sender: mpsc::Sender<Message>,
}

impl Client {
    async fn send_text(&self, frame: String) -> bool {
        self.sender.send(Message::Text(frame)).await.is_ok()
    }
}

struct RelayState {
    config: Config,
    conn_counter: AtomicU64,
    /// Connected members per partition key.
    members: RwLock<HashMap<String, HashMap<u64, Arc<Client>>>>,
    /// Records seen this session per partition, replayed as the join
    /// snapshot. Best effort only; lost on restart by design.
    seen: RwLock<HashMap<String, HashMap<String, Record>>>,
}

impl RelayState {
    fn new(config: Config) -> Self {
        Self {
            config,
            conn_counter: AtomicU64::new(0),
            members: RwLock::new(HashMap::new()),
            seen: RwLock::new(HashMap::new()),
        }
    }

    fn next_conn_id(&self) -> u64 {
        self.conn_counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn register(&self, client: Arc<Client>) {
        self.members
            .write()
            .await
            .entry(client.partition.clone())
            .or_default()
            .insert(client.conn_id, client.clone());
        info!(
            event = "client_joined",
            conn_id = client.conn_id,
            partition = %client.partition,
        );
    }

    async fn remove(&self, client: &Client) {
        let mut members = self.members.write().await;
        if let Some(entries) = members.get_mut(&client.partition) {
            entries.remove(&client.conn_id);
            if entries.is_empty() {
                members.remove(&client.partition);
            }
        }
        info!(
            event = "client_left",
            conn_id = client.conn_id,
            partition = %client.partition,
        );
    }

    /// Forwards a frame to every other member of the partition. Slow or
    /// gone members just miss it.
    async fn fan_out(&self, from: &Client, raw: &str) {
        let peers: Vec<Arc<Client>> = {
            let members = self.members.read().await;
            members
                .get(&from.partition)
                .map(|entries| {
                    entries
                        .values()
                        .filter(|peer| peer.conn_id != from.conn_id)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        };
        for peer in peers {
            if !peer.send_text(raw.to_string()).await {
                warn!(event = "fan_out_drop", conn_id = peer.conn_id);
            }
        }
    }

    async fn remember(&self, partition: &str, record: &Record) {
        self.seen
            .write()
            .await
            .entry(partition.to_string())
            .or_default()
            .insert(record.id.clone(), record.clone());
    }

    async fn snapshot(&self, partition: &str) -> Vec<Record> {
        let seen = self.seen.read().await;
        let mut records: Vec<Record> = seen
            .get(partition)
            .map(|entries| entries.values().cloned().collect())
            .unwrap_or_default();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        records
    }

    async fn send_snapshot(&self, client: &Client) {
        let records = self.snapshot(&client.partition).await;
        let envelope = Envelope::new(RELAY_SENDER_ID, LiveEvent::InboxSnapshot(records));
        match envelope.encode() {
            Ok(frame) => {
                let _ = client.send_text(frame).await;
            }
            Err(err) => warn!(event = "snapshot_encode_failed", error = %err),
        }
    }

    async fn handle_socket(self: Arc<Self>, socket: WebSocket, remote: SocketAddr) {
        let (mut ws_sender, mut ws_receiver) = socket.split();
        let (tx, mut rx) = mpsc::channel::<Message>(256);
        let write_timeout = self.config.write_timeout;
        let write_task = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let send = ws_sender.send(msg);
                if tokio::time::timeout(write_timeout, send).await.is_err() {
                    return;
                }
            }
        });

        // First frame must be join-partition; one partition per connection.
        let first = match ws_receiver.next().await {
            Some(Ok(Message::Text(text))) => text,
            _ => return,
        };
        let partition = match parse_join(&first) {
            Some(partition) => partition,
            None => {
                warn!(event = "join_expected", remote = %remote);
                return;
            }
        };

        let client = Arc::new(Client {
            conn_id: self.next_conn_id(),
            partition,
            sender: tx.clone(),
        });
        self.register(client.clone()).await;
        self.send_snapshot(&client).await;

        while let Some(result) = ws_receiver.next().await {
            let msg = match result {
                Ok(value) => value,
                Err(err) => {
                    warn!(event = "read_error", conn_id = client.conn_id, error = %err);
                    break;
                }
            };
            let raw = match msg {
                Message::Text(text) => text,
                Message::Close(_) => break,
                Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => continue,
            };
            if raw.len() > MAX_FRAME_BYTES {
                warn!(event = "frame_too_large", conn_id = client.conn_id, size = raw.len());
                continue;
            }

            let envelope = match Envelope::decode(&raw) {
                Ok(envelope) => envelope,
                Err(err) => {
                    warn!(event = "frame_malformed", conn_id = client.conn_id, error = %err);
                    continue;
                }
            };
            if envelope.version != PROTOCOL_VERSION {
                warn!(
                    event = "frame_version_mismatch",
                    conn_id = client.conn_id,
                    version = %envelope.version,
                );
                continue;
            }

            match &envelope.event {
                LiveEvent::RecordCreated(record) | LiveEvent::RecordUpdated(record) => {
                    self.remember(&client.partition, record).await;
                    self.fan_out(&client, &raw).await;
                }
                // Rejoin on an open connection is a no-op; snapshots only
                // flow relay -> client.
                LiveEvent::JoinPartition { .. } | LiveEvent::InboxSnapshot(_) => {}
            }
        }

        self.remove(&client).await;
        drop(tx);
        let _ = write_task.await;
    }
}

fn parse_join(raw: &str) -> Option<String> {
    if raw.len() > MAX_FRAME_BYTES {
        return None;
    }
    match Envelope::decode(raw) {
        Ok(Envelope {
            event: LiveEvent::JoinPartition { key },
            ..
        }) => Some(key),
        _ => None,
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(relay): State<Arc<RelayState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        relay.handle_socket(socket, addr).await;
    })
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config {
        addr: args.addr,
        write_timeout: Duration::from_secs(args.write_timeout),
    };
    let addr: SocketAddr = match config.addr.parse() {
        Ok(value) => value,
        Err(err) => {
            tracing::error!(event = "invalid_addr", error = %err, addr = %config.addr);
            return;
        }
    };

    let relay = Arc::new(RelayState::new(config.clone()));
    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(|| async { "ok" }))
        .with_state(relay);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(value) => value,
        Err(err) => {
            tracing::error!(event = "relay_error", error = %err);
            return;
        }
    };
    info!(event = "relay_start", addr = %config.addr);

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    if let Err(err) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    {
        tracing::error!(event = "relay_error", error = %err);
    }
}
