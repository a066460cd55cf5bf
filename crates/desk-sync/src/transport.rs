use crate::writer::RecordWriter;
use crate::SyncError;
use desk_core::live_event::{Envelope, LiveEvent};
use desk_core::record::Record;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};
use url::Url;

const OUTBOUND_QUEUE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub relay_url: String,
    pub instance_id: String,
    pub partition: String,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay: Duration,
}

impl TransportConfig {
    pub fn new(
        relay_url: impl Into<String>,
        instance_id: impl Into<String>,
        partition: impl Into<String>,
    ) -> Self {
        Self {
            relay_url: relay_url.into(),
            instance_id: instance_id.into(),
            partition: partition.into(),
            max_reconnect_attempts: 3,
            reconnect_delay: Duration::from_secs(1),
        }
    }
}

/// Best-effort adapter to the shared relay. Correctness never depends on
/// it: every write path persists to the durable store before emitting, and
/// incoming events become durable writes indistinguishable from local ones.
/// An unreachable relay means local-only operation, logged at info level.
pub struct LiveTransport {
    outbound: mpsc::Sender<Envelope>,
    state: watch::Receiver<TransportState>,
    instance_id: String,
}

impl LiveTransport {
    /// Validates the relay URL and spawns the connection task.
    pub fn spawn(config: TransportConfig, writer: Arc<RecordWriter>) -> Result<Self, SyncError> {
        let url = Url::parse(&config.relay_url)
            .map_err(|err| SyncError::InvalidRelayUrl(format!("{}: {err}", config.relay_url)))?;
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let (state_tx, state_rx) = watch::channel(TransportState::Disconnected);
        let instance_id = config.instance_id.clone();

        tokio::spawn(run_transport(config, url, writer, outbound_rx, state_tx));

        Ok(Self {
            outbound: outbound_tx,
            state: state_rx,
            instance_id,
        })
    }

    pub fn state(&self) -> TransportState {
        *self.state.borrow()
    }

    pub fn emit_record_created(&self, record: Record) {
        self.emit(LiveEvent::RecordCreated(record));
    }

    pub fn emit_record_updated(&self, record: Record) {
        self.emit(LiveEvent::RecordUpdated(record));
    }

    /// Queues an event for the relay. Dropped (with a debug log) when the
    /// transport is down or the queue is full; the durable store already
    /// has the write.
    pub fn emit(&self, event: LiveEvent) {
        let envelope = Envelope::new(self.instance_id.clone(), event);
        if let Err(err) = self.outbound.try_send(envelope) {
            debug!(event = "emit_dropped", error = %err);
        }
    }
}

async fn run_transport(
    config: TransportConfig,
    url: Url,
    writer: Arc<RecordWriter>,
    mut outbound: mpsc::Receiver<Envelope>,
    state: watch::Sender<TransportState>,
) {
    let mut failures: u32 = 0;

    loop {
        if failures > config.max_reconnect_attempts {
            let _ = state.send(TransportState::Disconnected);
            info!(
                event = "transport_local_only",
                relay = %config.relay_url,
                attempts = failures,
            );
            return;
        }

        let _ = state.send(TransportState::Connecting);
        let mut ws = match connect_async(url.as_str()).await {
            Ok((ws, _)) => ws,
            Err(err) => {
                info!(event = "relay_unreachable", error = %err);
                failures += 1;
                tokio::time::sleep(config.reconnect_delay).await;
                continue;
            }
        };

        let join = Envelope::new(
            config.instance_id.clone(),
            LiveEvent::JoinPartition {
                key: config.partition.clone(),
            },
        );
        let join_frame = match join.encode() {
            Ok(frame) => frame,
            Err(err) => {
                warn!(event = "join_encode_failed", error = %err);
                return;
            }
        };
        if ws.send(WsMessage::Text(join_frame)).await.is_err() {
            failures += 1;
            continue;
        }

        let _ = state.send(TransportState::Connected);
        failures = 0;
        info!(event = "relay_joined", partition = %config.partition);

        loop {
            tokio::select! {
                incoming = ws.next() => {
                    match incoming {
                        Some(Ok(WsMessage::Text(raw))) => {
                            handle_frame(&writer, &config.instance_id, &raw);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            info!(event = "relay_read_error", error = %err);
                            break;
                        }
                        None => break,
                    }
                }
                queued = outbound.recv() => {
                    let Some(envelope) = queued else { return };
                    match envelope.encode() {
                        Ok(frame) => {
                            if ws.send(WsMessage::Text(frame)).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => warn!(event = "emit_encode_failed", error = %err),
                    }
                }
            }
        }

        let _ = state.send(TransportState::Disconnected);
        failures += 1;
        tokio::time::sleep(config.reconnect_delay).await;
    }
}

/// Converts one incoming frame into durable-store writes. Malformed frames
/// and own echoes are dropped; a failed store write is logged and dropped
/// rather than crashing the connection task. Returns whether anything was
/// applied.
pub(crate) fn handle_frame(writer: &RecordWriter, instance_id: &str, raw: &str) -> bool {
    let envelope = match Envelope::decode(raw) {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!(event = "live_event_malformed", error = %err);
            return false;
        }
    };
    if envelope.sender_id == instance_id {
        return false;
    }

    match envelope.event {
        LiveEvent::RecordCreated(record) | LiveEvent::RecordUpdated(record) => {
            apply_record(writer, record)
        }
        LiveEvent::InboxSnapshot(records) => {
            let mut applied = false;
            for record in records {
                applied |= apply_record(writer, record);
            }
            applied
        }
        LiveEvent::JoinPartition { .. } => false,
    }
}

fn apply_record(writer: &RecordWriter, record: Record) -> bool {
    let kind = record.kind;
    let partition = record.partition_key.clone();
    match writer.apply_remote(kind, &partition, record) {
        Ok(applied) => applied,
        Err(err) => {
            warn!(event = "live_event_apply_failed", error = %err);
            false
        }
    }
}
